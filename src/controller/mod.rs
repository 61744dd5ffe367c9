//! # Controller
//!
//! Core controller modules for the External Secrets Operator.
//!
//! - `errors`: failure taxonomy and classifier
//! - `retry`: bounded optimistic-concurrency retry
//! - `backoff`: Fibonacci backoff used by the error policy
//! - `resources`: the closed set of managed kinds and their descriptors
//! - `drift`: per-kind comparison of live and desired objects
//! - `merge`: owned fields of a desired object written over the live one
//! - `desired`: builds the ordered desired state of one pass
//! - `store`: get/create/replace/delete over managed objects
//! - `driver`: applies descriptors, fail-fast
//! - `events`: Kubernetes Event publishing
//! - `client`: finalizer and status writes on the operator's own resources
//! - `lifecycle`: finalizer handling and delete-time cleanup
//! - `status`: condition upsert and controller-status buckets
//! - `capability`: discovery of optional cluster extensions
//! - `scope`: label-scoped watch set
//! - `reconciler`: the reconcile functions

pub mod backoff;
pub mod capability;
pub mod client;
pub mod desired;
pub mod drift;
pub mod driver;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod merge;
pub mod quantity;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod scope;
pub mod status;
pub mod store;
