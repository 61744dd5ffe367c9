//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use external_secrets_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler types
pub use crate::controller::errors::{ErrorKind, ReconcileError, ReconcileOutcome};
pub use crate::controller::reconciler::{
    ensure_singletons, reconcile_config, reconcile_manager, reconcile_operator, Context,
};

// Client seams
pub use crate::controller::capability::{Capability, CapabilityRegistry};
pub use crate::controller::client::ResourceClient;
pub use crate::controller::events::EventPublisher;
pub use crate::controller::lifecycle::CleanupHandler;
pub use crate::controller::store::ObjectStore;

// Config types
pub use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig};
