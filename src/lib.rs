//! External Secrets Operator Library
//!
//! Installs the external-secrets stack and its optional plugins from the
//! `ExternalSecretsConfig` singleton and keeps every managed object converged.
//!
//! ## Quick Start
//!
//! ```rust
//! use external_secrets_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod assets;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
