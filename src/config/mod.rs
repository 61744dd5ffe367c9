//! # Configuration
//!
//! Process-level settings loaded once from environment variables at startup.
//!
//! - `controller`: reconcile, retry, watch and operand image settings
//! - `server`: metrics/probe HTTP server settings

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

use std::sync::Arc;

/// Controller configuration shared by every reconciler, read-only after startup
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
pub(crate) fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable
pub(crate) fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
