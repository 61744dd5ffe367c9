//! # Server Configuration
//!
//! Settings for the metrics and probe HTTP server.

use super::env_var_or_default;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port serving `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long to wait for the server to bind before failing startup (seconds)
    pub startup_timeout_secs: u64,
    /// Readiness poll interval during startup (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }

    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
