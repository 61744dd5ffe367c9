//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_non_empty, env_var_or_default, env_var_or_default_bool, env_var_or_default_str};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Operand image references come from the `RELATED_IMAGE_*` variables set on the
/// operator's own deployment; they are optional at load time and validated per pass.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// external-secrets operand image (`RELATED_IMAGE_EXTERNAL_SECRETS`)
    pub external_secrets_image: Option<String>,
    /// bitwarden-sdk-server plugin image (`RELATED_IMAGE_BITWARDEN_SDK_SERVER`)
    pub bitwarden_image: Option<String>,
    /// Delay before a pass that ended in a retryable failure runs again (seconds)
    pub requeue_interval_secs: u64,
    /// Attempts for optimistic-concurrency writes (finalizers, status, drift updates)
    pub conflict_retry_attempts: u32,
    /// Delay between optimistic-concurrency attempts (milliseconds)
    pub conflict_retry_delay_ms: u64,
    /// Exponential backoff starting value for watch restarts (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch restarts (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Operator log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Query API discovery for optional extensions at startup
    /// When false every optional extension is treated as absent
    pub capability_detection_enabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            external_secrets_image: None,
            bitwarden_image: None,
            requeue_interval_secs: DEFAULT_REQUEUE_INTERVAL_SECS,
            conflict_retry_attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            conflict_retry_delay_ms: DEFAULT_CONFLICT_RETRY_DELAY_MS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
            capability_detection_enabled: true,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            external_secrets_image: env_var_non_empty(ENV_EXTERNAL_SECRETS_IMAGE),
            bitwarden_image: env_var_non_empty(ENV_BITWARDEN_IMAGE),
            requeue_interval_secs: env_var_or_default(
                "REQUEUE_INTERVAL_SECS",
                DEFAULT_REQUEUE_INTERVAL_SECS,
            ),
            conflict_retry_attempts: env_var_or_default(
                "CONFLICT_RETRY_ATTEMPTS",
                DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            ),
            conflict_retry_delay_ms: env_var_or_default(
                "CONFLICT_RETRY_DELAY_MS",
                DEFAULT_CONFLICT_RETRY_DELAY_MS,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            capability_detection_enabled: env_var_or_default_bool(
                "CAPABILITY_DETECTION_ENABLED",
                true,
            ),
        }
    }

    /// Get the delayed requeue used for retryable failures
    #[must_use]
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    /// Get the delay between optimistic-concurrency attempts
    #[must_use]
    pub fn conflict_retry_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_retry_delay_ms)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Whether logs should be emitted as JSON
    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ControllerConfig::default();
        assert_eq!(config.requeue_interval(), Duration::from_secs(30));
        assert_eq!(config.conflict_retry_attempts, 5);
        assert_eq!(config.conflict_retry_delay(), Duration::from_millis(10));
        assert!(config.external_secrets_image.is_none());
        assert!(config.capability_detection_enabled);
        assert!(!config.json_logs());
    }

    #[test]
    fn test_json_logs_is_case_insensitive() {
        let config = ControllerConfig {
            log_format: "JSON".to_string(),
            ..ControllerConfig::default()
        };
        assert!(config.json_logs());
    }
}
