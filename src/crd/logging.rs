//! # Logging Configuration
//!
//! Log level passed through to the external-secrets operand.

use serde::{Deserialize, Serialize};

/// Operand log level
///
/// Log levels follow standard hierarchy: DEBUG includes INFO and WARN, WARN includes ERROR.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only log errors
    Error,
    /// Log warnings and errors
    Warn,
    /// Log informational messages, warnings, and errors
    #[default]
    Info,
    /// Log everything including detailed debugging information
    Debug,
}

impl LogLevel {
    /// Value accepted by the operand's `--loglevel` flag
    #[must_use]
    pub fn as_arg(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Get the tracing level equivalent
    #[must_use]
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_serializes_lowercase() {
        let json = serde_json::to_string(&LogLevel::Debug).unwrap();
        assert_eq!(json, "\"debug\"");
        let parsed: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(parsed, LogLevel::Warn);
    }

    #[test]
    fn test_log_level_defaults_to_info() {
        assert_eq!(LogLevel::default().as_arg(), "info");
        assert_eq!(LogLevel::default().to_tracing_level(), tracing::Level::INFO);
    }
}
