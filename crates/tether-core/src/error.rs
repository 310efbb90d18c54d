//! Error types for tether-core
//!
//! Covers the failures of the shared layer:
//! - Catalog lookups for unknown functions
//! - Configuration loading and parsing
//! - Session identity derivation

use std::path::PathBuf;

/// Main error type for the shared layer
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Function is not part of the discovered catalog
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// Configuration file could not be read
    #[error("failed to read configuration {path}: {source}")]
    ConfigRead {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Configuration content is malformed
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration value is out of range or inconsistent
    #[error("invalid configuration value for `{key}`: {reason}")]
    InvalidValue {
        /// Offending key
        key: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Session identity could not be derived
    #[error("session identity unavailable: {0}")]
    Identity(String),
}

impl CoreError {
    /// Whether the error stems from user-provided configuration
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. } | Self::ConfigParse(_) | Self::InvalidValue { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_not_found_display() {
        let err = CoreError::FunctionNotFound("orders".to_string());
        assert_eq!(err.to_string(), "function not found: orders");
        assert!(!err.is_config_error());
    }

    #[test]
    fn invalid_value_is_config_error() {
        let err = CoreError::InvalidValue {
            key: "mirror_interval_ms",
            reason: "must be positive".to_string(),
        };
        assert!(err.is_config_error());
        assert!(err.to_string().contains("mirror_interval_ms"));
    }
}
