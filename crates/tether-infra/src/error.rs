//! Error types for infrastructure reconciliation

use std::path::PathBuf;

/// Reconciliation error type
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A management call failed
    #[error("{operation} failed for {target}: {message}")]
    Api {
        /// Management operation
        operation: &'static str,
        /// Function, role or layer the call was about
        target: String,
        /// Service message
        message: String,
    },

    /// A management call was throttled
    #[error("{operation} throttled for {target}")]
    Throttled {
        /// Management operation
        operation: &'static str,
        /// Function, role or layer the call was about
        target: String,
    },

    /// The bridge layer archive could not be read
    #[error("failed to read layer archive {path}: {source}")]
    LayerArchive {
        /// Archive path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The function's execution role could not be determined
    #[error("function {0} has no resolvable execution role")]
    RoleUnresolved(String),

    /// Attachment was planned but no layer version is available
    #[error("bridge layer version is unavailable")]
    LayerUnavailable,
}

impl ReconcileError {
    /// Failed management call
    #[must_use]
    pub fn api(operation: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the operation later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}
