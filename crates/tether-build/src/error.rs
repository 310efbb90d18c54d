//! Error types for the build engine
//!
//! Build results are shared between concurrent callers, so the error is
//! `Clone`; I/O causes are kept behind an `Arc`.

use std::path::PathBuf;
use std::sync::Arc;
use tether_core::FunctionId;

/// Build error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// The function is not in the catalog
    #[error("function not found: {0}")]
    FunctionNotFound(FunctionId),

    /// The compiler reported errors
    #[error("error building function {function_id}: {message}")]
    Compile {
        function_id: FunctionId,
        message: String,
    },

    /// The compiler could not be started
    #[error("compiler unavailable: {0}")]
    CompilerUnavailable(String),

    /// The build produced no script output
    #[error("artifact file not found for function {0}")]
    NoArtifact(FunctionId),

    /// The package manifest could not be read
    #[error("invalid package manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// File system failure around the build
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl BuildError {
    /// Wrap an I/O error with the path it concerns
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Whether retrying after a source change may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Compile { .. } | Self::NoArtifact(_) | Self::Manifest { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_errors_are_retryable() {
        let err = BuildError::Compile {
            function_id: FunctionId::new("orders"),
            message: "syntax error".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("orders"));
        assert!(!BuildError::FunctionNotFound(FunctionId::new("x")).is_retryable());
    }

    #[test]
    fn io_error_is_cloneable() {
        let err = BuildError::io("/tmp/x", std::io::Error::other("disk full"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
