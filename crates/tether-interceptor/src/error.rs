//! Error types for the cloud interceptor

use tether_core::HandlerFailure;
use tether_transport::TransportError;

/// Interceptor error type
#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    /// A required injected variable is absent
    #[error("environment variable {0} is not set")]
    MissingVariable(&'static str),

    /// An injected variable could not be parsed
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidVariable { name: &'static str, value: String },

    /// The developer machine (or the real handler) reported a failure
    #[error("{0}")]
    Handler(HandlerFailure),

    /// No real handler is registered under the resolved name
    #[error("handler '{0}' is not registered")]
    HandlerNotFound(String),

    /// The chained wrapper script could not be run
    #[error("previous wrapper failed: {0}")]
    Wrapper(String),

    /// The broker session ended while a call was waiting
    #[error("broker connection lost while waiting for request {0}")]
    ConnectionLost(String),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl InterceptorError {
    /// Whether the error describes a misconfigured function rather than a
    /// failed invocation
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingVariable(_) | Self::InvalidVariable { .. } | Self::HandlerNotFound(_)
        )
    }

    /// Structured failure as returned to the platform runtime
    #[must_use]
    pub fn into_failure(self) -> HandlerFailure {
        match self {
            Self::Handler(failure) => failure,
            other => HandlerFailure::new("InterceptorError", other.to_string()),
        }
    }
}

impl From<HandlerFailure> for InterceptorError {
    fn from(failure: HandlerFailure) -> Self {
        Self::Handler(failure)
    }
}
