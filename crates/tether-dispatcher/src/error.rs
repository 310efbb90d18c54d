//! Error types for the local dispatcher

use tether_build::BuildError;
use tether_core::{CoreError, HandlerFailure};
use tether_sandbox::SandboxError;
use tether_transport::{EnvelopeKind, TransportError};

/// Dispatcher error type
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Something other than INVOKE arrived on the aggregate topic
    #[error("unexpected {0} message on the events topic")]
    UnexpectedEnvelope(EnvelopeKind),

    /// Function lookup failed
    #[error(transparent)]
    Catalog(#[from] CoreError),

    /// The function could not be built
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    /// The sandbox reported a failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A reply could not be published
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Structured failure delivered in an ERROR envelope
    #[must_use]
    pub fn into_failure(self) -> HandlerFailure {
        match self {
            Self::Sandbox(e) => e.into_failure(),
            Self::Build(e) => HandlerFailure::new("BuildError", e.to_string()),
            Self::Catalog(CoreError::FunctionNotFound(name)) => {
                HandlerFailure::new("FunctionNotFound", format!("function not found: {name}"))
            }
            other => HandlerFailure::new("DispatchError", other.to_string()),
        }
    }

    /// Whether the failure belongs to the invocation rather than the bridge
    #[inline]
    #[must_use]
    pub fn is_invocation_failure(&self) -> bool {
        matches!(self, Self::Build(_) | Self::Sandbox(_) | Self::Catalog(_))
    }
}
