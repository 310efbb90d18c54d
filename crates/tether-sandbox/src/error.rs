//! Error types for the sandbox pool

use crate::state::SandboxState;
use tether_core::{HandlerFailure, WorkerId};

/// Sandbox error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    /// The handler ran and failed
    #[error("{0}")]
    Handler(HandlerFailure),

    /// The artifact does not export the configured handler
    #[error("handler '{handler}' not found in {module}")]
    HandlerNotFound { module: String, handler: String },

    /// The sandbox already serves an invocation
    #[error("worker {0} is busy with another invocation")]
    WorkerBusy(WorkerId),

    /// The sandbox has been torn down
    #[error("worker {0} has been terminated")]
    Terminated(WorkerId),

    /// The execution context could not be started
    #[error("failed to start execution context: {0}")]
    Spawn(String),

    /// A state change the lifecycle does not allow
    #[error("illegal sandbox transition {from:?} -> {to:?}")]
    IllegalTransition { from: SandboxState, to: SandboxState },
}

impl SandboxError {
    /// Structured failure as delivered to the caller
    #[must_use]
    pub fn into_failure(self) -> HandlerFailure {
        match self {
            Self::Handler(failure) => failure,
            Self::HandlerNotFound { .. } => HandlerFailure::new("HandlerNotFound", self.to_string()),
            Self::WorkerBusy(_) => HandlerFailure::new("WorkerBusy", self.to_string()),
            Self::Terminated(_) => HandlerFailure::new("WorkerTerminated", self.to_string()),
            Self::Spawn(_) => HandlerFailure::new("SandboxStartError", self.to_string()),
            Self::IllegalTransition { .. } => HandlerFailure::new("SandboxStateError", self.to_string()),
        }
    }

    /// Whether the failure came from user code rather than the pool
    #[inline]
    #[must_use]
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler(_) | Self::HandlerNotFound { .. })
    }
}

impl From<HandlerFailure> for SandboxError {
    fn from(failure: HandlerFailure) -> Self {
        Self::Handler(failure)
    }
}
