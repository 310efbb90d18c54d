//! Sandbox lifecycle state machine
//!
//! ```text
//! Idle ──begin──▶ Busy ──finish──▶ Idle
//!  │               │
//!  kill           kill
//!  ▼               ▼
//! Terminated ◀──finish── BusyPendingKill
//! ```
//!
//! A kill request never interrupts a running invocation; it is recorded and
//! carried out when that invocation finishes.

use crate::error::SandboxError;
use tether_core::WorkerId;

/// Lifecycle state of one sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxState {
    /// Ready for an invocation
    Idle,
    /// Running an invocation
    Busy,
    /// Running an invocation; terminate when it finishes
    BusyPendingKill,
    /// Torn down
    Terminated,
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SandboxState) -> Vec<SandboxState> {
    use SandboxState::{Busy, BusyPendingKill, Idle, Terminated};
    match from {
        Idle => vec![Busy, Terminated],
        Busy => vec![Idle, BusyPendingKill, Terminated],
        BusyPendingKill => vec![Terminated],
        Terminated => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// - `SandboxError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: SandboxState, to: SandboxState) -> Result<(), SandboxError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SandboxError::IllegalTransition { from, to })
    }
}

impl SandboxState {
    /// Accept an invocation
    ///
    /// # Errors
    /// - `SandboxError::WorkerBusy` while an invocation is running
    /// - `SandboxError::Terminated` after teardown
    pub fn begin(self, worker_id: &WorkerId) -> Result<Self, SandboxError> {
        match self {
            Self::Idle => Ok(Self::Busy),
            Self::Busy | Self::BusyPendingKill => Err(SandboxError::WorkerBusy(worker_id.clone())),
            Self::Terminated => Err(SandboxError::Terminated(worker_id.clone())),
        }
    }

    /// The running invocation delivered its response
    ///
    /// # Errors
    /// - `SandboxError::IllegalTransition` if nothing was running
    pub fn finish(self) -> Result<Self, SandboxError> {
        let next = match self {
            Self::Busy => Self::Idle,
            Self::BusyPendingKill => Self::Terminated,
            Self::Idle | Self::Terminated => {
                return Err(SandboxError::IllegalTransition {
                    from: self,
                    to: Self::Idle,
                })
            }
        };
        validate_transition(self, next)?;
        Ok(next)
    }

    /// Request teardown; immediate when idle, deferred when busy
    #[must_use]
    pub fn request_kill(self) -> Self {
        match self {
            Self::Idle | Self::Terminated => Self::Terminated,
            Self::Busy | Self::BusyPendingKill => Self::BusyPendingKill,
        }
    }

    /// The execution context died underneath a running invocation
    #[must_use]
    pub fn crash(self) -> Self {
        Self::Terminated
    }

    /// Whether an invocation is running
    #[inline]
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Busy | Self::BusyPendingKill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> WorkerId {
        WorkerId::new("w1")
    }

    #[test]
    fn invocation_cycle() {
        let busy = SandboxState::Idle.begin(&worker()).unwrap();
        assert_eq!(busy, SandboxState::Busy);
        assert_eq!(busy.finish().unwrap(), SandboxState::Idle);
    }

    #[test]
    fn kill_while_busy_is_deferred() {
        let pending = SandboxState::Busy.request_kill();
        assert_eq!(pending, SandboxState::BusyPendingKill);
        assert!(pending.is_busy());
        assert_eq!(pending.finish().unwrap(), SandboxState::Terminated);
    }

    #[test]
    fn kill_while_idle_is_immediate() {
        assert_eq!(SandboxState::Idle.request_kill(), SandboxState::Terminated);
    }

    #[test]
    fn second_invocation_rejected() {
        let err = SandboxState::Busy.begin(&worker()).unwrap_err();
        assert!(matches!(err, SandboxError::WorkerBusy(_)));
        let err = SandboxState::BusyPendingKill.begin(&worker()).unwrap_err();
        assert!(matches!(err, SandboxError::WorkerBusy(_)));
        let err = SandboxState::Terminated.begin(&worker()).unwrap_err();
        assert!(matches!(err, SandboxError::Terminated(_)));
    }

    #[test]
    fn finish_without_invocation_is_illegal() {
        assert!(SandboxState::Idle.finish().is_err());
        assert!(validate_transition(SandboxState::Terminated, SandboxState::Idle).is_err());
        assert!(validate_transition(SandboxState::BusyPendingKill, SandboxState::Idle).is_err());
    }
}
