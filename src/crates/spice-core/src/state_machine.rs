//! Execution state machine (spec §4.1)
//!
//! Enforces the lifecycle a [`crate::message::Message`] is allowed to move
//! through. `ExecutionState` alone only names the positions; `transition`
//! is where the machine actually validates a move and is the single place
//! in the crate allowed to decide whether a transition is legal.
//!
//! ```text
//! READY     → RUNNING
//! RUNNING   → WAITING | COMPLETED | FAILED | RUNNING (self, on node advance)
//! WAITING   → RUNNING (only via resume)
//! COMPLETED → (none)
//! FAILED    → (none)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SpiceError;

/// Lifecycle position of a [`crate::message::Message`] (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    Ready,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl ExecutionState {
    /// `COMPLETED` and `FAILED` are terminal — no further transition is
    /// ever legal from them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn allows(self, to: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, to),
            (Ready, Running)
                | (Running, Waiting)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Running)
                | (Waiting, Running)
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// One entry in a message's append-only `stateHistory` (spec §3 invariant b).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub reason: String,
    pub node_id: Option<String>,
}

/// Validates and performs state transitions, producing history entries.
///
/// Stateless by design — all the state lives in the `Message`'s own
/// `stateHistory`; the machine is just the rulebook plus the history
/// consistency check (spec §4.1: "validates that `stateHistory` is
/// consistent with the current state").
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionStateMachine;

impl ExecutionStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Validate that `history` is monotonic (spec §8 invariant 1): each
    /// entry's `from` equals the previous entry's `to`.
    pub fn validate_history(&self, history: &[StateTransition]) -> Result<(), SpiceError> {
        for window in history.windows(2) {
            if window[0].to != window[1].from {
                return Err(SpiceError::validation(format!(
                    "stateHistory is not monotonic: {} -> {} followed by {} -> {}",
                    window[0].from, window[0].to, window[1].from, window[1].to
                )));
            }
        }
        Ok(())
    }

    /// Attempt `current -> next`, returning the new history entry on
    /// success. Any transition not in the table at the top of this module
    /// fails with `SpiceError::Validation` (spec §4.1).
    pub fn transition(
        &self,
        current: ExecutionState,
        next: ExecutionState,
        reason: impl Into<String>,
        node_id: Option<String>,
    ) -> Result<StateTransition, SpiceError> {
        if !current.allows(next) {
            return Err(SpiceError::validation(format!(
                "illegal state transition {current} -> {next}"
            )));
        }
        Ok(StateTransition {
            from: current,
            to: next,
            timestamp: chrono::Utc::now(),
            reason: reason.into(),
            node_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionState::*;

    #[test]
    fn ready_to_running_is_allowed() {
        let m = ExecutionStateMachine::new();
        assert!(m.transition(Ready, Running, "start", None).is_ok());
    }

    #[test]
    fn completed_is_terminal() {
        let m = ExecutionStateMachine::new();
        assert!(m.transition(Completed, Running, "resurrect", None).is_err());
        assert!(m.transition(Failed, Running, "resurrect", None).is_err());
    }

    #[test]
    fn waiting_only_resumes_to_running() {
        let m = ExecutionStateMachine::new();
        assert!(m.transition(Waiting, Running, "resume", None).is_ok());
        assert!(m.transition(Waiting, Completed, "skip hitl", None).is_err());
    }

    #[test]
    fn running_self_transition_allowed_for_node_advance() {
        let m = ExecutionStateMachine::new();
        assert!(m.transition(Running, Running, "advance", Some("b".into())).is_ok());
    }

    #[test]
    fn history_monotonicity_rejects_gaps() {
        let m = ExecutionStateMachine::new();
        let t1 = m.transition(Ready, Running, "start", None).unwrap();
        let bad = StateTransition {
            from: Waiting,
            to: Completed,
            timestamp: chrono::Utc::now(),
            reason: "bogus".into(),
            node_id: None,
        };
        assert!(m.validate_history(&[t1, bad]).is_err());
    }
}
