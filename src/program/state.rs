//! Executor run state.

use serde::{Deserialize, Serialize};

/// Lifecycle of a [`ProgramExecutor`](super::ProgramExecutor).
///
/// ```text
/// Idle ──start──> Running ──stop──────────> Stopped
///                    │
///                    └──loop count reached──> Completed
/// ```
///
/// `Stopped` and `Completed` both allow a new `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    /// No run has started yet.
    Idle,
    /// Playback in progress.
    Running,
    /// Terminated by `stop()`.
    Stopped,
    /// Terminated after the requested number of iterations.
    Completed,
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorState::Idle => write!(f, "Idle"),
            ExecutorState::Running => write!(f, "Running"),
            ExecutorState::Stopped => write!(f, "Stopped"),
            ExecutorState::Completed => write!(f, "Completed"),
        }
    }
}

impl ExecutorState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        !matches!(self, ExecutorState::Running)
    }

    /// Check if the state is terminal for the last run.
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutorState::Stopped | ExecutorState::Completed)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// `stop()` was requested.
    Stopped,
    /// The loop count was reached.
    Completed,
}

impl From<RunOutcome> for ExecutorState {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Stopped => ExecutorState::Stopped,
            RunOutcome::Completed => ExecutorState::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert!(ExecutorState::Idle.can_begin());
        assert!(!ExecutorState::Running.can_begin());
        assert!(ExecutorState::Completed.can_begin());
        assert!(ExecutorState::Stopped.is_finished());
        assert!(!ExecutorState::Idle.is_finished());
        assert_eq!(ExecutorState::from(RunOutcome::Stopped), ExecutorState::Stopped);
        assert_eq!(ExecutorState::Running.to_string(), "Running");
    }
}
