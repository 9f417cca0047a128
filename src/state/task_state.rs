/// Task state definitions for tracking URL progress
///
/// This module defines all states a URL task can be in during a job.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a URL task in the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting in the frontier to be dispatched
    Pending,

    /// Task has been handed to a worker and is being fetched
    InFlight,

    /// The last attempt failed and the task is headed back to Pending
    ///
    /// Only observable in completion results and attempt history; the
    /// frontier stores the task as Pending with a retry time.
    Failed,

    // ===== Terminal States =====
    /// Task was fetched successfully
    Done,

    /// Task gave up: retries exhausted or a fatal failure
    Abandoned,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Abandoned)
    }

    /// Converts the task state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a task state from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::InFlight.is_terminal());
        assert!(TaskState::Done.is_terminal());
        assert!(!TaskState::Failed.is_terminal());
        assert!(TaskState::Abandoned.is_terminal());
    }

    #[test]
    fn test_db_string_roundtrip() {
        for state in [
            TaskState::Pending,
            TaskState::InFlight,
            TaskState::Done,
            TaskState::Failed,
            TaskState::Abandoned,
        ] {
            assert_eq!(TaskState::from_db_string(state.to_db_string()), Some(state));
        }
        assert_eq!(TaskState::from_db_string("bogus"), None);
    }
}
