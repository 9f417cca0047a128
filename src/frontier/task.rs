use crate::state::TaskState;
use crate::url::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A URL tracked by the frontier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTask {
    /// URL to fetch (as discovered, fragment removed)
    pub raw_url: String,
    pub canonical_url: String,
    pub fingerprint: Fingerprint,
    /// Politeness key
    pub host: String,
    pub depth: u32,
    pub parent: Option<Fingerprint>,
    pub priority: i32,
    pub state: TaskState,
    pub attempt_count: u32,
    pub last_error: Option<ErrorKind>,
    /// Insertion order, used to break ordering ties
    pub seq: u64,
    /// Earliest instant a retry may be dispatched
    #[serde(skip)]
    pub not_before: Option<Instant>,
}

/// Why an attempt failed
///
/// These are the only error strings surfaced to users; transport details
/// stay in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection, TLS, DNS or proxy tunnel failure
    Transport,

    /// The fetch exceeded the job's max fetch duration
    Timeout,

    /// A non-success HTTP status
    Http(u16),

    /// The URL may not be fetched under the active policy
    PolicyViolation,

    /// No proxy was available; the task is deferred, not failed
    PoolExhausted,

    /// The frontier had reached its page limit
    CapacityExceeded,
}

impl ErrorKind {
    /// Stable string form used in storage and reports
    pub fn code(&self) -> String {
        match self {
            Self::Transport => "transport".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::Http(status) => format!("http_{}", status),
            Self::PolicyViolation => "policy_violation".to_string(),
            Self::PoolExhausted => "pool_exhausted".to_string(),
            Self::CapacityExceeded => "capacity_exceeded".to_string(),
        }
    }

    /// Parses the output of [`ErrorKind::code`]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "transport" => Some(Self::Transport),
            "timeout" => Some(Self::Timeout),
            "policy_violation" => Some(Self::PolicyViolation),
            "pool_exhausted" => Some(Self::PoolExhausted),
            "capacity_exceeded" => Some(Self::CapacityExceeded),
            other => other
                .strip_prefix("http_")
                .and_then(|status| status.parse().ok())
                .map(Self::Http),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Result of one attempt, as reported to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    RetryableFailure(ErrorKind),
    FatalFailure(ErrorKind),
}

impl TaskOutcome {
    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            Self::Success => None,
            Self::RetryableFailure(kind) | Self::FatalFailure(kind) => Some(*kind),
        }
    }
}

/// Reason an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidUrl,
    Duplicate,
    DepthExceeded,
    CapacityExceeded,
    PolicyDisallowed,
}

/// Result of an enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted(Fingerprint),
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// What `Frontier::complete` did with a task
#[derive(Debug, Clone)]
pub struct Completion {
    /// The task after the transition
    pub task: UrlTask,

    /// State the attempt ended in: Done, Failed (will retry) or Abandoned
    pub attempt_state: TaskState,

    /// Discovered links accepted into the frontier
    pub admitted: usize,
}

/// An abandoned task, kept for the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonedUrl {
    pub url: String,
    pub fingerprint: Fingerprint,
    pub attempts: u32,
    pub error: Option<ErrorKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorKind::Transport.code(), "transport");
        assert_eq!(ErrorKind::Http(503).code(), "http_503");
        assert_eq!(ErrorKind::PoolExhausted.to_string(), "pool_exhausted");
    }

    #[test]
    fn test_error_code_parses_back() {
        assert_eq!(ErrorKind::from_code("http_404"), Some(ErrorKind::Http(404)));
        assert_eq!(ErrorKind::from_code("timeout"), Some(ErrorKind::Timeout));
        assert_eq!(ErrorKind::from_code("http_abc"), None);
        assert_eq!(ErrorKind::from_code("bogus"), None);
    }

    #[test]
    fn test_outcome_error() {
        assert_eq!(TaskOutcome::Success.error(), None);
        assert_eq!(
            TaskOutcome::FatalFailure(ErrorKind::Http(404)).error(),
            Some(ErrorKind::Http(404))
        );
    }

    #[test]
    fn test_error_kind_serializes_with_status() {
        let json = serde_json::to_string(&ErrorKind::Http(429)).unwrap();
        assert_eq!(json, r#"{"kind":"http","status":429}"#);
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::Http(429));
    }
}
