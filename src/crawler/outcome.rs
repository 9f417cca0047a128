//! Mapping fetch results onto the three collaborators
//!
//! | Result | Task | Proxy | Host |
//! |--------|------|-------|------|
//! | 2xx/3xx | Success | ok | Success |
//! | 429 | Retryable | neutral, or failure under `rotate-proxy` | RateLimited |
//! | 407 | Retryable | failure | Neutral |
//! | 503 | Retryable | failure | RateLimited |
//! | other 5xx | Retryable | failure | Neutral |
//! | other 4xx | Fatal | ok | Neutral |
//! | transport error | Retryable | failure | Unreachable |
//! | timeout | Retryable | failure | Unreachable |

use crate::config::RateLimitPolicy;
use crate::crawler::fetcher::{FetchError, FetchResponse};
use crate::frontier::{ErrorKind, TaskOutcome};
use crate::politeness::HostSignal;
use crate::proxy::ProxyOutcome;

/// How one attempt is reported to the frontier, the pool and the governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub outcome: TaskOutcome,

    /// What the attempt says about the proxy; None if it was never used
    pub proxy: Option<ProxyOutcome>,

    pub host: HostSignal,
}

impl Classification {
    /// The fetch did not finish within the job's fetch deadline
    pub fn timeout() -> Self {
        Self {
            outcome: TaskOutcome::RetryableFailure(ErrorKind::Timeout),
            proxy: Some(ProxyOutcome::Failure),
            host: HostSignal::Unreachable,
        }
    }

    /// The URL was refused before any request was made
    pub fn disallowed() -> Self {
        Self {
            outcome: TaskOutcome::FatalFailure(ErrorKind::PolicyViolation),
            proxy: None,
            host: HostSignal::Neutral,
        }
    }

    /// Classifies an HTTP status
    pub fn from_status(status: u16, rate_limit: RateLimitPolicy) -> Self {
        let retry = TaskOutcome::RetryableFailure(ErrorKind::Http(status));
        let (outcome, proxy, host) = match status {
            0..=399 => (TaskOutcome::Success, ProxyOutcome::Success, HostSignal::Success),
            429 => {
                let proxy = match rate_limit {
                    RateLimitPolicy::Backoff => ProxyOutcome::Neutral,
                    RateLimitPolicy::RotateProxy => ProxyOutcome::Failure,
                };
                (retry, proxy, HostSignal::RateLimited)
            }
            407 => (retry, ProxyOutcome::Failure, HostSignal::Neutral),
            503 => (retry, ProxyOutcome::Failure, HostSignal::RateLimited),
            500..=599 => (retry, ProxyOutcome::Failure, HostSignal::Neutral),
            _ => (
                TaskOutcome::FatalFailure(ErrorKind::Http(status)),
                ProxyOutcome::Success,
                HostSignal::Neutral,
            ),
        };

        Self {
            outcome,
            proxy: Some(proxy),
            host,
        }
    }

    /// Classifies what the fetcher returned
    pub fn from_fetch(result: &Result<FetchResponse, FetchError>, rate_limit: RateLimitPolicy) -> Self {
        match result {
            Ok(response) => Self::from_status(response.status_code, rate_limit),
            Err(FetchError::Timeout) => Self::timeout(),
            Err(FetchError::Transport(_) | FetchError::Proxy(_)) => Self {
                outcome: TaskOutcome::RetryableFailure(ErrorKind::Transport),
                proxy: Some(ProxyOutcome::Failure),
                host: HostSignal::Unreachable,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Classification {
        Classification::from_status(code, RateLimitPolicy::Backoff)
    }

    #[test]
    fn test_success_and_redirects() {
        for code in [200, 204, 301, 304] {
            let c = status(code);
            assert_eq!(c.outcome, TaskOutcome::Success);
            assert_eq!(c.proxy, Some(ProxyOutcome::Success));
            assert_eq!(c.host, HostSignal::Success);
        }
    }

    #[test]
    fn test_client_errors_are_fatal() {
        let c = status(404);
        assert_eq!(c.outcome, TaskOutcome::FatalFailure(ErrorKind::Http(404)));
        assert_eq!(c.proxy, Some(ProxyOutcome::Success));
    }

    #[test]
    fn test_server_errors_blame_proxy() {
        let c = status(502);
        assert_eq!(c.outcome, TaskOutcome::RetryableFailure(ErrorKind::Http(502)));
        assert_eq!(c.proxy, Some(ProxyOutcome::Failure));
        assert_eq!(c.host, HostSignal::Neutral);

        assert_eq!(status(503).host, HostSignal::RateLimited);
        assert_eq!(status(407).proxy, Some(ProxyOutcome::Failure));
        assert!(matches!(status(407).outcome, TaskOutcome::RetryableFailure(_)));
    }

    #[test]
    fn test_rate_limit_policy() {
        let backoff = Classification::from_status(429, RateLimitPolicy::Backoff);
        assert_eq!(backoff.proxy, Some(ProxyOutcome::Neutral));
        assert_eq!(backoff.host, HostSignal::RateLimited);

        let rotate = Classification::from_status(429, RateLimitPolicy::RotateProxy);
        assert_eq!(rotate.proxy, Some(ProxyOutcome::Failure));
        assert_eq!(rotate.outcome, backoff.outcome);
    }

    #[test]
    fn test_fetch_errors() {
        let transport = Classification::from_fetch(
            &Err(FetchError::Transport("connection refused".to_string())),
            RateLimitPolicy::Backoff,
        );
        assert_eq!(
            transport.outcome,
            TaskOutcome::RetryableFailure(ErrorKind::Transport)
        );
        assert_eq!(transport.host, HostSignal::Unreachable);

        let timeout = Classification::from_fetch(&Err(FetchError::Timeout), RateLimitPolicy::Backoff);
        assert_eq!(timeout, Classification::timeout());
    }

    #[test]
    fn test_disallowed_never_touches_proxy() {
        let c = Classification::disallowed();
        assert_eq!(c.proxy, None);
        assert_eq!(
            c.outcome,
            TaskOutcome::FatalFailure(ErrorKind::PolicyViolation)
        );
    }
}
