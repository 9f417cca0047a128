use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live job counters, shared by the scheduler and attempt tasks
#[derive(Debug, Default)]
pub struct JobCounters {
    pub(crate) dispatched: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) abandoned: AtomicU64,
    pub(crate) timeouts: AtomicU64,
    pub(crate) discovered: AtomicU64,
    pub(crate) proxy_stalls: AtomicU64,
    pub(crate) acquire_races: AtomicU64,
}

impl JobCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobCounts {
        JobCounts {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            proxy_stalls: self.proxy_stalls.load(Ordering::Relaxed),
            acquire_races: self.acquire_races.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`JobCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Attempts handed to the fetcher (or the policy check)
    pub dispatched: u64,
    /// Attempts that ended Done
    pub succeeded: u64,
    /// Attempts that failed and were scheduled again
    pub retried: u64,
    /// Tasks given up on
    pub abandoned: u64,
    /// Attempts cut off at the fetch deadline
    pub timeouts: u64,
    /// Discovered links admitted to the frontier
    pub discovered: u64,
    /// Dispatches deferred because no proxy was available
    pub proxy_stalls: u64,
    /// Dispatches deferred because the host filled up first
    pub acquire_races: u64,
}

impl JobCounts {
    /// Attempts whose result is known
    pub fn finished(&self) -> u64 {
        self.succeeded + self.retried + self.abandoned
    }
}
