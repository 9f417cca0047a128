//! The URL frontier
//!
//! Holds every task a job has accepted, in dispatch order, and enforces
//! dedup, the depth bound, the page limit and the retry bound. All
//! operations take `&self` and are safe to call from many tasks at once.
//!
//! Tasks live in a `DashMap` keyed by fingerprint. The dispatch order is a
//! single short-lived `Mutex<ReadyQueue>`; it is never held while calling
//! out to another component.

mod queue;
mod task;

pub use queue::CrawlStrategy;
pub use task::{
    AbandonedUrl, Admission, Completion, ErrorKind, RejectReason, TaskOutcome, UrlTask,
};

use crate::config::JobConfig;
use crate::policy::PolicyProvider;
use crate::state::TaskState;
use crate::url::{Canonicalizer, Fingerprint};
use dashmap::{DashMap, DashSet};
use queue::{ReadyEntry, ReadyQueue};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Limits and ordering for a frontier
#[derive(Debug, Clone)]
pub struct FrontierSettings {
    pub strategy: CrawlStrategy,
    pub max_depth: u32,
    pub max_pages: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl FrontierSettings {
    pub fn from_config(job: &JobConfig) -> Self {
        Self {
            strategy: job.strategy,
            max_depth: job.max_depth,
            max_pages: job.max_pages,
            max_retries: job.max_retries,
            retry_backoff: Duration::from_millis(job.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(job.max_retry_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.max_retry_backoff)
    }
}

impl Default for FrontierSettings {
    fn default() -> Self {
        Self {
            strategy: CrawlStrategy::Bfs,
            max_depth: 3,
            max_pages: 10_000,
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct FrontierCounters {
    done: AtomicU64,
    abandoned: AtomicU64,
    retried: AtomicU64,
    released: AtomicU64,
    rejected_invalid: AtomicU64,
    rejected_duplicate: AtomicU64,
    rejected_depth: AtomicU64,
    rejected_capacity: AtomicU64,
    rejected_policy: AtomicU64,
}

impl FrontierCounters {
    fn rejection(&self, reason: RejectReason) -> &AtomicU64 {
        match reason {
            RejectReason::InvalidUrl => &self.rejected_invalid,
            RejectReason::Duplicate => &self.rejected_duplicate,
            RejectReason::DepthExceeded => &self.rejected_depth,
            RejectReason::CapacityExceeded => &self.rejected_capacity,
            RejectReason::PolicyDisallowed => &self.rejected_policy,
        }
    }
}

/// Point-in-time frontier counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStats {
    pub accepted: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub done: u64,
    pub abandoned: u64,
    pub retried: u64,
    pub released: u64,
    pub rejected_invalid: u64,
    pub rejected_duplicate: u64,
    pub rejected_depth: u64,
    pub rejected_capacity: u64,
    pub rejected_policy: u64,
}

/// Serializable frontier contents for resuming a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub seen: Vec<Fingerprint>,
    pub tasks: Vec<UrlTask>,
    pub accepted: usize,
    pub next_seq: u64,
}

/// Ordered, deduplicated set of a job's not-yet-fetched URLs
pub struct Frontier {
    settings: FrontierSettings,
    canonicalizer: Canonicalizer,
    policy: Option<Arc<dyn PolicyProvider>>,
    tasks: DashMap<Fingerprint, UrlTask>,
    seen: DashSet<Fingerprint>,
    ready: Mutex<ReadyQueue>,
    accepted: AtomicUsize,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
    counters: FrontierCounters,
    abandoned: Mutex<Vec<AbandonedUrl>>,
    notify: Notify,
}

impl Frontier {
    pub fn new(settings: FrontierSettings, canonicalizer: Canonicalizer) -> Self {
        Self {
            settings,
            canonicalizer,
            policy: None,
            tasks: DashMap::new(),
            seen: DashSet::new(),
            ready: Mutex::new(ReadyQueue::default()),
            accepted: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            counters: FrontierCounters::default(),
            abandoned: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Rejects URLs the policy disallows at enqueue time
    pub fn with_policy(mut self, policy: Arc<dyn PolicyProvider>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn settings(&self) -> &FrontierSettings {
        &self.settings
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Offers a URL to the frontier
    ///
    /// Never fails: every refusal is returned as a `RejectReason` and
    /// counted. Accepted tasks are stored Pending.
    pub fn enqueue(
        &self,
        url: &str,
        depth: u32,
        parent: Option<&Fingerprint>,
        priority: i32,
    ) -> Admission {
        let canonical = match self.canonicalizer.normalize(url) {
            Ok(canonical) => canonical,
            Err(e) => {
                trace!("Rejecting {}: {}", url, e);
                return self.reject(RejectReason::InvalidUrl);
            }
        };

        if depth > self.settings.max_depth {
            return self.reject(RejectReason::DepthExceeded);
        }

        if self.seen.contains(&canonical.fingerprint) {
            return self.reject(RejectReason::Duplicate);
        }

        if let Some(policy) = &self.policy {
            if !policy.is_allowed(&canonical.url) {
                debug!("Policy disallows {}", canonical.url);
                return self.reject(RejectReason::PolicyDisallowed);
            }
        }

        let max_pages = self.settings.max_pages;
        let reserved = self
            .accepted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_pages).then_some(n + 1)
            });
        if reserved.is_err() {
            return self.reject(RejectReason::CapacityExceeded);
        }

        // Lost a race with a concurrent enqueue of the same URL
        if !self.seen.insert(canonical.fingerprint.clone()) {
            self.accepted.fetch_sub(1, Ordering::SeqCst);
            return self.reject(RejectReason::Duplicate);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let fingerprint = canonical.fingerprint;
        let task = UrlTask {
            raw_url: canonical.url.to_string(),
            canonical_url: canonical.canonical,
            fingerprint: fingerprint.clone(),
            host: canonical.host,
            depth,
            parent: parent.cloned(),
            priority,
            state: TaskState::Pending,
            attempt_count: 0,
            last_error: None,
            seq,
            not_before: None,
        };

        let key = self.settings.strategy.order_key(depth, priority, seq);
        let entry = ReadyEntry {
            fingerprint: fingerprint.clone(),
            host: task.host.clone(),
            not_before: None,
        };

        trace!("Accepted {} at depth {}", task.raw_url, depth);
        self.tasks.insert(fingerprint.clone(), task);
        self.lock_ready().push(key, entry);
        self.notify.notify_one();

        Admission::Accepted(fingerprint)
    }

    /// Takes the next Pending task whose host passes `eligible`
    ///
    /// The task is marked InFlight before it is returned; concurrent
    /// callers never receive the same task.
    pub fn dequeue_candidate<F>(&self, eligible: F) -> Option<UrlTask>
    where
        F: Fn(&str) -> bool,
    {
        self.dequeue_candidate_at(Instant::now(), eligible)
    }

    /// `dequeue_candidate` with an explicit clock
    pub fn dequeue_candidate_at<F>(&self, now: Instant, eligible: F) -> Option<UrlTask>
    where
        F: Fn(&str) -> bool,
    {
        let mut ready = self.lock_ready();
        loop {
            let entry = ready.pop_first_matching(now, &eligible)?;
            let Some(mut task) = self.tasks.get_mut(&entry.fingerprint) else {
                continue;
            };
            if task.state != TaskState::Pending {
                continue;
            }

            task.state = TaskState::InFlight;
            task.not_before = None;
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            return Some(task.clone());
        }
    }

    /// Records the result of an InFlight task's attempt
    ///
    /// Returns None, changing nothing, when the task is not InFlight. On
    /// success, `discovered` links are enqueued one level deeper with a
    /// priority one below the parent's.
    pub fn complete(
        &self,
        fingerprint: &Fingerprint,
        outcome: TaskOutcome,
        discovered: &[String],
    ) -> Option<Completion> {
        self.complete_at(Instant::now(), fingerprint, outcome, discovered)
    }

    /// `complete` with an explicit clock
    pub fn complete_at(
        &self,
        now: Instant,
        fingerprint: &Fingerprint,
        outcome: TaskOutcome,
        discovered: &[String],
    ) -> Option<Completion> {
        let (task, attempt_state) = {
            let mut task = self.tasks.get_mut(fingerprint)?;
            if task.state != TaskState::InFlight {
                return None;
            }

            let attempt_state = match outcome {
                TaskOutcome::Success => TaskState::Done,
                TaskOutcome::RetryableFailure(kind) => {
                    task.attempt_count += 1;
                    task.last_error = Some(kind);
                    if task.attempt_count < self.settings.max_retries {
                        TaskState::Failed
                    } else {
                        TaskState::Abandoned
                    }
                }
                TaskOutcome::FatalFailure(kind) => {
                    task.attempt_count += 1;
                    task.last_error = Some(kind);
                    TaskState::Abandoned
                }
            };

            task.state = match attempt_state {
                TaskState::Failed => {
                    task.not_before = Some(now + self.settings.retry_delay(task.attempt_count));
                    TaskState::Pending
                }
                terminal => terminal,
            };

            (task.clone(), attempt_state)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match attempt_state {
            TaskState::Failed => {
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Retrying {} after attempt {} ({:?})",
                    task.raw_url, task.attempt_count, task.last_error
                );
                self.push_ready(&task);
            }
            TaskState::Abandoned => {
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                self.tasks.remove(fingerprint);
                debug!(
                    "Abandoned {} after {} attempt(s)",
                    task.raw_url, task.attempt_count
                );
                self.lock_abandoned().push(AbandonedUrl {
                    url: task.raw_url.clone(),
                    fingerprint: fingerprint.clone(),
                    attempts: task.attempt_count,
                    error: task.last_error,
                });
            }
            _ => {
                self.counters.done.fetch_add(1, Ordering::Relaxed);
                self.tasks.remove(fingerprint);
            }
        }

        let admitted = if attempt_state == TaskState::Done {
            let child_priority = task.priority.saturating_sub(1);
            discovered
                .iter()
                .filter(|link| {
                    self.enqueue(link, task.depth + 1, Some(fingerprint), child_priority)
                        .is_accepted()
                })
                .count()
        } else {
            0
        };

        self.notify.notify_one();

        Some(Completion {
            task,
            attempt_state,
            admitted,
        })
    }

    /// Returns an InFlight task to Pending without charging an attempt
    ///
    /// Used when the task could not be dispatched (no proxy, or the host
    /// stopped being eligible).
    pub fn release(&self, fingerprint: &Fingerprint) -> bool {
        let task = {
            let Some(mut task) = self.tasks.get_mut(fingerprint) else {
                return false;
            };
            if task.state != TaskState::InFlight {
                return false;
            }
            task.state = TaskState::Pending;
            task.clone()
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        // No notify: the scheduler that released it already knows
        self.push_ready(&task);
        true
    }

    /// Hosts with at least one Pending task
    pub fn pending_hosts(&self) -> Vec<String> {
        self.lock_ready().hosts()
    }

    /// Earliest retry instant among tasks still backing off
    pub fn next_retry_at(&self, now: Instant) -> Option<Instant> {
        self.lock_ready().next_retry_at(now)
    }

    /// Whether a Pending task is past its retry time
    pub fn has_ready(&self, now: Instant) -> bool {
        self.lock_ready().has_ready(now)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_ready().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// No Pending and no InFlight tasks remain
    pub fn is_exhausted(&self) -> bool {
        self.in_flight_count() == 0 && self.lock_ready().is_empty()
    }

    /// Whether the fingerprint was ever accepted
    pub fn has_seen(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Current copy of an active (Pending or InFlight) task
    pub fn task(&self, fingerprint: &Fingerprint) -> Option<UrlTask> {
        self.tasks.get(fingerprint).map(|t| t.clone())
    }

    /// Resolves on the next enqueue or completion
    ///
    /// A wake-up that happened while nobody was waiting is kept, so the
    /// next call returns immediately.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn abandoned(&self) -> Vec<AbandonedUrl> {
        self.lock_abandoned().clone()
    }

    pub fn stats(&self) -> FrontierStats {
        let c = &self.counters;
        FrontierStats {
            accepted: self.accepted_count(),
            pending: self.pending_count(),
            in_flight: self.in_flight_count(),
            done: c.done.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            rejected_invalid: c.rejected_invalid.load(Ordering::Relaxed),
            rejected_duplicate: c.rejected_duplicate.load(Ordering::Relaxed),
            rejected_depth: c.rejected_depth.load(Ordering::Relaxed),
            rejected_capacity: c.rejected_capacity.load(Ordering::Relaxed),
            rejected_policy: c.rejected_policy.load(Ordering::Relaxed),
        }
    }

    /// Captures the seen set and every active task
    pub fn snapshot(&self) -> FrontierSnapshot {
        let mut tasks: Vec<UrlTask> = self.tasks.iter().map(|t| t.value().clone()).collect();
        tasks.sort_by_key(|t| t.seq);

        let mut seen: Vec<Fingerprint> = self.seen.iter().map(|f| f.key().clone()).collect();
        seen.sort();

        FrontierSnapshot {
            seen,
            tasks,
            accepted: self.accepted_count(),
            next_seq: self.next_seq.load(Ordering::SeqCst),
        }
    }

    /// Loads a snapshot into a freshly built frontier
    ///
    /// InFlight tasks come back as Pending and retry delays are dropped.
    pub fn restore(&self, snapshot: FrontierSnapshot) {
        for fingerprint in snapshot.seen {
            self.seen.insert(fingerprint);
        }

        let mut max_seq = snapshot.next_seq;
        for mut task in snapshot.tasks {
            if task.state.is_terminal() {
                continue;
            }
            task.state = TaskState::Pending;
            task.not_before = None;
            max_seq = max_seq.max(task.seq + 1);
            self.seen.insert(task.fingerprint.clone());
            self.push_ready(&task);
            self.tasks.insert(task.fingerprint.clone(), task);
        }

        self.accepted
            .store(snapshot.accepted.max(self.seen.len()), Ordering::SeqCst);
        self.next_seq.store(max_seq, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn push_ready(&self, task: &UrlTask) {
        let key = self
            .settings
            .strategy
            .order_key(task.depth, task.priority, task.seq);
        self.lock_ready().push(
            key,
            ReadyEntry {
                fingerprint: task.fingerprint.clone(),
                host: task.host.clone(),
                not_before: task.not_before,
            },
        );
    }

    fn reject(&self, reason: RejectReason) -> Admission {
        self.counters
            .rejection(reason)
            .fetch_add(1, Ordering::Relaxed);
        Admission::Rejected(reason)
    }

    fn lock_ready(&self) -> MutexGuard<'_, ReadyQueue> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_abandoned(&self) -> MutexGuard<'_, Vec<AbandonedUrl>> {
        self.abandoned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
