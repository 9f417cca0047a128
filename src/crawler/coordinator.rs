//! Job coordinator - the scheduling loop
//!
//! The coordinator owns a job's worker slots and decides, one iteration at
//! a time, which task runs next and through which proxy:
//! - ask the governor which pending hosts may be contacted
//! - take the next eligible task from the frontier
//! - get a proxy from the pool, or defer the task
//! - authorize the host and spawn the attempt
//!
//! Attempts do their own bookkeeping (see `worker`). The loop only waits,
//! dispatches, and decides when the job is over.

use crate::config::{Config, GLOBAL_MAX_WORKERS};
use crate::crawler::counters::{JobCounters, JobCounts};
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::worker::{self, AttemptContext, AttemptReport};
use crate::frontier::{Admission, Frontier, FrontierSettings};
use crate::output::{EventNotifier, JobEvent, JobReport, TracingNotifier};
use crate::policy::{PolicyProvider, RobotsPolicy};
use crate::politeness::{PolitenessGovernor, PolitenessSettings};
use crate::proxy::{ProxyConstraints, ProxyPool};
use crate::state::JobStatus;
use crate::storage::{JobRecord, JobSnapshot, JobStore, SqliteJobStore};
use crate::url::Canonicalizer;
use crate::SumiError;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Longest the loop sleeps before looking again
const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

const ACCEPT_HEADER: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

/// Runs one job over a frontier, a politeness governor and a proxy pool
pub struct Coordinator {
    job_id: String,
    config: Arc<Config>,
    config_hash: Option<String>,
    frontier: Arc<Frontier>,
    governor: Arc<PolitenessGovernor>,
    pool: Arc<ProxyPool>,
    fetcher: Arc<dyn Fetcher>,
    policy: Option<Arc<dyn PolicyProvider>>,
    store: Option<Arc<dyn JobStore>>,
    notifier: Option<Arc<dyn EventNotifier>>,
    counters: Arc<JobCounters>,
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
    started: OnceLock<Instant>,
    resumed: bool,
}

impl Coordinator {
    /// Creates a coordinator for a new job
    ///
    /// The pool may be shared with other coordinators.
    pub fn new(config: Config, pool: Arc<ProxyPool>, fetcher: Arc<dyn Fetcher>) -> Self {
        let canonicalizer = Canonicalizer::from_config(&config.canonical);
        let frontier = Frontier::new(FrontierSettings::from_config(&config.job), canonicalizer);
        let governor =
            PolitenessGovernor::new(PolitenessSettings::from_config(&config.politeness));
        let (status, _) = watch::channel(JobStatus::Queued);

        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            config: Arc::new(config),
            config_hash: None,
            frontier: Arc::new(frontier),
            governor: Arc::new(governor),
            pool,
            fetcher,
            policy: None,
            store: None,
            notifier: None,
            counters: Arc::new(JobCounters::default()),
            cancel: CancellationToken::new(),
            status,
            started: OnceLock::new(),
            resumed: false,
        }
    }

    /// Creates a coordinator with the default collaborators
    ///
    /// - a pool of the configured proxies
    /// - the reqwest fetcher
    /// - the SQLite store at `database-path`
    /// - robots.txt when `respect-robots` is set
    /// - events as log lines
    pub fn from_config(config: Config) -> Result<Self, SumiError> {
        let pool = Arc::new(ProxyPool::from_config(&config.proxy));
        let fetcher = Arc::new(HttpFetcher::new(
            config.user_agent.clone(),
            Duration::from_millis(config.job.max_fetch_duration_ms),
        ));
        let store = Arc::new(SqliteJobStore::new(Path::new(&config.output.database_path))?);

        let policy = if config.politeness.respect_robots {
            let canonicalizer = Canonicalizer::from_config(&config.canonical);
            Some(RobotsPolicy::new(&config.user_agent, canonicalizer)?)
        } else {
            None
        };

        let mut coordinator = Self::new(config, pool, fetcher)
            .with_store(store)
            .with_notifier(Arc::new(TracingNotifier));
        if let Some(policy) = policy {
            coordinator = coordinator.with_policy(Arc::new(policy));
        }
        Ok(coordinator)
    }

    /// Consults `policy` at enqueue, dispatch and host setup
    ///
    /// Rebuilds the frontier and governor, so call it before `restore`.
    pub fn with_policy(mut self, policy: Arc<dyn PolicyProvider>) -> Self {
        let frontier = Frontier::new(
            self.frontier.settings().clone(),
            self.frontier.canonicalizer().clone(),
        );
        let governor = PolitenessGovernor::new(self.governor.settings().clone());

        self.frontier = Arc::new(frontier.with_policy(Arc::clone(&policy)));
        self.governor = Arc::new(governor.with_policy(Arc::clone(&policy)));
        self.policy = Some(policy);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    /// Hash of the configuration file, stored with the job
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Continues the job a snapshot was taken from
    ///
    /// Seeds are not enqueued again. Tasks that were in flight when the
    /// snapshot was taken are dispatched again.
    pub fn restore(mut self, snapshot: JobSnapshot) -> Self {
        if let (Some(saved), Some(current)) = (&snapshot.config_hash, &self.config_hash) {
            if saved != current {
                warn!(
                    "Snapshot of job {} was taken with a different configuration",
                    snapshot.job_id
                );
            }
        }

        info!(
            "Resuming job {} with {} task(s), {} URL(s) seen",
            snapshot.job_id,
            snapshot.frontier.tasks.len(),
            snapshot.frontier.seen.len()
        );
        self.frontier.restore(snapshot.frontier);
        self.pool.restore_at(snapshot.proxies, Instant::now());
        self.job_id = snapshot.job_id;
        self.resumed = true;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Token that cancels the job when triggered
    ///
    /// In-flight attempts finish; nothing new is dispatched.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Watches status transitions
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn governor(&self) -> &Arc<PolitenessGovernor> {
        &self.governor
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn counts(&self) -> JobCounts {
        self.counters.snapshot()
    }

    pub fn report(&self) -> JobReport {
        JobReport {
            job_id: self.job_id.clone(),
            status: self.status(),
            counts: self.counts(),
            frontier: self.frontier.stats(),
            pool: self.pool.health(),
            abandoned: self.frontier.abandoned(),
            elapsed: self.started.get().map(|s| s.elapsed()).unwrap_or_default(),
        }
    }

    /// Captures what is needed to resume this job later
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::new(
            self.job_id.clone(),
            self.config_hash.clone(),
            self.frontier.snapshot(),
            self.pool.snapshot_at(Instant::now()),
        )
    }

    /// Runs the job to completion, cancellation or failure
    ///
    /// Returns the final report, or the error that failed the job. The
    /// status is Failed in the error case.
    pub async fn run(&self) -> Result<JobReport, SumiError> {
        let _ = self.started.set(Instant::now());
        let started_at = Utc::now().to_rfc3339();

        self.persist_job(&started_at, None);
        self.emit(JobEvent::JobStarted {
            job_id: self.job_id.clone(),
            seeds: self.config.job.seeds.len(),
            resumed: self.resumed,
        });
        info!(
            "Starting job {} ({} seeds, {} proxies)",
            self.job_id,
            self.config.job.seeds.len(),
            self.pool.len()
        );

        if !self.resumed {
            if let Err(e) = self.seed().await {
                return Err(self.fail(&started_at, e));
            }
        }

        match self.schedule(&started_at).await {
            Ok(status) => {
                self.finish(status, &started_at);
                Ok(self.report())
            }
            Err(e) => Err(self.fail(&started_at, e)),
        }
    }

    async fn seed(&self) -> Result<(), SumiError> {
        let mut accepted = 0;
        for seed in &self.config.job.seeds {
            if let (Some(policy), Ok(url)) = (&self.policy, Url::parse(seed)) {
                policy.prepare(&url).await;
            }
            match self.frontier.enqueue(seed, 0, None, 0) {
                Admission::Accepted(_) => accepted += 1,
                Admission::Rejected(reason) => warn!("Seed {} rejected: {:?}", seed, reason),
            }
        }

        if accepted == 0 {
            return Err(SumiError::InvalidSeeds);
        }
        Ok(())
    }

    async fn schedule(&self, started_at: &str) -> Result<JobStatus, SumiError> {
        let workers = self.config.job.max_concurrency.clamp(1, GLOBAL_MAX_WORKERS);
        let rotation = self.config.proxy.rotation;
        let watchdog = Duration::from_millis(self.config.job.watchdog_timeout_ms);
        let constraints = ProxyConstraints::default();
        let ctx = Arc::new(self.attempt_context());

        let mut attempts: JoinSet<AttemptReport> = JoinSet::new();
        // Hosts passed over until the next wait
        let mut skipped: HashSet<String> = HashSet::new();
        // Hosts already reported as out of proxies in this stall
        let mut exhausted: HashSet<String> = HashSet::new();
        let mut stalled_since: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(
                    "Job {} cancelled, waiting for {} attempt(s)",
                    self.job_id,
                    attempts.len()
                );
                while let Some(joined) = attempts.join_next().await {
                    self.reap(joined);
                }
                return Ok(JobStatus::Cancelled);
            }

            while let Some(joined) = attempts.try_join_next() {
                self.reap(joined);
            }

            if attempts.is_empty() && self.frontier.is_exhausted() {
                return Ok(JobStatus::Completed);
            }

            if attempts.len() >= workers {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {}
                    Some(joined) = attempts.join_next() => self.reap(joined),
                }
                continue;
            }

            let now = Instant::now();
            let hosts: Vec<String> = self
                .frontier
                .pending_hosts()
                .into_iter()
                .filter(|h| !skipped.contains(h))
                .collect();
            let eligible = self.governor.eligible_hosts(&hosts, now);
            let candidate = if eligible.is_empty() {
                None
            } else {
                self.frontier
                    .dequeue_candidate_at(now, |host| eligible.contains(host))
            };

            let Some(task) = candidate else {
                let deadline = stalled_since.map(|since| since + watchdog);
                let wake = self.next_wake(now, &hosts, !exhausted.is_empty(), deadline);
                skipped.clear();
                trace!(
                    "Nothing to dispatch, waiting up to {:?}",
                    wake.saturating_duration_since(now)
                );

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {}
                    Some(joined) = attempts.join_next() => self.reap(joined),
                    _ = self.frontier.notified() => {}
                    _ = tokio::time::sleep_until(wake.into()) => {}
                }
                continue;
            };

            let Some(proxy) = self.pool.get_proxy(rotation, &constraints) else {
                self.frontier.release(&task.fingerprint);
                JobCounters::bump(&self.counters.proxy_stalls);
                if exhausted.insert(task.host.clone()) {
                    warn!("No proxy available for {}", task.host);
                    self.emit(JobEvent::HostProxiesExhausted {
                        job_id: self.job_id.clone(),
                        host: task.host.clone(),
                    });
                }
                skipped.insert(task.host);

                if attempts.is_empty() {
                    let since = *stalled_since.get_or_insert(now);
                    let waited = now.duration_since(since);
                    if waited >= watchdog {
                        return Err(SumiError::Deadlock {
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                } else {
                    stalled_since = None;
                }
                continue;
            };
            stalled_since = None;
            exhausted.clear();

            if self.cancel.is_cancelled() {
                self.frontier.release(&task.fingerprint);
                self.pool.release_unused(&proxy);
                continue;
            }

            if !self.governor.acquire(&task.host) {
                self.frontier.release(&task.fingerprint);
                self.pool.release_unused(&proxy);
                JobCounters::bump(&self.counters.acquire_races);
                skipped.insert(task.host);
                continue;
            }

            if self.set_status(JobStatus::Running) {
                self.persist_job(started_at, None);
            }
            JobCounters::bump(&self.counters.dispatched);
            debug!(
                "Dispatching {} (depth {}, attempt {}) via {}",
                task.raw_url,
                task.depth,
                task.attempt_count + 1,
                proxy.id
            );
            attempts.spawn(worker::supervise(Arc::clone(&ctx), task, proxy));
        }
    }

    /// Earliest moment something could become dispatchable
    fn next_wake(
        &self,
        now: Instant,
        hosts: &[String],
        stalled: bool,
        deadline: Option<Instant>,
    ) -> Instant {
        let mut wake = now + MAX_IDLE_WAIT;
        if let Some(delay) = self.governor.next_eligible_in(hosts, now) {
            wake = wake.min(now + delay);
        }
        if let Some(at) = self.frontier.next_retry_at(now) {
            wake = wake.min(at);
        }
        if stalled {
            if let Some(at) = self.pool.next_unban_at(now) {
                wake = wake.min(at);
            }
        }
        if let Some(at) = deadline {
            wake = wake.min(at);
        }
        wake
    }

    fn attempt_context(&self) -> AttemptContext {
        AttemptContext {
            job_id: self.job_id.clone(),
            frontier: Arc::clone(&self.frontier),
            governor: Arc::clone(&self.governor),
            pool: Arc::clone(&self.pool),
            fetcher: Arc::clone(&self.fetcher),
            policy: self.policy.clone(),
            store: self.store.clone(),
            counters: Arc::clone(&self.counters),
            rate_limit: self.config.job.rate_limit_policy,
            max_fetch_duration: Duration::from_millis(self.config.job.max_fetch_duration_ms),
            headers: vec![("Accept".to_string(), ACCEPT_HEADER.to_string())],
        }
    }

    fn reap(&self, joined: Result<AttemptReport, JoinError>) {
        match joined {
            Ok(report) => trace!("Attempt for {} finished: {:?}", report.url, report.state),
            Err(e) => error!("Attempt supervisor failed: {}", e),
        }
    }

    fn set_status(&self, next: JobStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self, status: JobStatus, started_at: &str) {
        self.set_status(status);
        self.persist_end(started_at);

        let counts = self.counts();
        info!(
            "Job {} {}: {} succeeded, {} abandoned, {} retries in {:?}",
            self.job_id,
            status,
            counts.succeeded,
            counts.abandoned,
            counts.retried,
            self.report().elapsed
        );

        let job_id = self.job_id.clone();
        match status {
            JobStatus::Cancelled => self.emit(JobEvent::JobCancelled { job_id, counts }),
            _ => self.emit(JobEvent::JobCompleted { job_id, counts }),
        }
    }

    fn fail(&self, started_at: &str, error: SumiError) -> SumiError {
        error!("Job {} failed: {}", self.job_id, error);
        self.set_status(JobStatus::Failed);
        self.persist_end(started_at);
        self.emit(JobEvent::JobFailed {
            job_id: self.job_id.clone(),
            reason: error.to_string(),
        });
        error
    }

    fn persist_end(&self, started_at: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_proxies(&self.pool.records()) {
                warn!("Failed to save proxy table: {}", e);
            }
        }
        self.persist_job(started_at, Some(Utc::now().to_rfc3339()));
    }

    fn persist_job(&self, started_at: &str, finished_at: Option<String>) {
        let Some(store) = &self.store else {
            return;
        };

        let record = JobRecord {
            id: self.job_id.clone(),
            status: self.status(),
            config_hash: self.config_hash.clone(),
            started_at: started_at.to_string(),
            counts: finished_at.as_ref().map(|_| self.counts()),
            finished_at,
        };
        if let Err(e) = store.record_job(&record) {
            warn!("Failed to record job {}: {}", self.job_id, e);
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&event);
        }
    }
}
