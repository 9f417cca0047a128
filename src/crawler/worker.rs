//! One fetch attempt, from dispatch to bookkeeping
//!
//! An attempt always finishes its bookkeeping, even when the job is being
//! cancelled: host release, proxy report, frontier completion, store write.
//! The host slot and proxy lease live in an `AttemptGuard`, so each is
//! given back exactly once even if the attempt panics part way through.

use crate::config::RateLimitPolicy;
use crate::crawler::counters::JobCounters;
use crate::crawler::fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::crawler::outcome::Classification;
use crate::frontier::{ErrorKind, Frontier, TaskOutcome, UrlTask};
use crate::policy::PolicyProvider;
use crate::politeness::{HostSignal, PolitenessGovernor};
use crate::proxy::{ProxyOutcome, ProxyPool, ProxyRecord};
use crate::state::TaskState;
use crate::storage::{JobStore, UrlOutcomeRecord};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

/// Everything an attempt needs, shared by all attempts of a job
pub(crate) struct AttemptContext {
    pub job_id: String,
    pub frontier: Arc<Frontier>,
    pub governor: Arc<PolitenessGovernor>,
    pub pool: Arc<ProxyPool>,
    pub fetcher: Arc<dyn Fetcher>,
    pub policy: Option<Arc<dyn PolicyProvider>>,
    pub store: Option<Arc<dyn JobStore>>,
    pub counters: Arc<JobCounters>,
    pub rate_limit: RateLimitPolicy,
    pub max_fetch_duration: Duration,
    pub headers: Vec<(String, String)>,
}

/// What an attempt ended as
#[derive(Debug, Clone)]
pub(crate) struct AttemptReport {
    pub url: String,
    /// None if the frontier no longer tracked the task as InFlight
    pub state: Option<TaskState>,
}

/// How far the attempt got
enum Fetched {
    /// Refused before any request was made
    Disallowed,
    Response(Result<FetchResponse, FetchError>),
    TimedOut,
}

/// Host slot and proxy lease held by one attempt
///
/// Whatever is still held on drop is given back unused.
struct AttemptGuard {
    ctx: Arc<AttemptContext>,
    host: String,
    proxy: ProxyRecord,
    host_held: bool,
    proxy_held: bool,
}

impl AttemptGuard {
    fn new(ctx: &Arc<AttemptContext>, task: &UrlTask, proxy: &ProxyRecord) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            host: task.host.clone(),
            proxy: proxy.clone(),
            host_held: true,
            proxy_held: true,
        }
    }

    fn release_host(&mut self, signal: HostSignal) {
        if std::mem::take(&mut self.host_held) {
            self.ctx.governor.release(&self.host);
            self.ctx.governor.record_outcome(&self.host, signal);
        }
    }

    fn settle_proxy(&mut self, outcome: Option<ProxyOutcome>, latency_ms: u64) {
        if !std::mem::take(&mut self.proxy_held) {
            return;
        }
        match outcome {
            Some(outcome) => {
                self.ctx.pool.report_outcome(&self.proxy, outcome, latency_ms);
            }
            None => self.ctx.pool.release_unused(&self.proxy),
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if self.host_held {
            warn!("Attempt on {} ended without releasing its slot", self.host);
            self.ctx.governor.release(&self.host);
        }
        if self.proxy_held {
            self.ctx.pool.release_unused(&self.proxy);
        }
    }
}

/// Runs an attempt on its own task and cleans up if it panics
///
/// The attempt's guard has already given back the host slot and proxy by
/// the time the panic is seen here. A task still InFlight is completed as
/// a transport failure; one the attempt already completed is left alone.
pub(crate) async fn supervise(ctx: Arc<AttemptContext>, task: UrlTask, proxy: ProxyRecord) -> AttemptReport {
    let fingerprint = task.fingerprint.clone();
    let url = task.raw_url.clone();

    let handle = tokio::spawn(run_attempt(Arc::clone(&ctx), task, proxy));
    match handle.await {
        Ok(report) => report,
        Err(e) => {
            error!("Attempt for {} failed to finish: {}", url, e);
            let completion = ctx.frontier.complete(
                &fingerprint,
                TaskOutcome::RetryableFailure(ErrorKind::Transport),
                &[],
            );
            if let Some(completion) = &completion {
                tally(&ctx, completion.attempt_state);
            }
            AttemptReport {
                url,
                state: completion.map(|c| c.attempt_state),
            }
        }
    }
}

pub(crate) async fn run_attempt(ctx: Arc<AttemptContext>, task: UrlTask, proxy: ProxyRecord) -> AttemptReport {
    let mut guard = AttemptGuard::new(&ctx, &task, &proxy);
    let started = Instant::now();
    let fetched = fetch(&ctx, &task, &proxy).await;

    let classification = match &fetched {
        Fetched::Disallowed => Classification::disallowed(),
        Fetched::Response(result) => Classification::from_fetch(result, ctx.rate_limit),
        Fetched::TimedOut => Classification::timeout(),
    };
    let (status_code, elapsed_ms, links) = match fetched {
        Fetched::Response(Ok(response)) => (
            Some(response.status_code),
            response.elapsed_ms,
            response.discovered_links,
        ),
        Fetched::Response(Err(e)) => {
            debug!("Fetch of {} via {} failed: {}", task.raw_url, proxy.id, e);
            (None, started.elapsed().as_millis() as u64, Vec::new())
        }
        Fetched::Disallowed | Fetched::TimedOut => {
            (None, started.elapsed().as_millis() as u64, Vec::new())
        }
    };

    guard.release_host(classification.host);
    guard.settle_proxy(classification.proxy, elapsed_ms);

    if classification.outcome == TaskOutcome::Success {
        prepare_links(&ctx, &links).await;
    }

    let Some(completion) = ctx.frontier.complete(&task.fingerprint, classification.outcome, &links) else {
        warn!("Completion for {} ignored: task no longer in flight", task.raw_url);
        return AttemptReport {
            url: task.raw_url,
            state: None,
        };
    };

    tally(&ctx, completion.attempt_state);
    ctx.counters
        .discovered
        .fetch_add(completion.admitted as u64, Ordering::Relaxed);
    if classification.outcome.error() == Some(ErrorKind::Timeout) {
        JobCounters::bump(&ctx.counters.timeouts);
    }

    debug!(
        "{} via {}: {} (attempt {}, {} new links)",
        task.raw_url,
        proxy.id,
        completion.attempt_state,
        completion.task.attempt_count,
        completion.admitted
    );

    if let Some(store) = &ctx.store {
        let record = UrlOutcomeRecord {
            fingerprint: task.fingerprint.to_string(),
            url: task.raw_url.clone(),
            host: task.host.clone(),
            depth: task.depth,
            state: completion.attempt_state,
            attempt: completion.task.attempt_count,
            error: classification.outcome.error(),
            status_code,
            proxy_id: Some(proxy.id.clone()),
            elapsed_ms,
            recorded_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = store.record_url_outcome(&ctx.job_id, &record) {
            warn!("Failed to record outcome for {}: {}", task.raw_url, e);
        }
    }

    AttemptReport {
        url: task.raw_url,
        state: Some(completion.attempt_state),
    }
}

async fn fetch(ctx: &AttemptContext, task: &UrlTask, proxy: &ProxyRecord) -> Fetched {
    let url = match Url::parse(&task.raw_url) {
        Ok(url) => url,
        Err(e) => {
            return Fetched::Response(Err(FetchError::Transport(format!("unparseable URL: {}", e))))
        }
    };

    // Rules may have arrived after the task was admitted
    if let Some(policy) = &ctx.policy {
        if !policy.is_allowed(&url) {
            debug!("{} disallowed by policy at dispatch", url);
            return Fetched::Disallowed;
        }
    }

    let request = FetchRequest {
        url,
        proxy: Some(proxy.clone()).filter(|p| !p.is_direct()),
        headers: ctx.headers.clone(),
    };

    // The fetch runs detached so a timeout abandons it without cancelling it
    let fetcher = Arc::clone(&ctx.fetcher);
    let handle = tokio::spawn(async move { fetcher.fetch(request).await });
    match tokio::time::timeout(ctx.max_fetch_duration, handle).await {
        Ok(Ok(result)) => Fetched::Response(result),
        Ok(Err(e)) => Fetched::Response(Err(FetchError::Transport(format!("fetch task failed: {}", e)))),
        Err(_) => {
            debug!("{} exceeded {:?}", task.raw_url, ctx.max_fetch_duration);
            Fetched::TimedOut
        }
    }
}

fn tally(ctx: &AttemptContext, state: TaskState) {
    let counter = match state {
        TaskState::Done => &ctx.counters.succeeded,
        TaskState::Abandoned => &ctx.counters.abandoned,
        _ => &ctx.counters.retried,
    };
    JobCounters::bump(counter);
}

/// Warms the policy for each discovered link's host
///
/// Runs on its own task; if the policy panics, the links are still
/// enqueued and the fetched page still completes.
async fn prepare_links(ctx: &AttemptContext, links: &[String]) {
    let Some(policy) = ctx.policy.clone() else {
        return;
    };
    let urls: Vec<Url> = links.iter().filter_map(|link| Url::parse(link).ok()).collect();
    if urls.is_empty() {
        return;
    }

    let handle = tokio::spawn(async move {
        for url in &urls {
            policy.prepare(url).await;
        }
    });
    if let Err(e) = handle.await {
        warn!("Policy preparation for discovered links failed: {}", e);
    }
}
