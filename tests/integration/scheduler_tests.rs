//! Scheduling tests against a scripted fetcher
//!
//! No network: every fetch is answered by `ScriptedFetcher`, so these
//! tests exercise ordering, politeness, retries, proxy health and the job
//! lifecycle deterministically.

use crate::common::{test_config, wait_until, Reply, ScriptedFetcher};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_dispatch::config::{Config, ProxyEndpointEntry};
use sumi_dispatch::frontier::ErrorKind;
use sumi_dispatch::output::ChannelNotifier;
use sumi_dispatch::storage::{JobSnapshot, SqliteJobStore};
use sumi_dispatch::{
    Coordinator, JobStatus, JobStore, PolicyProvider, ProxyPool, ProxyProtocol, ProxyStatus,
    SumiError, TaskState,
};
use url::Url;

fn coordinator(config: Config, fetcher: &Arc<ScriptedFetcher>) -> Coordinator {
    let pool = Arc::new(ProxyPool::from_config(&config.proxy));
    Coordinator::new(config, pool, fetcher.clone())
}

fn seeds(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}

struct DenyAllPolicy;

#[async_trait]
impl PolicyProvider for DenyAllPolicy {
    fn crawl_delay(&self, _host: &str) -> Option<f64> {
        None
    }

    fn is_allowed(&self, _url: &Url) -> bool {
        false
    }
}

/// Allows everything but panics while warming up for `/boom`
struct PanicOnPreparePolicy;

#[async_trait]
impl PolicyProvider for PanicOnPreparePolicy {
    async fn prepare(&self, url: &Url) {
        if url.path() == "/boom" {
            tokio::time::sleep(Duration::from_millis(50)).await;
            panic!("policy lookup for {} blew up", url);
        }
    }

    fn crawl_delay(&self, _host: &str) -> Option<f64> {
        None
    }

    fn is_allowed(&self, _url: &Url) -> bool {
        true
    }
}

/// Panics on the `nth` allow check for `/flaky`, counting from 1
struct PanicOnCheckPolicy {
    nth: usize,
    checks: AtomicUsize,
}

#[async_trait]
impl PolicyProvider for PanicOnCheckPolicy {
    fn crawl_delay(&self, _host: &str) -> Option<f64> {
        None
    }

    fn is_allowed(&self, url: &Url) -> bool {
        if url.path() == "/flaky" && self.checks.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            panic!("allow check for {} blew up", url);
        }
        true
    }
}

#[tokio::test]
async fn test_bfs_dispatches_seeds_in_insertion_order() {
    let urls = ["https://a.test/1", "https://a.test/2", "https://a.test/3"];
    let mut config = test_config(seeds(&urls));
    config.job.max_concurrency = 1;

    let fetcher = Arc::new(ScriptedFetcher::new());
    let report = coordinator(config, &fetcher).run().await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(fetcher.urls(), urls);
    assert_eq!(report.counts.succeeded, 3);
    assert_eq!(report.counts.dispatched, 3);
}

#[tokio::test]
async fn test_links_are_followed_within_depth_and_deduplicated() {
    let mut config = test_config(seeds(&["https://a.test/"]));
    config.job.max_depth = 2;

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply(
                "https://a.test/",
                Reply::Page(seeds(&[
                    "https://a.test/1",
                    "https://b.test/x",
                    "https://a.test/#top",
                    "http://www.a.test/1?utm_source=feed",
                ])),
            )
            .reply("https://a.test/1", Reply::Page(seeds(&["https://a.test/2"])))
            .reply("https://a.test/2", Reply::Page(seeds(&["https://a.test/3"]))),
    );
    let report = coordinator(config, &fetcher).run().await.unwrap();

    let mut fetched = fetcher.urls();
    fetched.sort();
    assert_eq!(
        fetched,
        vec![
            "https://a.test/",
            "https://a.test/1",
            "https://a.test/2",
            "https://b.test/x",
        ]
    );
    assert_eq!(report.counts.discovered, 3);
    assert_eq!(report.frontier.rejected_depth, 1);
    assert_eq!(report.frontier.rejected_duplicate, 2);
}

#[tokio::test]
async fn test_host_min_delay_spaces_dispatches() {
    let urls = ["https://a.test/1", "https://a.test/2", "https://a.test/3"];
    let mut config = test_config(seeds(&urls));
    config.politeness.min_delay_ms = 100;
    config.job.max_concurrency = 3;

    let fetcher = Arc::new(ScriptedFetcher::new());
    coordinator(config, &fetcher).run().await.unwrap();

    let mut starts: Vec<_> = fetcher.calls().into_iter().map(|c| c.started).collect();
    starts.sort();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(90), "gap was {:?}", gap);
    }
}

#[tokio::test]
async fn test_host_concurrency_ceiling() {
    let urls = ["https://a.test/1", "https://a.test/2", "https://b.test/1"];
    let mut config = test_config(seeds(&urls));
    config.job.max_concurrency = 3;

    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(100)));
    let coordinator = coordinator(config, &fetcher);
    let governor = Arc::clone(coordinator.governor());

    let (report, ()) = tokio::join!(coordinator.run(), async {
        wait_until(|| fetcher.call_count() >= 2).await;
        let a = governor.host_state("a.test").unwrap();
        assert!(a.in_flight_count <= 1);
    });

    assert_eq!(report.unwrap().counts.succeeded, 3);
    let a_calls: Vec<_> = fetcher
        .calls()
        .into_iter()
        .filter(|c| c.url.starts_with("https://a.test"))
        .collect();
    let gap = a_calls[1].started.duration_since(a_calls[0].started);
    assert!(gap >= Duration::from_millis(90), "a.test overlapped: {:?}", gap);
}

#[tokio::test]
async fn test_retryable_failure_is_abandoned_after_max_retries() {
    let mut config = test_config(seeds(&["https://a.test/ok", "https://a.test/flaky"]));
    config.proxy.ban_threshold = 100;

    let fetcher =
        Arc::new(ScriptedFetcher::new().reply("https://a.test/flaky", Reply::Status(503)));
    let report = coordinator(config, &fetcher).run().await.unwrap();

    assert_eq!(fetcher.calls_to("https://a.test/flaky"), 3);
    assert_eq!(report.counts.succeeded, 1);
    assert_eq!(report.counts.retried, 2);
    assert_eq!(report.counts.abandoned, 1);
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].url, "https://a.test/flaky");
    assert_eq!(report.abandoned[0].attempts, 3);
    assert_eq!(report.abandoned[0].error, Some(ErrorKind::Http(503)));
}

#[tokio::test]
async fn test_fatal_status_is_not_retried() {
    let config = test_config(seeds(&["https://a.test/gone"]));
    let fetcher = Arc::new(ScriptedFetcher::new().reply("https://a.test/gone", Reply::Status(404)));
    let report = coordinator(config, &fetcher).run().await.unwrap();

    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(report.counts.abandoned, 1);
    assert_eq!(report.abandoned[0].error, Some(ErrorKind::Http(404)));
}

#[tokio::test]
async fn test_fetch_timeout_is_retryable() {
    let mut config = test_config(seeds(&["https://a.test/slow"]));
    config.job.max_fetch_duration_ms = 100;
    config.job.max_retries = 1;

    let fetcher = Arc::new(ScriptedFetcher::new().reply("https://a.test/slow", Reply::Hang));
    let report = coordinator(config, &fetcher).run().await.unwrap();

    assert_eq!(report.counts.timeouts, 1);
    assert_eq!(report.abandoned[0].error, Some(ErrorKind::Timeout));
    assert!(report.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_rate_limited_under_backoff_does_not_ban_proxy() {
    let mut config = test_config(seeds(&["https://a.test/busy"]));
    config.proxy.ban_threshold = 2;

    let fetcher = Arc::new(ScriptedFetcher::new().reply("https://a.test/busy", Reply::Status(429)));
    let coordinator = coordinator(config, &fetcher);
    let report = coordinator.run().await.unwrap();

    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(report.pool.banned, 0);
    assert_eq!(report.abandoned[0].error, Some(ErrorKind::Http(429)));

    // Neither credited nor blamed
    let direct = coordinator.pool().record("direct").unwrap();
    assert_eq!(direct.success_count, 0);
    assert_eq!(direct.failure_count, 0);
}

#[tokio::test]
async fn test_failing_proxy_is_banned_and_avoided() {
    let urls: Vec<String> = (1..=6).map(|i| format!("https://a.test/{}", i)).collect();
    let mut config = test_config(urls);
    config.job.max_concurrency = 1;
    config.proxy.direct = false;
    config.proxy.ban_threshold = 2;
    config.proxy.endpoints = vec![
        ProxyEndpointEntry {
            id: "p1".to_string(),
            endpoint: "http://10.0.0.1:3128".to_string(),
            protocol: ProxyProtocol::Http,
        },
        ProxyEndpointEntry {
            id: "p2".to_string(),
            endpoint: "http://10.0.0.2:3128".to_string(),
            protocol: ProxyProtocol::Http,
        },
    ];

    let fetcher = Arc::new(ScriptedFetcher::new().failing_proxy("p1"));
    let coordinator = coordinator(config, &fetcher);
    let report = coordinator.run().await.unwrap();

    assert_eq!(fetcher.calls_via("p1"), 2);
    assert_eq!(report.counts.succeeded, 6);
    assert_eq!(report.counts.abandoned, 0);
    assert_eq!(report.pool.banned, 1);

    let p1 = coordinator.pool().record("p1").unwrap();
    assert_eq!(p1.status, ProxyStatus::Banned);
    assert!(p1.banned_until.is_some());
}

#[tokio::test]
async fn test_no_proxy_escalates_to_deadlock() {
    let mut config = test_config(seeds(&["https://a.test/"]));
    config.proxy.direct = false;
    config.job.watchdog_timeout_ms = 200;

    let (notifier, mut events) = ChannelNotifier::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let coordinator = coordinator(config, &fetcher).with_notifier(Arc::new(notifier));

    let result = coordinator.run().await;
    assert!(matches!(result, Err(SumiError::Deadlock { .. })));
    assert_eq!(coordinator.status(), JobStatus::Failed);
    assert_eq!(fetcher.call_count(), 0);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec!["job.started", "host.proxies_exhausted", "job.failed"]
    );
}

#[tokio::test]
async fn test_no_admissible_seed_fails_the_job() {
    let config = test_config(seeds(&["https://a.test/"]));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let coordinator = coordinator(config, &fetcher).with_policy(Arc::new(DenyAllPolicy));

    let result = coordinator.run().await;
    assert!(matches!(result, Err(SumiError::InvalidSeeds)));
    assert_eq!(coordinator.status(), JobStatus::Failed);
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_drains_in_flight_attempts() {
    let urls = [
        "https://a.test/1",
        "https://b.test/1",
        "https://c.test/1",
        "https://a.test/2",
        "https://b.test/2",
        "https://c.test/2",
    ];
    let mut config = test_config(seeds(&urls));
    config.job.max_concurrency = 3;

    let store = Arc::new(SqliteJobStore::new_in_memory().unwrap());
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(200)));
    let coordinator = coordinator(config, &fetcher).with_store(store.clone());
    let cancel = coordinator.cancel_token();

    let (report, ()) = tokio::join!(coordinator.run(), async {
        wait_until(|| fetcher.call_count() >= 3).await;
        cancel.cancel();
        // Still draining
        assert_eq!(coordinator.status(), JobStatus::Running);
    });
    let report = report.unwrap();

    assert_eq!(report.status, JobStatus::Cancelled);
    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(report.counts.dispatched, 3);
    assert_eq!(report.counts.succeeded, 3);
    assert_eq!(report.frontier.pending, 3);

    let outcomes = store.get_url_outcomes(coordinator.job_id()).unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.state == TaskState::Done));
    assert_eq!(
        store.get_job(coordinator.job_id()).unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_snapshot_resumes_remaining_work() {
    let urls = [
        "https://a.test/1",
        "https://a.test/2",
        "https://a.test/3",
        "https://a.test/4",
    ];
    let mut config = test_config(seeds(&urls));
    config.job.max_concurrency = 1;

    let first = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(50)));
    let job = coordinator(config.clone(), &first).with_config_hash("abc");
    let cancel = job.cancel_token();
    let (report, ()) = tokio::join!(job.run(), async {
        wait_until(|| first.call_count() >= 1).await;
        cancel.cancel();
    });
    assert_eq!(report.unwrap().status, JobStatus::Cancelled);
    assert_eq!(first.urls(), vec!["https://a.test/1"]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.snapshot.json");
    job.snapshot().save(&path).unwrap();
    let snapshot = JobSnapshot::load(&path).unwrap();
    assert_eq!(snapshot.job_id, job.job_id());

    let second = Arc::new(ScriptedFetcher::new());
    let resumed = coordinator(config, &second)
        .with_config_hash("abc")
        .restore(snapshot);
    let report = resumed.run().await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(resumed.job_id(), job.job_id());
    assert_eq!(
        second.urls(),
        vec!["https://a.test/2", "https://a.test/3", "https://a.test/4"]
    );
    assert_eq!(report.frontier.accepted, 4);
}

#[tokio::test]
async fn test_job_is_recorded_in_store() {
    let config = test_config(seeds(&["https://a.test/", "https://a.test/missing"]));
    let store = Arc::new(SqliteJobStore::new_in_memory().unwrap());
    let fetcher =
        Arc::new(ScriptedFetcher::new().reply("https://a.test/missing", Reply::Status(404)));

    let coordinator = coordinator(config, &fetcher)
        .with_store(store.clone())
        .with_job_id("job-1")
        .with_config_hash("deadbeef");
    coordinator.run().await.unwrap();

    let job = store.get_job("job-1").unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.config_hash.as_deref(), Some("deadbeef"));
    assert!(job.finished_at.is_some());
    let counts = job.counts.unwrap();
    assert_eq!(counts.succeeded, 1);
    assert_eq!(counts.abandoned, 1);

    let by_state = store.count_outcomes_by_state("job-1").unwrap();
    assert_eq!(by_state.get(&TaskState::Done), Some(&1));
    assert_eq!(by_state.get(&TaskState::Abandoned), Some(&1));
    assert_eq!(
        store.get_error_summary("job-1").unwrap(),
        vec![("http_404".to_string(), 1)]
    );

    let proxies = store.load_proxies().unwrap();
    assert_eq!(proxies.len(), 1);
    // A 404 is the server's answer, not the proxy's fault
    assert_eq!(proxies[0].success_count, 2);
}

#[tokio::test]
async fn test_events_bracket_the_job() {
    let config = test_config(seeds(&["https://a.test/"]));
    let (notifier, mut events) = ChannelNotifier::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let coordinator = coordinator(config, &fetcher).with_notifier(Arc::new(notifier));
    let mut status = coordinator.subscribe();

    coordinator.run().await.unwrap();

    let started = events.recv().await.unwrap();
    assert_eq!(started.name(), "job.started");
    assert_eq!(started.job_id(), coordinator.job_id());
    let completed = events.recv().await.unwrap();
    assert_eq!(completed.name(), "job.completed");

    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), JobStatus::Completed);
}

#[tokio::test]
async fn test_panic_after_fetch_keeps_host_ceiling() {
    let urls = ["https://a.test/1", "https://a.test/2", "https://a.test/3"];
    let mut config = test_config(seeds(&urls));
    config.job.max_concurrency = 4;

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply("https://a.test/1", Reply::Page(seeds(&["https://a.test/boom"])))
            .with_delay(Duration::from_millis(150)),
    );
    let coordinator = coordinator(config, &fetcher).with_policy(Arc::new(PanicOnPreparePolicy));
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(fetcher.peak_in_flight("a.test"), 1);
    // The fetched page is not sent back for a retry
    assert_eq!(fetcher.calls_to("https://a.test/1"), 1);
    assert_eq!(fetcher.calls_to("https://a.test/boom"), 1);
    assert_eq!(report.counts.succeeded, 4);
    assert_eq!(report.counts.retried, 0);
    assert_eq!(coordinator.governor().host_state("a.test").unwrap().in_flight_count, 0);
}

#[tokio::test]
async fn test_panic_before_fetch_releases_slot_once() {
    let urls = ["https://a.test/flaky", "https://a.test/2", "https://a.test/3"];
    let mut config = test_config(seeds(&urls));
    config.job.max_concurrency = 4;

    // First check happens at admission, the second at dispatch
    let policy = PanicOnCheckPolicy {
        nth: 2,
        checks: AtomicUsize::new(0),
    };
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(100)));
    let coordinator = coordinator(config, &fetcher).with_policy(Arc::new(policy));
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(fetcher.peak_in_flight("a.test"), 1);
    assert_eq!(fetcher.calls_to("https://a.test/flaky"), 1);
    assert_eq!(report.counts.retried, 1);
    assert_eq!(report.counts.succeeded, 3);
    assert_eq!(report.pool.active, 1);
    assert_eq!(coordinator.governor().host_state("a.test").unwrap().in_flight_count, 0);
}
