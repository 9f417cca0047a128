//! End-to-end tests over HTTP
//!
//! These tests use wiremock to create mock HTTP servers and run whole jobs
//! with the real reqwest fetcher and robots.txt policy.

use crate::common::test_config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_dispatch::config::Config;
use sumi_dispatch::frontier::ErrorKind;
use sumi_dispatch::output::{format_markdown_summary, load_statistics};
use sumi_dispatch::storage::SqliteJobStore;
use sumi_dispatch::{
    Coordinator, HttpFetcher, JobStatus, JobStore, ProxyPool, RobotsPolicy, TaskState,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
}

fn http_coordinator(config: Config) -> Coordinator {
    let pool = Arc::new(ProxyPool::from_config(&config.proxy));
    let fetcher = Arc::new(HttpFetcher::new(
        config.user_agent.clone(),
        Duration::from_millis(config.job.max_fetch_duration_ms),
    ));
    Coordinator::new(config, pool, fetcher)
}

/// Mounts `/` linking to `/page1` and `/page2`
async fn mount_small_site(server: &MockServer) {
    let base_url = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{}/page1">Page 1</a>
            <a href="/page2">Page 2</a>
            <a href="mailto:someone@example.com">Mail</a>
            </body></html>"#,
            base_url
        )))
        .mount(server)
        .await;

    for page in ["/page1", "/page2"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(html(
                r#"<html><head><title>Page</title></head><body>Content</body></html>"#,
            ))
            .expect(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_full_job_single_host() {
    let mock_server = MockServer::start().await;
    mount_small_site(&mock_server).await;

    let config = test_config(vec![format!("{}/", mock_server.uri())]);
    let store = Arc::new(SqliteJobStore::new_in_memory().unwrap());
    let coordinator = http_coordinator(config).with_store(store.clone());

    let report = coordinator.run().await.expect("Job failed");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.counts.succeeded, 3);
    assert_eq!(report.counts.discovered, 2);
    assert_eq!(report.counts.abandoned, 0);

    let by_state = store
        .count_outcomes_by_state(coordinator.job_id())
        .expect("Failed to count outcomes");
    assert_eq!(by_state.get(&TaskState::Done), Some(&3));

    let outcomes = store.get_url_outcomes(coordinator.job_id()).unwrap();
    assert!(outcomes.iter().all(|o| o.status_code == Some(200)));
    assert!(outcomes.iter().all(|o| o.proxy_id.as_deref() == Some("direct")));
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><body>
            <a href="{}/allowed">Allowed Page</a>
            <a href="{}/admin">Admin Page</a>
            </body></html>"#,
            base_url, base_url
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/allowed"))
        .respond_with(html("<html><body>Allowed content</body></html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Should never be called
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(html("<html><body>Admin content</body></html>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = test_config(vec![format!("{}/", base_url)]);
    config.politeness.respect_robots = true;
    let policy = RobotsPolicy::new(&config.user_agent, Default::default()).unwrap();
    let coordinator = http_coordinator(config).with_policy(Arc::new(policy));

    let report = coordinator.run().await.expect("Job failed");

    assert_eq!(report.counts.succeeded, 2);
    assert_eq!(report.frontier.rejected_policy, 1);
    // Wiremock verifies the expectations when mock_server drops
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body><a href="/missing">Missing</a><a href="/broken">Broken</a></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = test_config(vec![format!("{}/", base_url)]);
    config.job.max_retries = 2;
    config.proxy.ban_threshold = 10;
    let report = http_coordinator(config).run().await.expect("Job failed");

    assert_eq!(report.counts.succeeded, 1);
    assert_eq!(report.counts.abandoned, 2);

    let mut errors: Vec<_> = report.abandoned.iter().map(|a| a.error).collect();
    errors.sort_by_key(|e| e.map(|k| k.code()));
    assert_eq!(
        errors,
        vec![Some(ErrorKind::Http(404)), Some(ErrorKind::Http(500))]
    );

    let markdown = format_markdown_summary(&report, &[]);
    assert!(markdown.contains("| http_404 | 1 |"));
    assert!(markdown.contains("| http_500 | 1 |"));
}

#[tokio::test]
async fn test_unreachable_host_is_abandoned() {
    // Nothing listens on port 9 on loopback
    let mut config = test_config(vec!["http://127.0.0.1:9/".to_string()]);
    config.job.max_retries = 2;
    config.job.max_fetch_duration_ms = 1_000;

    let report = http_coordinator(config).run().await.expect("Job failed");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.counts.abandoned, 1);
    let error = report.abandoned[0].error;
    assert!(
        matches!(error, Some(ErrorKind::Transport) | Some(ErrorKind::Timeout)),
        "unexpected error {:?}",
        error
    );
}

#[tokio::test]
async fn test_default_collaborators_write_database() {
    let mock_server = MockServer::start().await;
    mount_small_site(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");

    let mut config = test_config(vec![format!("{}/", mock_server.uri())]);
    config.output.database_path = db_path.to_string_lossy().to_string();

    let coordinator = Coordinator::from_config(config).expect("Failed to create coordinator");
    coordinator.run().await.expect("Job failed");

    let store = SqliteJobStore::new(Path::new(&db_path)).expect("Failed to open DB");
    let stats = load_statistics(&store, None)
        .expect("Failed to load statistics")
        .expect("No job recorded");

    assert_eq!(stats.job.id, coordinator.job_id());
    assert_eq!(stats.job.status, JobStatus::Completed);
    assert_eq!(stats.total_attempts(), 3);
    assert_eq!(stats.proxies.len(), 1);
}
