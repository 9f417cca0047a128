//! Shared fixtures: a test configuration and a scripted fetcher

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sumi_dispatch::config::{
    CanonicalConfig, Config, JobConfig, OutputConfig, PolitenessConfig, ProxyConfig,
    RateLimitPolicy, UserAgentConfig,
};
use sumi_dispatch::{CrawlStrategy, FetchError, FetchRequest, FetchResponse, Fetcher};

/// Configuration with no delays, a direct egress and fast retries
pub fn test_config(seeds: Vec<String>) -> Config {
    Config {
        job: JobConfig {
            seeds,
            strategy: CrawlStrategy::Bfs,
            max_depth: 2,
            max_pages: 100,
            max_retries: 3,
            max_concurrency: 4,
            max_fetch_duration_ms: 2_000,
            retry_backoff_ms: 10,
            max_retry_backoff_ms: 50,
            watchdog_timeout_ms: 500,
            rate_limit_policy: RateLimitPolicy::Backoff,
        },
        politeness: PolitenessConfig {
            min_delay_ms: 0,
            max_concurrency: 1,
            max_host_backoff_ms: 1_000,
            respect_robots: false,
        },
        canonical: CanonicalConfig::default(),
        proxy: ProxyConfig {
            direct: true,
            ..ProxyConfig::default()
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            database_path: ":memory:".to_string(),
            summary_path: "./test_summary.md".to_string(),
            snapshot_path: None,
        },
    }
}

/// What the scripted fetcher answers for a URL
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with these discovered links
    Page(Vec<String>),
    Status(u16),
    Transport,
    /// Never answers in time
    Hang,
}

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub url: String,
    pub proxy_id: Option<String>,
    pub started: Instant,
}

/// Fetcher that answers from a table and records every call
///
/// Unlisted URLs get an empty 200 page.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    failing_proxies: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<FetchCall>>,
    /// (in flight now, most ever in flight) per host
    in_flight: Mutex<HashMap<String, (usize, usize)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    /// Every request through this proxy fails at the transport level
    pub fn failing_proxy(mut self, id: &str) -> Self {
        self.failing_proxies.insert(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.url == url).count()
    }

    /// Most fetches to `host` that were ever running at once
    pub fn peak_in_flight(&self, host: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(host)
            .map_or(0, |(_, peak)| *peak)
    }

    fn enter(&self, host: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let (now, peak) = in_flight.entry(host.to_string()).or_default();
        *now += 1;
        *peak = (*peak).max(*now);
    }

    fn leave(&self, host: &str) {
        if let Some((now, _)) = self.in_flight.lock().unwrap().get_mut(host) {
            *now -= 1;
        }
    }

    pub fn calls_via(&self, proxy_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.proxy_id.as_deref() == Some(proxy_id))
            .count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        self.enter(&host);
        let result = self.answer(request).await;
        self.leave(&host);
        result
    }
}

impl ScriptedFetcher {
    async fn answer(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let proxy_id = request.proxy.as_ref().map(|p| p.id.clone());
        self.calls.lock().unwrap().push(FetchCall {
            url: request.url.to_string(),
            proxy_id: proxy_id.clone(),
            started: Instant::now(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if proxy_id.map_or(false, |id| self.failing_proxies.contains(&id)) {
            return Err(FetchError::Transport("connection refused".to_string()));
        }

        let reply = self
            .replies
            .get(request.url.as_str())
            .cloned()
            .unwrap_or(Reply::Page(Vec::new()));

        match reply {
            Reply::Page(links) => Ok(FetchResponse {
                status_code: 200,
                body: String::new(),
                elapsed_ms: self.delay.as_millis() as u64,
                discovered_links: links,
            }),
            Reply::Status(code) => Ok(FetchResponse {
                status_code: code,
                ..FetchResponse::default()
            }),
            Reply::Transport => Err(FetchError::Transport("connection reset".to_string())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(FetchResponse::default())
            }
        }
    }
}

/// Polls `condition` every few milliseconds until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
