use crate::config::UserAgentConfig;
use crate::policy::{ParsedRobots, PolicyProvider};
use crate::url::Canonicalizer;
use crate::SumiError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Timeout for a robots.txt request
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

/// robots.txt for one host and when it was fetched
#[derive(Debug, Clone)]
struct CachedRobots {
    content: ParsedRobots,
    fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Older than 24 hours
    fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > ChronoDuration::hours(24)
    }
}

/// Policy backed by each host's robots.txt
///
/// robots.txt is fetched once per host in `prepare`. Hosts whose file is
/// missing, unreachable or not yet fetched are allowed everything.
pub struct RobotsPolicy {
    client: reqwest::Client,
    agent: String,
    canonicalizer: Canonicalizer,
    cache: DashMap<String, CachedRobots>,
}

impl RobotsPolicy {
    /// Builds a policy that identifies itself with the configured user agent
    pub fn new(user_agent: &UserAgentConfig, canonicalizer: Canonicalizer) -> Result<Self, SumiError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.header_value())
            .timeout(ROBOTS_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, &user_agent.crawler_name, canonicalizer))
    }

    pub fn with_client(client: reqwest::Client, agent: &str, canonicalizer: Canonicalizer) -> Self {
        Self {
            client,
            agent: agent.to_string(),
            canonicalizer,
            cache: DashMap::new(),
        }
    }

    /// Stores robots.txt content for a URL's host without fetching
    pub fn insert(&self, url: &Url, robots: ParsedRobots) {
        if let Some(host) = self.host_of(url) {
            self.cache.insert(host, CachedRobots::new(robots));
        }
    }

    /// Number of hosts with cached robots.txt
    pub fn cached_hosts(&self) -> usize {
        self.cache.len()
    }

    fn host_of(&self, url: &Url) -> Option<String> {
        self.canonicalizer.normalize(url.as_str()).ok().map(|c| c.host)
    }

    async fn fetch(&self, url: &Url) -> ParsedRobots {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return ParsedRobots::allow_all(),
        };

        match self.client.get(robots_url.clone()).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    debug!("Fetched {}", robots_url);
                    ParsedRobots::from_content(&body)
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", robots_url, e);
                    ParsedRobots::allow_all()
                }
            },
            Ok(response) => {
                debug!("{} returned {}, allowing all", robots_url, response.status());
                ParsedRobots::allow_all()
            }
            Err(e) => {
                warn!("Failed to fetch {}: {}", robots_url, e);
                ParsedRobots::allow_all()
            }
        }
    }
}

#[async_trait]
impl PolicyProvider for RobotsPolicy {
    async fn prepare(&self, url: &Url) {
        let Some(host) = self.host_of(url) else {
            return;
        };

        let fresh = self
            .cache
            .get(&host)
            .map_or(false, |cached| !cached.is_stale());
        if fresh {
            return;
        }

        let robots = self.fetch(url).await;
        self.cache.insert(host, CachedRobots::new(robots));
    }

    fn crawl_delay(&self, host: &str) -> Option<f64> {
        self.cache
            .get(host)
            .and_then(|cached| cached.content.crawl_delay(&self.agent))
    }

    fn is_allowed(&self, url: &Url) -> bool {
        let Some(host) = self.host_of(url) else {
            return true;
        };

        self.cache
            .get(&host)
            .map_or(true, |cached| cached.content.is_allowed(url.as_str(), &self.agent))
    }
}
