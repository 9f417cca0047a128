use crate::frontier::CrawlStrategy;
use crate::proxy::{ProxyProtocol, RotationStrategy};
use serde::Deserialize;

/// Main configuration structure for Sumi-Dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub job: JobConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub canonical: CanonicalConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Job limits and scheduling behavior
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// URLs the job starts from, enqueued at depth 0
    pub seeds: Vec<String>,

    /// Order in which pending tasks are dispatched
    #[serde(default)]
    pub strategy: CrawlStrategy,

    /// Maximum link depth from a seed
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Maximum number of URLs ever accepted into the frontier
    #[serde(rename = "max-pages")]
    pub max_pages: usize,

    /// Attempts allowed before a task is abandoned
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Number of worker slots (capped globally)
    #[serde(rename = "max-concurrency", default = "default_job_concurrency")]
    pub max_concurrency: usize,

    /// Hard limit on a single fetch (milliseconds)
    #[serde(
        rename = "max-fetch-duration-ms",
        default = "default_max_fetch_duration_ms"
    )]
    pub max_fetch_duration_ms: u64,

    /// Base delay before a failed task is retried (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Ceiling on the retry delay (milliseconds)
    #[serde(
        rename = "max-retry-backoff-ms",
        default = "default_max_retry_backoff_ms"
    )]
    pub max_retry_backoff_ms: u64,

    /// How long the job may sit with no proxy and nothing in flight (milliseconds)
    #[serde(rename = "watchdog-timeout-ms", default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,

    /// What a 429 response means for the proxy that received it
    #[serde(rename = "rate-limit-policy", default)]
    pub rate_limit_policy: RateLimitPolicy,
}

/// Handling of HTTP 429 responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitPolicy {
    /// Retry later; raise the host's backoff, leave the proxy alone
    #[default]
    Backoff,

    /// Count the 429 against the proxy so rotation moves away from it
    RotateProxy,
}

/// Per-host courtesy limits
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Minimum time between requests to the same host (milliseconds)
    #[serde(rename = "min-delay-ms", default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum concurrent requests to the same host
    #[serde(rename = "max-concurrency", default = "default_host_concurrency")]
    pub max_concurrency: u32,

    /// Ceiling on the failure-scaled host delay (milliseconds)
    #[serde(rename = "max-host-backoff-ms", default = "default_max_host_backoff_ms")]
    pub max_host_backoff_ms: u64,

    /// Consult robots.txt for allow rules and crawl-delay
    #[serde(rename = "respect-robots", default = "default_true")]
    pub respect_robots: bool,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_concurrency: default_host_concurrency(),
            max_host_backoff_ms: default_max_host_backoff_ms(),
            respect_robots: true,
        }
    }
}

/// URL canonicalization rules
#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalConfig {
    /// Scheme forced onto canonical URLs
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Drop a leading `www.` from hosts
    #[serde(rename = "strip-www", default = "default_true")]
    pub strip_www: bool,

    /// Query parameters removed before fingerprinting (`utm_*` always goes)
    #[serde(rename = "tracking-params", default = "default_tracking_params")]
    pub tracking_params: Vec<String>,
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            strip_www: true,
            tracking_params: default_tracking_params(),
        }
    }
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// How an active proxy is picked
    #[serde(default)]
    pub rotation: RotationStrategy,

    /// Failures within the window that ban a proxy
    #[serde(rename = "ban-threshold", default = "default_ban_threshold")]
    pub ban_threshold: u32,

    /// Number of recent outcomes kept per proxy
    #[serde(rename = "window-size", default = "default_window_size")]
    pub window_size: usize,

    /// Age limit for outcomes in the window (milliseconds)
    #[serde(rename = "window-ms", default = "default_window_ms")]
    pub window_ms: u64,

    /// First ban duration (milliseconds)
    #[serde(rename = "ban-base-ms", default = "default_ban_base_ms")]
    pub ban_base_ms: u64,

    /// Longest ban duration (milliseconds)
    #[serde(rename = "ban-max-ms", default = "default_ban_max_ms")]
    pub ban_max_ms: u64,

    /// Register a direct (no upstream proxy) egress
    #[serde(default)]
    pub direct: bool,

    /// Upstream proxies
    #[serde(default)]
    pub endpoints: Vec<ProxyEndpointEntry>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            rotation: RotationStrategy::default(),
            ban_threshold: default_ban_threshold(),
            window_size: default_window_size(),
            window_ms: default_window_ms(),
            ban_base_ms: default_ban_base_ms(),
            ban_max_ms: default_ban_max_ms(),
            direct: false,
            endpoints: Vec::new(),
        }
    }
}

/// A single upstream proxy
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyEndpointEntry {
    pub id: String,

    /// e.g. "http://10.0.0.1:3128" or "socks5://10.0.0.2:1080"
    pub endpoint: String,

    pub protocol: ProxyProtocol,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Builds the User-Agent header value
    ///
    /// Format: `Name/Version (+contact-url; contact-email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the markdown summary file
    #[serde(rename = "summary-path")]
    pub summary_path: String,

    /// Where a resumable snapshot is written on cancellation
    #[serde(rename = "snapshot-path", default)]
    pub snapshot_path: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_job_concurrency() -> usize {
    8
}

fn default_max_fetch_duration_ms() -> u64 {
    30_000
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

fn default_max_retry_backoff_ms() -> u64 {
    60_000
}

fn default_watchdog_timeout_ms() -> u64 {
    900_000
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_host_concurrency() -> u32 {
    1
}

fn default_max_host_backoff_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_tracking_params() -> Vec<String> {
    crate::url::DEFAULT_TRACKING_PARAMS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_ban_threshold() -> u32 {
    3
}

fn default_window_size() -> usize {
    10
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_ban_base_ms() -> u64 {
    30_000
}

fn default_ban_max_ms() -> u64 {
    600_000
}
