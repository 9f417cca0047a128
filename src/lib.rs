//! Sumi-Dispatch: a polite URL scheduling core
//!
//! This crate decides in what order discovered URLs are fetched, through
//! which upstream proxy, and how failures are absorbed, while respecting
//! per-host courtesy limits and proxy health.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod output;
pub mod policy;
pub mod politeness;
pub mod proxy;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Dispatch operations
#[derive(Debug, Error)]
pub enum SumiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No seed URL could be admitted to the frontier")]
    InvalidSeeds,

    #[error("No proxy available and nothing in flight for {waited_ms}ms")]
    Deadlock { waited_ms: u64 },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Dispatch operations
pub type Result<T> = std::result::Result<T, SumiError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_job, Coordinator, FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher, JobCounts};
pub use frontier::{Admission, CrawlStrategy, Frontier, RejectReason, TaskOutcome, UrlTask};
pub use output::{EventNotifier, JobEvent, JobReport};
pub use policy::{AllowAllPolicy, PolicyProvider, RobotsPolicy};
pub use politeness::PolitenessGovernor;
pub use proxy::{ProxyOutcome, ProxyPool, ProxyProtocol, ProxyRecord, ProxyStatus, RotationStrategy};
pub use state::{HostState, JobStatus, TaskState};
pub use storage::{JobSnapshot, JobStore, SqliteJobStore};
pub use url::{Canonicalizer, Fingerprint};
