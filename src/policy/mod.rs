//! Fetch policy: which URLs may be fetched and how slowly
//!
//! The frontier asks a `PolicyProvider` whether a URL is allowed before
//! admitting it, and the politeness governor asks it for a host's
//! crawl-delay the first time the host is seen.

mod parser;
mod robots;

use async_trait::async_trait;
use url::Url;

pub use parser::ParsedRobots;
pub use robots::RobotsPolicy;

/// Source of allow/deny decisions and crawl-delay hints
///
/// `is_allowed` and `crawl_delay` are synchronous and must answer from
/// cached state. Providers that need network I/O do it in `prepare`,
/// which the scheduler awaits before URLs for a new host are enqueued.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Warms any cached state needed to answer for `url`'s host
    async fn prepare(&self, _url: &Url) {}

    /// Crawl-delay for the host in seconds, if the policy sets one
    fn crawl_delay(&self, host: &str) -> Option<f64>;

    /// Whether `url` may be fetched
    fn is_allowed(&self, url: &Url) -> bool;
}

/// Policy that allows everything and sets no crawl-delay
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyProvider for AllowAllPolicy {
    fn crawl_delay(&self, _host: &str) -> Option<f64> {
        None
    }

    fn is_allowed(&self, _url: &Url) -> bool {
        true
    }
}
