//! HTTP fetcher implementation
//!
//! This module handles the requests an attempt makes, including:
//! - Building one HTTP client per proxy with the configured user agent
//! - Routing requests through HTTP, HTTPS or SOCKS5 proxies
//! - Extracting links from HTML responses
//! - Error classification (timeout vs. transport)

use crate::config::UserAgentConfig;
use crate::crawler::parser::parse_html;
use crate::proxy::{ProxyProtocol, ProxyRecord, DIRECT_PROXY_ID};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{redirect::Policy, Client};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Maximum redirects followed for one request
const MAX_REDIRECTS: usize = 10;

/// One fetch to perform
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    /// Upstream proxy; None sends the request directly
    pub proxy: Option<ProxyRecord>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
}

/// What came back from the server
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status_code: u16,
    pub body: String,
    pub elapsed_ms: u64,
    /// Absolute links found in an HTML body
    pub discovered_links: Vec<String>,
}

/// A fetch that produced no HTTP response
///
/// The message is for debug logs only.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("proxy error: {0}")]
    Proxy(String),
}

/// Performs fetches on behalf of attempts
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout
/// * `proxy` - Upstream proxy; None or a direct record means no proxy
///
/// # Example
///
/// ```no_run
/// use sumi_dispatch::config::UserAgentConfig;
/// use sumi_dispatch::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiDispatch".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30), None).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
    proxy: Option<&ProxyRecord>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy.filter(|p| !p.is_direct()) {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url(proxy))?);
    }

    builder.build()
}

/// Endpoint as a URL, adding the protocol's scheme if it has none
fn proxy_url(proxy: &ProxyRecord) -> String {
    if proxy.endpoint.contains("://") {
        return proxy.endpoint.clone();
    }
    let scheme = match proxy.protocol {
        ProxyProtocol::Socks5 => "socks5h",
        other => other.as_str(),
    };
    format!("{}://{}", scheme, proxy.endpoint)
}

/// reqwest-backed fetcher with one client per proxy
pub struct HttpFetcher {
    user_agent: UserAgentConfig,
    timeout: Duration,
    clients: DashMap<String, Client>,
}

impl HttpFetcher {
    pub fn new(user_agent: UserAgentConfig, timeout: Duration) -> Self {
        Self {
            user_agent,
            timeout,
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, proxy: Option<&ProxyRecord>) -> Result<Client, FetchError> {
        let key = proxy.map_or(DIRECT_PROXY_ID, |p| p.id.as_str());
        if let Some(client) = self.clients.get(key) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.user_agent, self.timeout, proxy)
            .map_err(|e| FetchError::Proxy(e.to_string()))?;
        self.clients.insert(key.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(request.proxy.as_ref())?;
        let started = Instant::now();

        let mut builder = client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_error)?;
        let status_code = response.status().as_u16();
        let final_url = response.url().clone();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.contains("text/html"));
        let success = response.status().is_success();

        let body = response.text().await.map_err(classify_error)?;
        let discovered_links = if success && is_html {
            parse_html(&body, &final_url).links
        } else {
            Vec::new()
        };

        debug!(
            "GET {} -> {} ({} links)",
            request.url,
            status_code,
            discovered_links.len()
        );

        Ok(FetchResponse {
            status_code,
            body,
            elapsed_ms: started.elapsed().as_millis() as u64,
            discovered_links,
        })
    }
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}
