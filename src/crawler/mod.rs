//! Crawler module: dispatching fetch attempts
//!
//! This module contains the moving parts of a job, including:
//! - The coordinator and its scheduling loop
//! - Per-attempt bookkeeping and outcome classification
//! - HTTP fetching through upstream proxies
//! - HTML parsing and link extraction

mod coordinator;
mod counters;
mod fetcher;
mod outcome;
mod parser;
mod worker;

pub use coordinator::Coordinator;
pub use counters::{JobCounters, JobCounts};
pub use fetcher::{build_http_client, FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use outcome::Classification;
pub use parser::{extract_links, parse_html, ParsedPage};

use crate::config::Config;
use crate::output::JobReport;
use crate::SumiError;

/// Runs a complete job with the default collaborators
///
/// Builds a coordinator with [`Coordinator::from_config`] and runs it until
/// the frontier is exhausted.
pub async fn run_job(config: Config) -> Result<JobReport, SumiError> {
    Coordinator::from_config(config)?.run().await
}
