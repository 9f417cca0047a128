//! Output module for job reports and events
//!
//! This module handles:
//! - Structured job and host events
//! - The final job report printed to stdout
//! - Markdown summaries of finished jobs
//! - Statistics read back from the job database

pub mod events;
mod markdown;
mod report;
pub mod stats;

pub use events::{ChannelNotifier, EventNotifier, JobEvent, TracingNotifier};
pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use report::{print_report, JobReport};
pub use stats::{load_statistics, print_statistics, JobStatistics};

use thiserror::Error;

/// Errors that can occur while writing output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
