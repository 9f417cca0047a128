//! Storage module for persisting job data
//!
//! This module handles:
//! - SQLite database initialization and schema management
//! - Job status transitions
//! - Per-attempt URL outcomes
//! - The proxy table
//! - JSON snapshots for resuming a cancelled job

mod schema;
mod snapshot;
mod sqlite;
mod traits;

pub use snapshot::{JobSnapshot, SNAPSHOT_VERSION};
pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StorageError, StorageResult};

use crate::crawler::JobCounts;
use crate::frontier::ErrorKind;
use crate::state::{JobStatus, TaskState};
use crate::SumiError;
use std::path::Path;

/// Opens (or creates) the job database at `path`
pub fn open_store(path: &Path) -> Result<SqliteJobStore, SumiError> {
    SqliteJobStore::new(path)
}

/// A job as stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub config_hash: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    /// Final counters, present once the job has ended
    pub counts: Option<JobCounts>,
}

/// One attempt's result for a URL
#[derive(Debug, Clone, PartialEq)]
pub struct UrlOutcomeRecord {
    pub fingerprint: String,
    pub url: String,
    pub host: String,
    pub depth: u32,
    /// Done, Failed (will be retried) or Abandoned
    pub state: TaskState,
    /// 1-based attempt number
    pub attempt: u32,
    pub error: Option<ErrorKind>,
    pub status_code: Option<u16>,
    pub proxy_id: Option<String>,
    pub elapsed_ms: u64,
    pub recorded_at: String,
}
