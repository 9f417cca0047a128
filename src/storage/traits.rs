//! Storage traits and error types
//!
//! This module defines the trait interface for job stores and
//! associated error types.

use crate::proxy::ProxyRecord;
use crate::state::TaskState;
use crate::storage::{JobRecord, UrlOutcomeRecord};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for job transitions, URL outcomes and proxy health
///
/// Implementations are shared between attempt tasks and must synchronize
/// internally. Callers on the dispatch path log and absorb errors.
pub trait JobStore: Send + Sync {
    // ===== Job Management =====

    /// Inserts the job or replaces its status, finish time and counts
    fn record_job(&self, job: &JobRecord) -> StorageResult<()>;

    /// Gets a job by id
    fn get_job(&self, job_id: &str) -> StorageResult<JobRecord>;

    /// Gets the most recently started job
    fn get_latest_job(&self) -> StorageResult<Option<JobRecord>>;

    // ===== URL Outcomes =====

    /// Appends one attempt's outcome
    fn record_url_outcome(&self, job_id: &str, outcome: &UrlOutcomeRecord) -> StorageResult<()>;

    /// All outcomes of a job in recording order
    fn get_url_outcomes(&self, job_id: &str) -> StorageResult<Vec<UrlOutcomeRecord>>;

    /// Number of recorded attempts per resulting state
    fn count_outcomes_by_state(&self, job_id: &str) -> StorageResult<HashMap<TaskState, u64>>;

    /// Error codes of a job's failed attempts with their counts, most common first
    fn get_error_summary(&self, job_id: &str) -> StorageResult<Vec<(String, u64)>>;

    // ===== Proxies =====

    /// Replaces the stored proxy table
    fn save_proxies(&self, proxies: &[ProxyRecord]) -> StorageResult<()>;

    /// Loads the stored proxy table in id order
    fn load_proxies(&self) -> StorageResult<Vec<ProxyRecord>>;
}
