//! Resumable job snapshots
//!
//! A snapshot holds everything needed to continue a cancelled job: the
//! frontier's seen set and unfinished tasks, and the proxy table. It is
//! written as JSON next to the database.

use crate::frontier::FrontierSnapshot;
use crate::proxy::SavedProxy;
use crate::storage::StorageError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Format version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub version: u32,
    pub job_id: String,
    pub config_hash: Option<String>,
    /// RFC 3339
    pub taken_at: String,
    pub frontier: FrontierSnapshot,
    pub proxies: Vec<SavedProxy>,
}

impl JobSnapshot {
    pub fn new(
        job_id: impl Into<String>,
        config_hash: Option<String>,
        frontier: FrontierSnapshot,
        proxies: Vec<SavedProxy>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            job_id: job_id.into(),
            config_hash,
            taken_at: Utc::now().to_rfc3339(),
            frontier,
            proxies,
        }
    }

    /// Writes the snapshot, replacing any file at `path`
    ///
    /// The JSON goes to a sibling temp file first and is renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        info!(
            "Snapshot of job {} written to {} ({} tasks)",
            self.job_id,
            path.display(),
            self.frontier.tasks.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let content = fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::Serialization(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}
