//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.

use crate::frontier::ErrorKind;
use crate::proxy::{ProxyProtocol, ProxyRecord, ProxyStatus};
use crate::state::{JobStatus, TaskState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::{JobRecord, UrlOutcomeRecord};
use crate::SumiError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const JOB_COLUMNS: &str = "id, status, config_hash, started_at, finished_at, counts_json";

const OUTCOME_COLUMNS: &str = "fingerprint, url, host, depth, state, attempt, error_code, \
     status_code, proxy_id, elapsed_ms, recorded_at";

/// SQLite job store
///
/// One connection behind a mutex; attempt tasks write through it
/// concurrently.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Creates a new SqliteJobStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteJobStore)` - Successfully opened/created database
    /// * `Err(SumiError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SumiError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, SumiError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<(JobRecord, Option<String>)> {
    let record = JobRecord {
        id: row.get(0)?,
        status: JobStatus::from_db_string(&row.get::<_, String>(1)?).unwrap_or(JobStatus::Failed),
        config_hash: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        counts: None,
    };
    Ok((record, row.get(5)?))
}

fn with_counts((mut record, counts_json): (JobRecord, Option<String>)) -> StorageResult<JobRecord> {
    if let Some(json) = counts_json {
        record.counts = Some(serde_json::from_str(&json)?);
    }
    Ok(record)
}

fn outcome_from_row(row: &Row<'_>) -> rusqlite::Result<UrlOutcomeRecord> {
    let error_code: Option<String> = row.get(6)?;
    Ok(UrlOutcomeRecord {
        fingerprint: row.get(0)?,
        url: row.get(1)?,
        host: row.get(2)?,
        depth: row.get(3)?,
        state: TaskState::from_db_string(&row.get::<_, String>(4)?).unwrap_or(TaskState::Failed),
        attempt: row.get(5)?,
        error: error_code.as_deref().and_then(ErrorKind::from_code),
        status_code: row.get(7)?,
        proxy_id: row.get(8)?,
        elapsed_ms: row.get::<_, i64>(9)? as u64,
        recorded_at: row.get(10)?,
    })
}

impl JobStore for SqliteJobStore {
    // ===== Job Management =====

    fn record_job(&self, job: &JobRecord) -> StorageResult<()> {
        let counts_json = job.counts.as_ref().map(serde_json::to_string).transpose()?;
        self.conn().execute(
            "INSERT INTO jobs (id, status, config_hash, started_at, finished_at, counts_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                finished_at = excluded.finished_at,
                counts_json = excluded.counts_json",
            params![
                job.id,
                job.status.to_db_string(),
                job.config_hash,
                job.started_at,
                job.finished_at,
                counts_json,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> StorageResult<JobRecord> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::JobNotFound(job_id.to_string()))?;
        with_counts(row)
    }

    fn get_latest_job(&self) -> StorageResult<Option<JobRecord>> {
        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM jobs ORDER BY started_at DESC, rowid DESC LIMIT 1",
                    JOB_COLUMNS
                ),
                [],
                job_from_row,
            )
            .optional()?;
        row.map(with_counts).transpose()
    }

    // ===== URL Outcomes =====

    fn record_url_outcome(&self, job_id: &str, outcome: &UrlOutcomeRecord) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO url_outcomes
             (job_id, fingerprint, url, host, depth, state, attempt, error_code,
              status_code, proxy_id, elapsed_ms, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job_id,
                outcome.fingerprint,
                outcome.url,
                outcome.host,
                outcome.depth,
                outcome.state.to_db_string(),
                outcome.attempt,
                outcome.error.map(|e| e.code()),
                outcome.status_code,
                outcome.proxy_id,
                outcome.elapsed_ms as i64,
                outcome.recorded_at,
            ],
        )?;
        Ok(())
    }

    fn get_url_outcomes(&self, job_id: &str) -> StorageResult<Vec<UrlOutcomeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM url_outcomes WHERE job_id = ?1 ORDER BY id",
            OUTCOME_COLUMNS
        ))?;

        let outcomes = stmt
            .query_map(params![job_id], outcome_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(outcomes)
    }

    fn count_outcomes_by_state(&self, job_id: &str) -> StorageResult<HashMap<TaskState, u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM url_outcomes WHERE job_id = ?1 GROUP BY state",
        )?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            if let Some(state) = TaskState::from_db_string(&state) {
                counts.insert(state, count as u64);
            }
        }
        Ok(counts)
    }

    fn get_error_summary(&self, job_id: &str) -> StorageResult<Vec<(String, u64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT error_code, COUNT(*) AS n FROM url_outcomes
             WHERE job_id = ?1 AND error_code IS NOT NULL
             GROUP BY error_code ORDER BY n DESC, error_code",
        )?;

        let summary = stmt
            .query_map(params![job_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summary)
    }

    // ===== Proxies =====

    fn save_proxies(&self, proxies: &[ProxyRecord]) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM proxies", [])?;
        for proxy in proxies {
            tx.execute(
                "INSERT INTO proxies
                 (id, endpoint, protocol, status, success_count, failure_count,
                  avg_latency_ms, consecutive_bans, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    proxy.id,
                    proxy.endpoint,
                    proxy.protocol.as_str(),
                    proxy.status.to_db_string(),
                    proxy.success_count as i64,
                    proxy.failure_count as i64,
                    proxy.avg_latency_ms,
                    proxy.consecutive_bans,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_proxies(&self) -> StorageResult<Vec<ProxyRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, endpoint, protocol, status, success_count, failure_count,
                    avg_latency_ms, consecutive_bans
             FROM proxies ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            let protocol: String = row.get(2)?;
            let status: String = row.get(3)?;
            let mut record = ProxyRecord::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                ProxyProtocol::from_db_string(&protocol).unwrap_or(ProxyProtocol::Http),
            );
            record.status = ProxyStatus::from_db_string(&status).unwrap_or(ProxyStatus::Active);
            record.success_count = row.get::<_, i64>(4)? as u64;
            record.failure_count = row.get::<_, i64>(5)? as u64;
            record.avg_latency_ms = row.get(6)?;
            record.consecutive_bans = row.get(7)?;
            Ok(record)
        })?;

        let mut proxies = Vec::new();
        for row in rows {
            proxies.push(row?);
        }
        Ok(proxies)
    }
}
