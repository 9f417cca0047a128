//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Dispatch database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track jobs
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    config_hash TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    counts_json TEXT
);

-- One row per fetch attempt that reached the fetcher or the policy check
CREATE TABLE IF NOT EXISTS url_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    fingerprint TEXT NOT NULL,
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    depth INTEGER NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    error_code TEXT,
    status_code INTEGER,
    proxy_id TEXT,
    elapsed_ms INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_url_outcomes_job ON url_outcomes(job_id);
CREATE INDEX IF NOT EXISTS idx_url_outcomes_fingerprint ON url_outcomes(fingerprint);
CREATE INDEX IF NOT EXISTS idx_url_outcomes_state ON url_outcomes(state);

-- Proxy health, saved at the end of each job
CREATE TABLE IF NOT EXISTS proxies (
    id TEXT PRIMARY KEY,
    endpoint TEXT NOT NULL,
    protocol TEXT NOT NULL,
    status TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms REAL,
    consecutive_bans INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
