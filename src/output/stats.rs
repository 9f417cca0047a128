//! Statistics from the job database
//!
//! Backs `--stats`: summarizes a stored job without running anything.

use crate::proxy::ProxyRecord;
use crate::state::TaskState;
use crate::storage::{JobRecord, JobStore};
use crate::SumiError;
use std::collections::HashMap;

/// A stored job and what its attempts came to
#[derive(Debug, Clone)]
pub struct JobStatistics {
    pub job: JobRecord,

    /// Recorded attempts per resulting state
    pub attempts_by_state: HashMap<TaskState, u64>,

    /// Error codes with their counts, most common first
    pub error_summary: Vec<(String, u64)>,

    pub proxies: Vec<ProxyRecord>,
}

impl JobStatistics {
    pub fn total_attempts(&self) -> u64 {
        self.attempts_by_state.values().sum()
    }
}

/// Loads statistics for `job_id`, or for the latest job when None
///
/// Returns Ok(None) when the database holds no job at all.
pub fn load_statistics(
    store: &dyn JobStore,
    job_id: Option<&str>,
) -> Result<Option<JobStatistics>, SumiError> {
    let job = match job_id {
        Some(id) => store.get_job(id)?,
        None => match store.get_latest_job()? {
            Some(job) => job,
            None => return Ok(None),
        },
    };

    Ok(Some(JobStatistics {
        attempts_by_state: store.count_outcomes_by_state(&job.id)?,
        error_summary: store.get_error_summary(&job.id)?,
        proxies: store.load_proxies()?,
        job,
    }))
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &JobStatistics) {
    println!("=== Job Statistics ===\n");

    println!("Job: {}", stats.job.id);
    println!("  Status: {}", stats.job.status);
    println!("  Started: {}", stats.job.started_at);
    if let Some(finished) = &stats.job.finished_at {
        println!("  Finished: {}", finished);
    }
    println!();

    let total = stats.total_attempts();
    println!("Attempts by Result ({} total):", total);
    let mut state_counts: Vec<_> = stats.attempts_by_state.iter().collect();
    state_counts.sort_by(|a, b| b.1.cmp(a.1));
    for (state, count) in state_counts {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !stats.error_summary.is_empty() {
        println!("Error Summary:");
        for (code, count) in &stats.error_summary {
            println!("  {}: {}", code, count);
        }
        println!();
    }

    if !stats.proxies.is_empty() {
        println!("Proxies ({}):", stats.proxies.len());
        for proxy in &stats.proxies {
            let latency = proxy
                .avg_latency_ms
                .map(|ms| format!("{:.0}ms", ms))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} [{}] {} ok / {} failed, avg {}",
                proxy.id, proxy.status, proxy.success_count, proxy.failure_count, latency
            );
        }
        println!();
    }

    if let Some(counts) = &stats.job.counts {
        println!(
            "Done: {} succeeded, {} abandoned, {} retries",
            counts.succeeded, counts.abandoned, counts.retried
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobStatus;
    use crate::storage::{SqliteJobStore, UrlOutcomeRecord};

    #[test]
    fn test_load_statistics() {
        let store = SqliteJobStore::new_in_memory().unwrap();
        assert!(load_statistics(&store, None).unwrap().is_none());

        store
            .record_job(&JobRecord {
                id: "j1".to_string(),
                status: JobStatus::Completed,
                config_hash: None,
                started_at: "2026-01-01T00:00:00+00:00".to_string(),
                finished_at: None,
                counts: None,
            })
            .unwrap();
        for (attempt, state) in [(1, TaskState::Failed), (2, TaskState::Done)] {
            store
                .record_url_outcome(
                    "j1",
                    &UrlOutcomeRecord {
                        fingerprint: "fp".to_string(),
                        url: "https://example.com/".to_string(),
                        host: "example.com".to_string(),
                        depth: 0,
                        state,
                        attempt,
                        error: None,
                        status_code: Some(200),
                        proxy_id: None,
                        elapsed_ms: 5,
                        recorded_at: "2026-01-01T00:00:01+00:00".to_string(),
                    },
                )
                .unwrap();
        }

        let stats = load_statistics(&store, None).unwrap().unwrap();
        assert_eq!(stats.job.id, "j1");
        assert_eq!(stats.total_attempts(), 2);
        assert!(load_statistics(&store, Some("missing")).is_err());
    }
}
