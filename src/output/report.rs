use crate::crawler::JobCounts;
use crate::frontier::{AbandonedUrl, FrontierStats};
use crate::proxy::PoolHealth;
use crate::state::JobStatus;
use serde::Serialize;
use std::time::Duration;

/// Final (or current) account of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub frontier: FrontierStats,
    pub pool: PoolHealth,
    /// Each abandoned URL with the last recorded error kind
    pub abandoned: Vec<AbandonedUrl>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl JobReport {
    /// Share of finished tasks that ended Done, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.counts.succeeded + self.counts.abandoned;
        if finished == 0 {
            return 0.0;
        }
        self.counts.succeeded as f64 / finished as f64 * 100.0
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Prints the report to stdout
pub fn print_report(report: &JobReport) {
    println!("=== Job {} ===\n", report.job_id);
    println!("Status: {}", report.status);
    println!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!();

    let c = &report.counts;
    println!("Attempts:");
    println!("  Dispatched: {}", c.dispatched);
    println!("  Succeeded: {}", c.succeeded);
    println!("  Retried: {}", c.retried);
    println!("  Abandoned: {}", c.abandoned);
    println!("  Timeouts: {}", c.timeouts);
    println!("  Proxy stalls: {}", c.proxy_stalls);
    println!();

    let f = &report.frontier;
    println!("Frontier:");
    println!("  Accepted: {}", f.accepted);
    println!("  Pending: {}", f.pending);
    println!("  In flight: {}", f.in_flight);
    println!(
        "  Rejected: {} duplicate, {} depth, {} capacity, {} policy, {} invalid",
        f.rejected_duplicate,
        f.rejected_depth,
        f.rejected_capacity,
        f.rejected_policy,
        f.rejected_invalid
    );
    println!();

    println!(
        "Proxies: {} active, {} cooling, {} banned",
        report.pool.active, report.pool.cooling, report.pool.banned
    );

    if !report.abandoned.is_empty() {
        println!();
        println!("Abandoned URLs ({}):", report.abandoned.len());
        for url in &report.abandoned {
            let error = url.error.map(|e| e.code()).unwrap_or_else(|| "unknown".to_string());
            println!("  - {} [{} after {} attempt(s)]", url.url, error, url.attempts);
        }
    }

    println!();
    println!("Success Rate: {:.1}%", report.success_rate());
}
