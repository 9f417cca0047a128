//! Markdown summary generation
//!
//! This module generates a human-readable markdown summary of a finished
//! job: counts, frontier admission, proxy health and abandoned URLs.

use crate::output::{JobReport, OutputResult};
use crate::proxy::ProxyRecord;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Abandoned URLs listed individually before the rest are summarized
const MAX_ABANDONED_LISTED: usize = 50;

/// Writes the markdown summary of `report` to `output_path`
pub fn generate_markdown_summary(
    report: &JobReport,
    proxies: &[ProxyRecord],
    output_path: &Path,
) -> OutputResult<()> {
    let markdown = format_markdown_summary(report, proxies);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a job report as markdown
pub fn format_markdown_summary(report: &JobReport, proxies: &[ProxyRecord]) -> String {
    let mut md = String::new();

    md.push_str("# Sumi-Dispatch Job Summary\n\n");

    md.push_str("## Job Information\n\n");
    md.push_str(&format!("- **Job ID**: {}\n", report.job_id));
    md.push_str(&format!("- **Status**: {}\n", report.status));
    md.push_str(&format!(
        "- **Elapsed**: {:.1} seconds\n\n",
        report.elapsed.as_secs_f64()
    ));

    let c = &report.counts;
    md.push_str("## Attempts\n\n");
    md.push_str("| Result | Count |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| Dispatched | {} |\n", c.dispatched));
    md.push_str(&format!("| Succeeded | {} |\n", c.succeeded));
    md.push_str(&format!("| Retried | {} |\n", c.retried));
    md.push_str(&format!("| Abandoned | {} |\n", c.abandoned));
    md.push_str(&format!("| Timed out | {} |\n", c.timeouts));
    md.push_str(&format!("| Proxy stalls | {} |\n\n", c.proxy_stalls));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        report.success_rate()
    ));

    let f = &report.frontier;
    md.push_str("## Frontier\n\n");
    md.push_str(&format!("- **Accepted**: {}\n", f.accepted));
    md.push_str(&format!("- **Discovered links admitted**: {}\n", c.discovered));
    md.push_str(&format!("- **Left pending**: {}\n\n", f.pending));
    md.push_str("| Rejection | Count |\n");
    md.push_str("|-----------|-------|\n");
    md.push_str(&format!("| Duplicate | {} |\n", f.rejected_duplicate));
    md.push_str(&format!("| Depth exceeded | {} |\n", f.rejected_depth));
    md.push_str(&format!("| Capacity exceeded | {} |\n", f.rejected_capacity));
    md.push_str(&format!("| Policy disallowed | {} |\n", f.rejected_policy));
    md.push_str(&format!("| Invalid URL | {} |\n\n", f.rejected_invalid));

    if !proxies.is_empty() {
        md.push_str("## Proxies\n\n");
        md.push_str("| Proxy | Status | Successes | Failures | Avg latency | Bans |\n");
        md.push_str("|-------|--------|-----------|----------|-------------|------|\n");
        for proxy in proxies {
            let latency = proxy
                .avg_latency_ms
                .map(|ms| format!("{:.0} ms", ms))
                .unwrap_or_else(|| "-".to_string());
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                proxy.id,
                proxy.status,
                proxy.success_count,
                proxy.failure_count,
                latency,
                proxy.consecutive_bans
            ));
        }
        md.push('\n');
    }

    if !report.abandoned.is_empty() {
        let mut by_error: BTreeMap<String, usize> = BTreeMap::new();
        for url in &report.abandoned {
            let code = url.error.map(|e| e.code()).unwrap_or_else(|| "unknown".to_string());
            *by_error.entry(code).or_default() += 1;
        }

        md.push_str("## Abandoned URLs\n\n");
        md.push_str("| Error | Count |\n");
        md.push_str("|-------|-------|\n");
        for (code, count) in &by_error {
            md.push_str(&format!("| {} | {} |\n", code, count));
        }
        md.push('\n');

        for url in report.abandoned.iter().take(MAX_ABANDONED_LISTED) {
            let code = url.error.map(|e| e.code()).unwrap_or_else(|| "unknown".to_string());
            md.push_str(&format!("- {} ({}, {} attempts)\n", url.url, code, url.attempts));
        }
        if report.abandoned.len() > MAX_ABANDONED_LISTED {
            md.push_str(&format!(
                "\n... and {} more\n",
                report.abandoned.len() - MAX_ABANDONED_LISTED
            ));
        }
        md.push('\n');
    }

    md
}
