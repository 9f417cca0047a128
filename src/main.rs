//! Sumi-Dispatch main entry point
//!
//! This is the command-line interface for the Sumi-Dispatch URL scheduler.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_dispatch::config::{load_config_with_hash, Config};
use sumi_dispatch::output::{
    generate_markdown_summary, load_statistics, print_report, print_statistics,
};
use sumi_dispatch::storage::{JobSnapshot, SqliteJobStore};
use sumi_dispatch::{Coordinator, JobStatus};
use tracing_subscriber::EnvFilter;

/// Sumi-Dispatch: a polite URL scheduler
///
/// Sumi-Dispatch fetches a job's URLs through a pool of upstream proxies
/// while respecting per-host courtesy limits, retrying transient failures
/// and following discovered links.
#[derive(Parser, Debug)]
#[command(name = "sumi-dispatch")]
#[command(version = "1.0.0")]
#[command(about = "A polite URL scheduler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Continue the job saved in this snapshot file
    #[arg(long, value_name = "SNAPSHOT", conflicts_with_all = ["dry_run", "stats"])]
    resume: Option<PathBuf>,

    /// Validate config and show what would be dispatched without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Job to show with --stats (defaults to the latest)
    #[arg(long, value_name = "ID", requires = "stats")]
    job_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config, cli.job_id.as_deref())?;
    } else {
        handle_job(config, config_hash, cli.resume.as_deref()).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_dispatch=info,warn"),
            1 => EnvFilter::new("sumi_dispatch=debug,info"),
            2 => EnvFilter::new("sumi_dispatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Dispatch Dry Run ===\n");

    let job = &config.job;
    println!("Job:");
    println!("  Strategy: {:?}", job.strategy);
    println!("  Max depth: {}", job.max_depth);
    println!("  Max pages: {}", job.max_pages);
    println!("  Max retries: {}", job.max_retries);
    println!("  Workers: {}", job.max_concurrency);
    println!("  Fetch timeout: {}ms", job.max_fetch_duration_ms);
    println!("  Watchdog: {}ms", job.watchdog_timeout_ms);
    println!("  429 handling: {:?}", job.rate_limit_policy);

    let p = &config.politeness;
    println!("\nPoliteness:");
    println!("  Minimum delay: {}ms", p.min_delay_ms);
    println!("  Per-host concurrency: {}", p.max_concurrency);
    println!("  Maximum backoff: {}ms", p.max_host_backoff_ms);
    println!("  Respect robots.txt: {}", p.respect_robots);

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nProxies ({:?} rotation):", config.proxy.rotation);
    if config.proxy.direct {
        println!("  - direct connection");
    }
    for entry in &config.proxy.endpoints {
        println!("  - {} {} ({:?})", entry.id, entry.endpoint, entry.protocol);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Summary: {}", config.output.summary_path);
    if let Some(snapshot) = &config.output.snapshot_path {
        println!("  Snapshot: {}", snapshot);
    }

    println!("\nSeeds ({}):", job.seeds.len());
    for seed in &job.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config, job_id: Option<&str>) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = SqliteJobStore::new(Path::new(&config.output.database_path))?;
    match load_statistics(&store, job_id)? {
        Some(stats) => print_statistics(&stats),
        None => println!("No jobs recorded yet"),
    }

    Ok(())
}

/// Handles the main operation: runs (or resumes) a job
async fn handle_job(
    config: Config,
    config_hash: String,
    resume: Option<&Path>,
) -> anyhow::Result<()> {
    let summary_path = PathBuf::from(&config.output.summary_path);
    let snapshot_path = config.output.snapshot_path.clone().map(PathBuf::from);
    let mut coordinator = Coordinator::from_config(config)?.with_config_hash(config_hash);
    if let Some(path) = resume {
        let snapshot = JobSnapshot::load(path)
            .with_context(|| format!("failed to load snapshot {}", path.display()))?;
        coordinator = coordinator.restore(snapshot);
    }

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight attempts");
            cancel.cancel();
        }
    });

    let result = coordinator.run().await;

    if coordinator.status() == JobStatus::Cancelled {
        if let Some(path) = &snapshot_path {
            coordinator.snapshot().save(path)?;
            println!("Snapshot saved to: {}", path.display());
        }
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Job failed: {}", e);
            return Err(e.into());
        }
    };

    print_report(&report);
    generate_markdown_summary(&report, &coordinator.pool().records(), &summary_path)?;
    println!("\n✓ Summary written to: {}", summary_path.display());

    Ok(())
}
