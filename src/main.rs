//! rowfarm CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use rowfarm::config::cli::{Cli, ExecutionMode, OutputFormat};
use rowfarm::config::toml::load_config;
use rowfarm::config::Config;
use rowfarm::util::time::format_duration;
use rowfarm::{Job, JobOutcome, Master, Matrix, WorkerRuntime};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate()?;

    let config = load_config(&cli).context("Configuration validation failed")?;
    init_logging(&config.logging.level);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    match cli.mode {
        ExecutionMode::Master => runtime.block_on(run_master(&cli, config)),
        ExecutionMode::Worker => runtime.block_on(run_worker(config)),
    }
}

/// Logs go to stderr; stdout carries only job output
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run in master mode
///
/// With `--rows` a single generated job is run and printed; otherwise the
/// master just serves workers until interrupted.
async fn run_master(cli: &Cli, config: Config) -> Result<()> {
    let master = Master::bind(config.master).await?;

    let Some(rows) = cli.rows else {
        tracing::info!("no job requested, serving workers until Ctrl-C");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        master.shutdown();
        return Ok(());
    };

    let lhs = Matrix::random(rows, rows, cli.max_value);
    let (job, rhs) = match cli.cols {
        Some(cols) => {
            let rhs = Matrix::random(rows, cols, cli.max_value);
            (Job::multiply(lhs.clone(), rhs.clone())?, rhs)
        }
        None => (Job::square(&lhs)?, lhs.clone()),
    };

    let outcome = master.run_job(job, cli.workers).await?;

    match cli.output {
        OutputFormat::Text => print_text(&outcome),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialize job outcome")?
        ),
    }

    if !outcome.is_complete() {
        anyhow::bail!(
            "job incomplete: {}/{} rows before the deadline",
            outcome.completed,
            outcome.total
        );
    }

    if cli.verify {
        let expected = lhs.multiply(&rhs).context("Local multiplication failed")?;
        if expected != outcome.matrix {
            anyhow::bail!("verification failed: distributed result differs from local product");
        }
        eprintln!("Verified against local multiplication");
    }

    Ok(())
}

/// Run in worker mode
async fn run_worker(config: Config) -> Result<()> {
    let summary = WorkerRuntime::new(config.worker).run().await?;
    eprintln!(
        "Worker {} stopped after {} tasks ({} failed): {}",
        summary.worker_id, summary.tasks_completed, summary.tasks_failed, summary.reason
    );
    Ok(())
}

fn print_text(outcome: &JobOutcome) {
    let stats = &outcome.stats;
    let micros = |v: Option<u64>| {
        v.map(|us| format_duration(Duration::from_micros(us)))
            .unwrap_or_else(|| "-".to_string())
    };

    println!(
        "Job {}: {}/{} rows in {}",
        outcome.job_id,
        outcome.completed,
        outcome.total,
        format_duration(outcome.elapsed)
    );
    println!(
        "  Dispatched: {}  Requeued: {}  Duplicates: {}  Stale: {}  Rejected: {}",
        stats.dispatched,
        stats.requeued,
        stats.duplicate_results,
        stats.stale_results,
        stats.rejected_results
    );
    println!(
        "  Round trip p50: {}  p99: {}  max: {}",
        micros(stats.latency_p50_us),
        micros(stats.latency_p99_us),
        micros(stats.latency_max_us)
    );
    if !outcome.missing.is_empty() {
        println!("  Missing rows: {:?}", outcome.missing);
    }
    println!();
    print!("{}", outcome.matrix);
}
