//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Master - accept workers and run jobs
    Master,
    /// Worker - connect to a master and execute units
    Worker,
}

/// Result output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// rowfarm - fault-tolerant master/worker farm for row-partitioned matrix jobs
#[derive(Parser, Debug)]
#[command(name = "rowfarm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: master or worker
    #[arg(long, value_enum, default_value = "master")]
    pub mode: ExecutionMode,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. info, debug, rowfarm=trace); RUST_LOG wins
    #[arg(long)]
    pub log_level: Option<String>,

    // === Master Options ===
    /// Address to listen on (master mode)
    #[arg(long)]
    pub listen: Option<String>,

    /// Evict workers silent for longer than this many milliseconds
    #[arg(long)]
    pub heartbeat_deadline_ms: Option<u64>,

    /// Failure detector scan period in milliseconds
    #[arg(long)]
    pub detector_period_ms: Option<u64>,

    /// Give up on a job after this many milliseconds
    #[arg(long)]
    pub job_deadline_ms: Option<u64>,

    /// Wait this long for the requested workers before starting a job
    #[arg(long)]
    pub worker_wait_ms: Option<u64>,

    // === Demo Job Options (master mode) ===
    /// Rows of the generated input matrix; runs one job when set
    #[arg(long)]
    pub rows: Option<usize>,

    /// Columns of the generated right-hand matrix (defaults to a square job)
    #[arg(long)]
    pub cols: Option<usize>,

    /// Generated values are drawn from 0..max-value
    #[arg(long, default_value = "10")]
    pub max_value: i64,

    /// Number of workers to wait for before starting the job
    #[arg(short = 'w', long, default_value = "1")]
    pub workers: usize,

    /// Compare the distributed result against a local multiplication
    #[arg(long)]
    pub verify: bool,

    /// Output format for the job result
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    // === Worker Options ===
    /// Master address to connect to (worker mode)
    #[arg(long)]
    pub master: Option<String>,

    /// Worker identity (worker mode)
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Client/session tag stamped on every frame
    #[arg(long, env = "CLIENT_TAG")]
    pub client_tag: Option<String>,

    /// Heartbeat interval in milliseconds (worker mode)
    #[arg(long)]
    pub heartbeat_ms: Option<u64>,

    /// Execution pool size (worker mode, defaults to CPU count)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
}

impl Cli {
    /// Argument checks that do not need the merged configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == ExecutionMode::Worker {
            return Ok(());
        }

        if self.rows == Some(0) {
            anyhow::bail!("--rows must be at least 1");
        }
        if self.cols == Some(0) {
            anyhow::bail!("--cols must be at least 1");
        }
        if self.cols.is_some() && self.rows.is_none() {
            anyhow::bail!("--cols requires --rows");
        }
        if self.max_value < 1 {
            anyhow::bail!("--max-value must be at least 1, got {}", self.max_value);
        }
        if self.workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        Ok(())
    }
}
