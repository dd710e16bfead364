//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! All durations are stored as milliseconds and exposed as [`Duration`]
//! through accessor methods.

pub mod cli;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming the worker identity
pub const WORKER_ID_ENV: &str = "WORKER_ID";

/// Environment variable naming the client/session tag
pub const CLIENT_TAG_ENV: &str = "CLIENT_TAG";

/// Complete process configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Master-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Address the master listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// A worker silent for longer than this is evicted
    #[serde(default = "default_heartbeat_deadline_ms")]
    pub heartbeat_deadline_ms: u64,
    /// How often the failure detector scans the registry
    #[serde(default = "default_detector_period_ms")]
    pub detector_period_ms: u64,
    /// Dispatcher queue poll timeout
    #[serde(default = "default_dispatch_poll_ms")]
    pub dispatch_poll_ms: u64,
    /// How long a job waits for the requested number of workers
    #[serde(default = "default_worker_wait_ms")]
    pub worker_wait_ms: u64,
    /// How long a job waits for its last result
    #[serde(default = "default_job_deadline_ms")]
    pub job_deadline_ms: u64,
    /// How long a new connection has to send REGISTER
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
    /// Session tag stamped on frames the master sends
    #[serde(default)]
    pub client_tag: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9999".to_string()
}

fn default_heartbeat_deadline_ms() -> u64 {
    6000
}

fn default_detector_period_ms() -> u64 {
    2000
}

fn default_dispatch_poll_ms() -> u64 {
    100
}

fn default_worker_wait_ms() -> u64 {
    5000
}

fn default_job_deadline_ms() -> u64 {
    30_000
}

fn default_registration_timeout_ms() -> u64 {
    5000
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            heartbeat_deadline_ms: default_heartbeat_deadline_ms(),
            detector_period_ms: default_detector_period_ms(),
            dispatch_poll_ms: default_dispatch_poll_ms(),
            worker_wait_ms: default_worker_wait_ms(),
            job_deadline_ms: default_job_deadline_ms(),
            registration_timeout_ms: default_registration_timeout_ms(),
            client_tag: None,
        }
    }
}

impl MasterConfig {
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.heartbeat_deadline_ms)
    }

    pub fn detector_period(&self) -> Duration {
        Duration::from_millis(self.detector_period_ms)
    }

    pub fn dispatch_poll(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms)
    }

    pub fn worker_wait(&self) -> Duration {
        Duration::from_millis(self.worker_wait_ms)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_millis(self.job_deadline_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    /// Fill an unset client tag from `CLIENT_TAG`
    pub fn apply_env(&mut self) {
        if self.client_tag.is_none() {
            self.client_tag = env_value(CLIENT_TAG_ENV);
        }
    }
}

/// Worker-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Master address to connect to
    #[serde(default = "default_master_addr")]
    pub master_addr: String,
    /// Fixed identity; generated when unset
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Session tag stamped on outgoing frames
    #[serde(default)]
    pub client_tag: Option<String>,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Execution pool size; defaults to the CPU count
    #[serde(default)]
    pub pool_threads: Option<usize>,
}

fn default_master_addr() -> String {
    "127.0.0.1:9999".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_addr: default_master_addr(),
            worker_id: None,
            client_tag: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_threads: None,
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pool_threads(&self) -> usize {
        self.pool_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Fill unset id and tag from `WORKER_ID` / `CLIENT_TAG`
    pub fn apply_env(&mut self) {
        if self.worker_id.is_none() {
            self.worker_id = env_value(WORKER_ID_ENV);
        }
        if self.client_tag.is_none() {
            self.client_tag = env_value(CLIENT_TAG_ENV);
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn apply_env(&mut self) {
        self.master.apply_env();
        self.worker.apply_env();
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
