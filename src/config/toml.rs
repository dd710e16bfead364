//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Config {
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    // Master
    if let Some(listen) = &cli.listen {
        config.master.listen_addr = listen.clone();
    }
    if let Some(ms) = cli.heartbeat_deadline_ms {
        config.master.heartbeat_deadline_ms = ms;
    }
    if let Some(ms) = cli.detector_period_ms {
        config.master.detector_period_ms = ms;
    }
    if let Some(ms) = cli.job_deadline_ms {
        config.master.job_deadline_ms = ms;
    }
    if let Some(ms) = cli.worker_wait_ms {
        config.master.worker_wait_ms = ms;
    }

    // Worker
    if let Some(master) = &cli.master {
        config.worker.master_addr = master.clone();
    }
    if let Some(id) = &cli.worker_id {
        config.worker.worker_id = Some(id.clone());
    }
    if let Some(ms) = cli.heartbeat_ms {
        config.worker.heartbeat_interval_ms = ms;
    }
    if let Some(threads) = cli.threads {
        config.worker.pool_threads = Some(threads);
    }

    if let Some(tag) = &cli.client_tag {
        config.master.client_tag = Some(tag.clone());
        config.worker.client_tag = Some(tag.clone());
    }

    config
}

/// Build the effective configuration: file (if any), then CLI, then environment
pub fn load_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    let mut config = merge_cli_with_config(cli, base);
    config.apply_env();
    super::validator::validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_partial_toml() {
        let config = parse_toml_string(
            r#"
            [master]
            listen_addr = "127.0.0.1:7000"
            heartbeat_deadline_ms = 9000

            [worker]
            pool_threads = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.master.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.master.heartbeat_deadline_ms, 9000);
        // Unspecified fields keep their defaults
        assert_eq!(config.master.detector_period_ms, 2000);
        assert_eq!(config.worker.pool_threads, Some(2));
        assert_eq!(config.worker.heartbeat_interval_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(parse_toml_string("").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(parse_toml_string("[master\nlisten_addr = 1").is_err());
        assert!(parse_toml_string("[master]\nheartbeat_deadline_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file() {
        let err = parse_toml_file(Path::new("/nonexistent/rowfarm.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[master]\nlisten_addr = \"127.0.0.1:7000\"\njob_deadline_ms = 1000"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "rowfarm",
            "--config",
            &path,
            "--listen",
            "127.0.0.1:8000",
            "--log-level",
            "warn",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.master.listen_addr, "127.0.0.1:8000");
        assert_eq!(config.master.job_deadline_ms, 1000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_config_validates() {
        let cli = Cli::try_parse_from(["rowfarm", "--detector-period-ms", "0"]).unwrap();
        assert!(load_config(&cli).is_err());
    }
}
