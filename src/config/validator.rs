//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_master(&config.master)?;
    validate_worker(&config.worker)?;

    // Master deadline against the heartbeat cadence it is meant to observe
    if config.master.heartbeat_deadline_ms <= config.worker.heartbeat_interval_ms {
        anyhow::bail!(
            "heartbeat_deadline_ms ({}) must exceed the worker heartbeat_interval_ms ({})",
            config.master.heartbeat_deadline_ms,
            config.worker.heartbeat_interval_ms
        );
    }

    Ok(())
}

/// Validate master configuration
pub fn validate_master(master: &MasterConfig) -> Result<()> {
    if !is_host_port(&master.listen_addr) {
        anyhow::bail!("listen_addr must be host:port, got {:?}", master.listen_addr);
    }

    for (name, value) in [
        ("heartbeat_deadline_ms", master.heartbeat_deadline_ms),
        ("detector_period_ms", master.detector_period_ms),
        ("dispatch_poll_ms", master.dispatch_poll_ms),
        ("job_deadline_ms", master.job_deadline_ms),
        ("registration_timeout_ms", master.registration_timeout_ms),
    ] {
        if value == 0 {
            anyhow::bail!("{} must be greater than 0", name);
        }
    }

    if master.heartbeat_deadline_ms < master.detector_period_ms {
        anyhow::bail!(
            "heartbeat_deadline_ms ({}) must be at least detector_period_ms ({})",
            master.heartbeat_deadline_ms,
            master.detector_period_ms
        );
    }

    Ok(())
}

/// `host:port` with a numeric port; the host is resolved at bind time
fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.trim().is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Validate worker configuration
pub fn validate_worker(worker: &WorkerConfig) -> Result<()> {
    if worker.master_addr.trim().is_empty() {
        anyhow::bail!("master_addr must not be empty");
    }
    if worker.heartbeat_interval_ms == 0 {
        anyhow::bail!("heartbeat_interval_ms must be greater than 0");
    }
    if worker.connect_timeout_ms == 0 {
        anyhow::bail!("connect_timeout_ms must be greater than 0");
    }
    if let Some(id) = &worker.worker_id {
        if id.trim().is_empty() {
            anyhow::bail!("worker_id must not be blank");
        }
    }
    Ok(())
}
