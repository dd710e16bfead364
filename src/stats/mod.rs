//! Per-job statistics
//!
//! Counters are plain atomics so receive loops, the dispatcher and recovery
//! can bump them without coordination. The latency histogram sits behind a
//! short mutex.

pub mod histogram;

use histogram::LatencyHistogram;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct JobStats {
    dispatched: AtomicU64,
    requeued: AtomicU64,
    accepted: AtomicU64,
    duplicate_results: AtomicU64,
    stale_results: AtomicU64,
    rejected_results: AtomicU64,
    latency: Mutex<LatencyHistogram>,
}

impl JobStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A TASK frame was written to a worker
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A unit went back on the queue after its worker was lost
    pub fn record_requeue(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    /// A result filled a row; `latency` is assignment-to-result time if known
    pub fn record_accepted(&self, latency: Option<Duration>) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = latency {
            self.latency
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(latency);
        }
    }

    /// A result arrived for a row that was already filled
    pub fn record_duplicate(&self) {
        self.duplicate_results.fetch_add(1, Ordering::Relaxed);
    }

    /// A result arrived for a job that is no longer active
    pub fn record_stale(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    /// A result could not be decoded or did not fit the job's shape
    pub fn record_rejected(&self) {
        self.rejected_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn duplicate_results(&self) -> u64 {
        self.duplicate_results.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> StatsSummary {
        let latency = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        StatsSummary {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicate_results: self.duplicate_results.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            rejected_results: self.rejected_results.load(Ordering::Relaxed),
            latency_p50_us: latency.percentile(50.0).map(|d| d.as_micros() as u64),
            latency_p99_us: latency.percentile(99.0).map(|d| d.as_micros() as u64),
            latency_max_us: latency.max().map(|d| d.as_micros() as u64),
        }
    }
}

/// Snapshot of [`JobStats`], serializable for JSON output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub dispatched: u64,
    pub requeued: u64,
    pub accepted: u64,
    pub duplicate_results: u64,
    pub stale_results: u64,
    pub rejected_results: u64,
    pub latency_p50_us: Option<u64>,
    pub latency_p99_us: Option<u64>,
    pub latency_max_us: Option<u64>,
}
