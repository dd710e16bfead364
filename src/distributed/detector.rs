//! Heartbeat failure detector
//!
//! Scans the registry once per period and evicts every worker that has been
//! silent past the deadline or whose connection is already closed. A worker
//! that goes quiet is therefore gone at most `deadline + period` after its
//! last frame.

use crate::distributed::recovery::evict_worker;
use crate::distributed::state::MasterState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// Run the detector until the task is aborted
pub async fn run_detector(state: Arc<MasterState>) {
    let period = state.config.detector_period();
    let deadline = state.config.heartbeat_deadline();
    debug!(period_ms = period.as_millis() as u64, deadline_ms = deadline.as_millis() as u64, "failure detector started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep(&state, Instant::now(), deadline);
    }
}

/// One scan; returns the ids evicted by this call
pub fn sweep(state: &MasterState, now: Instant, deadline: Duration) -> Vec<String> {
    state
        .registry
        .expired(now, deadline)
        .into_iter()
        .filter(|id| evict_worker(state, id, "missed heartbeat deadline"))
        .collect()
}
