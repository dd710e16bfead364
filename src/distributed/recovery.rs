//! Eviction and recovery of lost work
//!
//! Every path that gives up on a worker (detector timeout, failed write,
//! receive loop exit) ends in [`evict_worker`]. Only the first call for an id
//! does anything, so racing paths cannot double-requeue a unit.

use crate::distributed::registry::Assignment;
use crate::distributed::state::MasterState;
use tracing::{debug, info};

/// Remove `id`, close its connection and put its unit back on the queue
///
/// Returns `false` if the worker was already gone.
pub fn evict_worker(state: &MasterState, id: &str, reason: &str) -> bool {
    let Some(removed) = state.registry.remove(id) else {
        return false;
    };
    removed.conn.close();
    info!(
        worker = %id,
        peer = %removed.conn.peer(),
        silent_ms = removed.last_seen.elapsed().as_millis() as u64,
        reason,
        "evicted worker"
    );
    if let Some(assignment) = removed.assignment {
        requeue(state, id, assignment);
    }
    true
}

/// Return an orphaned unit to the tail of the queue
///
/// Skipped when the unit's job is no longer active or its row is already
/// written, since the result would be discarded anyway.
pub fn requeue(state: &MasterState, worker: &str, assignment: Assignment) -> bool {
    let unit = assignment.unit;
    let Some(job) = state.active_job() else {
        debug!(worker, job_id = unit.job_id, row = unit.index, "dropping unit of finished job");
        return false;
    };
    if job.id() != unit.job_id || job.is_finished() {
        debug!(worker, job_id = unit.job_id, row = unit.index, "dropping unit of finished job");
        return false;
    }
    if job.is_filled(unit.index) {
        debug!(worker, row = unit.index, "row already written, not requeueing");
        return false;
    }

    info!(worker, job_id = unit.job_id, row = unit.index, "requeued unit");
    job.stats().record_requeue();
    state.queue.enqueue(unit);
    true
}
