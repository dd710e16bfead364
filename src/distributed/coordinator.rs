//! Job coordinator
//!
//! The coordinator:
//! - Waits (bounded) for the requested number of workers
//! - Partitions the job into one unit per output row and queues them
//! - Starts the job's dispatcher
//! - Waits for the last row or the job deadline
//! - Returns the assembled product, partial on timeout

use crate::distributed::dispatcher::run_dispatcher;
use crate::distributed::state::MasterState;
use crate::error::CoordinateError;
use crate::job::{Job, JobOutcome, JobProgress, Matrix};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long a finished job's dispatcher gets to wind down before it is aborted
const DISPATCHER_GRACE: Duration = Duration::from_secs(1);

/// Keeps the active job slot consistent however `run_job` exits
struct ActiveJob<'a> {
    state: &'a MasterState,
    progress: Arc<JobProgress>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ActiveJob<'_> {
    /// Finish the job and let the dispatcher leave its loop
    ///
    /// A dispatcher stuck writing to a worker that stopped reading is aborted;
    /// it evicts that worker on the way out.
    async fn stop(&mut self) {
        self.progress.finish();
        let Some(mut dispatcher) = self.dispatcher.take() else {
            return;
        };
        if tokio::time::timeout(DISPATCHER_GRACE, &mut dispatcher).await.is_err() {
            warn!(job_id = self.progress.id(), "dispatcher still sending, aborting it");
            dispatcher.abort();
        }
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        self.state.end_job(&self.progress);
    }
}

/// Run `job` on the connected workers
///
/// Fails with [`CoordinateError::NoWorkers`] only if nobody registered within
/// the worker wait. Reaching the job deadline is not an error: the outcome
/// carries whatever rows arrived and `is_complete()` is false.
pub async fn run_job(
    state: &Arc<MasterState>,
    job: Job,
    desired_workers: usize,
) -> Result<JobOutcome, CoordinateError> {
    let progress = state.begin_job(job.rows(), job.cols())?;
    let mut active = ActiveJob {
        state: state.as_ref(),
        progress: progress.clone(),
        dispatcher: None,
    };

    let live = state
        .registry
        .wait_for_workers(desired_workers, state.config.worker_wait())
        .await;
    if live == 0 {
        warn!(job_id = progress.id(), "no workers registered, abandoning job");
        return Err(CoordinateError::NoWorkers);
    }
    if live < desired_workers {
        warn!(
            job_id = progress.id(),
            live,
            desired = desired_workers,
            "starting with fewer workers than requested"
        );
    }

    info!(
        job_id = progress.id(),
        rows = job.rows(),
        cols = job.cols(),
        workers = live,
        "starting job"
    );
    for unit in job.partition(progress.id()) {
        state.queue.enqueue(unit);
    }
    active.dispatcher = Some(tokio::spawn(run_dispatcher(state.clone(), progress.clone())));

    let deadline = state.config.job_deadline();
    if tokio::time::timeout(deadline, progress.wait()).await.is_err() {
        warn!(
            job_id = progress.id(),
            completed = progress.completed(),
            total = progress.total(),
            missing = ?progress.missing(),
            "job deadline reached"
        );
    }

    active.stop().await;
    drop(active);
    let outcome = progress.outcome();
    info!(
        job_id = outcome.job_id,
        completed = outcome.completed,
        total = outcome.total,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        requeued = outcome.stats.requeued,
        "job finished"
    );
    Ok(outcome)
}

/// Run a named operation over `data`
///
/// Returns `None` when there are no workers, the operation is unknown or the
/// input is malformed. A job that hits its deadline still returns its
/// partial matrix; use [`run_job`] to tell the two apart.
pub async fn coordinate(
    state: &Arc<MasterState>,
    operation: &str,
    data: &Matrix,
    desired_workers: usize,
) -> Option<Matrix> {
    let job = match Job::for_operation(operation, data) {
        Ok(job) => job,
        Err(e) => {
            warn!(operation, error = %e, "rejecting job");
            return None;
        }
    };
    match run_job(state, job, desired_workers).await {
        Ok(outcome) => Some(outcome.matrix),
        Err(e) => {
            warn!(operation, error = %e, "job did not run");
            None
        }
    }
}
