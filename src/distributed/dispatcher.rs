//! Work dispatcher
//!
//! One dispatcher runs per job. It moves units from the queue into idle
//! workers' slots and writes the TASK frame. A worker never holds more than
//! one unit, so a busy cluster backs up into the queue rather than into
//! socket buffers.
//!
//! A TASK write that is cancelled partway (the job ended and the dispatcher
//! was aborted) leaves a torn frame on the stream, so that worker is evicted.

use crate::distributed::protocol::{Frame, MASTER_SENDER};
use crate::distributed::recovery::evict_worker;
use crate::distributed::state::MasterState;
use crate::job::JobProgress;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Evicts a worker whose TASK write never finished
struct SendGuard<'a> {
    state: &'a MasterState,
    worker: &'a str,
    armed: bool,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            evict_worker(self.state, self.worker, "task send interrupted");
        }
    }
}

/// Dispatch units of `job` until it completes or is finished
pub async fn run_dispatcher(state: Arc<MasterState>, job: Arc<JobProgress>) {
    let poll = state.config.dispatch_poll();
    let mut changes = state.registry.subscribe();
    debug!(job_id = job.id(), "dispatcher started");

    while !job.is_complete() && !job.is_finished() {
        let Some(unit) = state.queue.dequeue(poll).await else {
            continue;
        };
        if unit.job_id != job.id() {
            debug!(job_id = unit.job_id, row = unit.index, "discarding unit of another job");
            continue;
        }
        if job.is_filled(unit.index) {
            trace!(row = unit.index, "row already written, skipping");
            continue;
        }

        // Anything that changes from here on wakes the idle wait below
        changes.borrow_and_update();

        let index = unit.index;
        let frame = Frame::task(MASTER_SENDER, unit.payload.clone()).with_session(state.session_tag());
        match state.registry.assign_idle(unit) {
            Ok((worker, conn)) => {
                let mut guard = SendGuard {
                    state: state.as_ref(),
                    worker: &worker,
                    armed: true,
                };
                let sent = conn.send(&frame).await;
                guard.armed = false;
                drop(guard);

                match sent {
                    Ok(()) => {
                        job.stats().record_dispatch();
                        debug!(worker = %worker, row = index, "dispatched unit");
                    }
                    Err(e) => {
                        warn!(worker = %worker, row = index, error = %e, "failed to send task");
                        evict_worker(&state, &worker, "task send failed");
                    }
                }
            }
            Err(unit) => {
                state.queue.enqueue(unit);
                let _ = tokio::time::timeout(poll, changes.changed()).await;
            }
        }
    }

    debug!(
        job_id = job.id(),
        completed = job.completed(),
        total = job.total(),
        "dispatcher stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterConfig;
    use crate::distributed::connection::Connection;
    use crate::distributed::protocol::{read_frame, MessageType};
    use crate::job::{Job, Matrix};
    use std::time::Duration;

    fn state() -> Arc<MasterState> {
        Arc::new(MasterState::new(MasterConfig {
            dispatch_poll_ms: 20,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_one_unit_per_worker() {
        let state = state();
        let job_def = Job::square(&Matrix::from([[1, 2], [3, 4]])).unwrap();
        let job = state.begin_job(job_def.rows(), job_def.cols()).unwrap();
        for unit in job_def.partition(job.id()) {
            state.queue.enqueue(unit);
        }

        let (client, mut server) = tokio::io::duplex(4096);
        state
            .registry
            .register("w1", Arc::new(Connection::new(client, "test")))
            .unwrap();

        let dispatcher = tokio::spawn(run_dispatcher(state.clone(), job.clone()));

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(first.kind, MessageType::Task);
        assert_eq!(first.sender, MASTER_SENDER);
        assert_eq!(first.payload, b"0;1,2|1,2\\3,4");

        // Busy worker gets nothing more until its slot clears
        let second = tokio::time::timeout(Duration::from_millis(150), read_frame(&mut server)).await;
        assert!(second.is_err());
        assert_eq!(state.registry.assignment_of("w1"), Some((job.id(), 0)));

        state.registry.complete("w1", 0);
        job.record(0, vec![7, 10]);

        let next = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(next.payload, b"1;3,4|1,2\\3,4");

        state.registry.complete("w1", 1);
        job.record(1, vec![15, 22]);
        tokio::time::timeout(Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher should stop once the job is complete")
            .unwrap();
        assert_eq!(job.stats().dispatched(), 2);
    }

    #[tokio::test]
    async fn test_foreign_units_discarded() {
        let state = state();
        let job = state.begin_job(1, 1).unwrap();
        state.queue.enqueue(crate::job::WorkUnit {
            job_id: job.id() + 100,
            index: 0,
            payload: Vec::new(),
        });

        let dispatcher = tokio::spawn(run_dispatcher(state.clone(), job.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(state.queue.is_empty());

        job.finish();
        tokio::time::timeout(Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher should stop once the job is finished")
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_evicts_and_requeues() {
        let state = state();
        let job = state.begin_job(1, 1).unwrap();
        state.queue.enqueue(crate::job::WorkUnit {
            job_id: job.id(),
            index: 0,
            payload: b"0;1|1".to_vec(),
        });

        // Peer end gone: the write fails with a broken pipe
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        state
            .registry
            .register("w1", Arc::new(Connection::new(client, "test")))
            .unwrap();

        let dispatcher = tokio::spawn(run_dispatcher(state.clone(), job.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!state.registry.contains("w1"));
        assert_eq!(state.queue.pending_indices(), vec![0]);
        assert_eq!(job.stats().requeued(), 1);
        assert_eq!(job.stats().dispatched(), 0);

        job.finish();
        dispatcher.await.unwrap();
    }
}
