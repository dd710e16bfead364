//! State shared by every master-side task

use crate::config::MasterConfig;
use crate::distributed::queue::WorkQueue;
use crate::distributed::registry::Registry;
use crate::error::CoordinateError;
use crate::job::JobProgress;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Registry, queue and the active job, plus the settings that drive them
#[derive(Debug)]
pub struct MasterState {
    pub config: MasterConfig,
    pub registry: Registry,
    pub queue: WorkQueue,
    active: Mutex<Option<Arc<JobProgress>>>,
    next_job_id: AtomicU64,
}

impl MasterState {
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            queue: WorkQueue::new(),
            active: Mutex::new(None),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Session tag stamped on frames the master sends
    pub fn session_tag(&self) -> &str {
        self.config.client_tag.as_deref().unwrap_or("")
    }

    pub fn active_job(&self) -> Option<Arc<JobProgress>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Install a fresh job as the active one
    ///
    /// Only one job runs at a time; a second caller gets
    /// [`CoordinateError::JobInProgress`].
    pub fn begin_job(&self, rows: usize, cols: usize) -> Result<Arc<JobProgress>, CoordinateError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|job| !job.is_finished()) {
            return Err(CoordinateError::JobInProgress);
        }
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let job = Arc::new(JobProgress::new(id, rows, cols));
        self.queue.clear();
        *active = Some(job.clone());
        Ok(job)
    }

    /// Retire `job`: mark it finished, drop its pending units and clear the slot
    ///
    /// Units still held by workers stay in their slots; results for them are
    /// counted as stale when they arrive.
    pub fn end_job(&self, job: &JobProgress) {
        job.finish();
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(job_id = job.id(), dropped, "discarded pending units");
        }
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|a| a.id() == job.id()) {
            *active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::WorkUnit;

    #[test]
    fn test_single_active_job() {
        let state = MasterState::new(MasterConfig::default());
        let first = state.begin_job(2, 2).unwrap();
        assert_eq!(
            state.begin_job(2, 2).unwrap_err(),
            CoordinateError::JobInProgress
        );

        state.end_job(&first);
        assert!(state.active_job().is_none());

        let second = state.begin_job(1, 1).unwrap();
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_end_job_drops_pending_units() {
        let state = MasterState::new(MasterConfig::default());
        let job = state.begin_job(2, 2).unwrap();
        state.queue.enqueue(WorkUnit {
            job_id: job.id(),
            index: 0,
            payload: Vec::new(),
        });
        state.end_job(&job);
        assert!(state.queue.is_empty());
        assert!(job.is_finished());
    }

    #[test]
    fn test_session_tag() {
        let mut config = MasterConfig::default();
        assert_eq!(MasterState::new(config.clone()).session_tag(), "");
        config.client_tag = Some("lab".to_string());
        assert_eq!(MasterState::new(config).session_tag(), "lab");
    }
}
