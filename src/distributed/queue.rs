//! Pending work-unit queue
//!
//! FIFO of units waiting for a worker. Producers are the coordinator (initial
//! partition), recovery (units lost with a dead worker) and the dispatcher
//! itself (units it could not place). The dispatcher is the only consumer.

use crate::job::WorkUnit;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct WorkQueue {
    units: Mutex<VecDeque<WorkUnit>>,
    available: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkUnit>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a unit at the tail
    pub fn enqueue(&self, unit: WorkUnit) {
        self.lock().push_back(unit);
        self.available.notify_one();
    }

    /// Take the head unit, waiting up to `timeout` for one to arrive
    pub async fn dequeue(&self, timeout: Duration) -> Option<WorkUnit> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(unit) = self.try_dequeue() {
                return Some(unit);
            }
            // notify_one stores a permit, so an enqueue racing this check is not lost
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.try_dequeue();
            }
        }
    }

    pub fn try_dequeue(&self) -> Option<WorkUnit> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every pending unit, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut units = self.lock();
        let n = units.len();
        units.clear();
        n
    }

    /// Row indices currently pending, in queue order
    pub fn pending_indices(&self) -> Vec<usize> {
        self.lock().iter().map(|u| u.index).collect()
    }
}
