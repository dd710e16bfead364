//! Connection registry
//!
//! The registry is the single owner of live worker records. Each record holds
//! the worker's connection, when it was last heard from, and its one
//! assignment slot. Every operation takes the internal lock for a short,
//! non-async critical section, so the acceptor, receive loops, dispatcher and
//! failure detector can all call in concurrently.
//!
//! Membership and slot changes bump a version counter on a watch channel.
//! Waiters (coordinator waiting for workers, dispatcher waiting for an idle
//! worker) park on that instead of sleep-polling.

use crate::distributed::connection::Connection;
use crate::error::RegistryError;
use crate::job::WorkUnit;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// A unit bound to a worker
#[derive(Debug, Clone)]
pub struct Assignment {
    pub unit: WorkUnit,
    pub assigned_at: Instant,
}

/// Record handed back by [`Registry::remove`]
#[derive(Debug)]
pub struct RemovedWorker {
    pub id: String,
    pub conn: Arc<Connection>,
    pub assignment: Option<Assignment>,
    pub last_seen: Instant,
}

/// Point-in-time view of one worker, for status output
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: String,
    pub peer: String,
    pub silent_for: Duration,
    pub in_flight: Option<usize>,
    pub frames_received: u64,
}

#[derive(Debug)]
struct WorkerEntry {
    conn: Arc<Connection>,
    last_seen: Instant,
    last_assigned: Option<Instant>,
    assignment: Option<Assignment>,
    frames_received: u64,
}

pub struct Registry {
    workers: Mutex<HashMap<String, WorkerEntry>>,
    changed: watch::Sender<u64>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            workers: Mutex::new(HashMap::new()),
            changed,
            next_seq: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkerEntry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.changed.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Receiver that observes every membership or slot change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Fresh master-assigned identity
    pub fn generate_id(&self) -> String {
        format!("W-{}", self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a worker; the id must not already be live
    pub fn register(&self, id: &str, conn: Arc<Connection>) -> Result<(), RegistryError> {
        {
            let mut workers = self.lock();
            if workers.contains_key(id) {
                return Err(RegistryError::DuplicateId(id.to_string()));
            }
            let now = Instant::now();
            workers.insert(
                id.to_string(),
                WorkerEntry {
                    conn,
                    last_seen: now,
                    last_assigned: None,
                    assignment: None,
                    frames_received: 0,
                },
            );
        }
        self.notify();
        Ok(())
    }

    /// Record that a frame arrived from `id`; `false` if it is no longer live
    pub fn touch(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                entry.frames_received += 1;
                true
            }
            None => false,
        }
    }

    /// Remove a worker, returning its record the first time only
    pub fn remove(&self, id: &str) -> Option<RemovedWorker> {
        let removed = self.lock().remove(id).map(|entry| RemovedWorker {
            id: id.to_string(),
            conn: entry.conn,
            assignment: entry.assignment,
            last_seen: entry.last_seen,
        });
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    /// Snapshot of live ids, sorted
    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Bind `unit` to an idle, open worker
    ///
    /// Only workers with an empty slot qualify; among those the one assigned
    /// least recently wins. Gives the unit back when nobody is idle.
    pub fn assign_idle(&self, unit: WorkUnit) -> Result<(String, Arc<Connection>), WorkUnit> {
        let mut workers = self.lock();

        let chosen = workers
            .iter()
            .filter(|(_, e)| e.assignment.is_none() && !e.conn.is_closed())
            .min_by(|(a_id, a), (b_id, b)| {
                a.last_assigned
                    .cmp(&b.last_assigned)
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| id.clone());

        let Some(id) = chosen else {
            return Err(unit);
        };
        let Some(entry) = workers.get_mut(&id) else {
            return Err(unit);
        };

        let now = Instant::now();
        entry.assignment = Some(Assignment {
            unit,
            assigned_at: now,
        });
        entry.last_assigned = Some(now);
        Ok((id, entry.conn.clone()))
    }

    /// Clear `id`'s slot if it holds the unit for row `index`
    pub fn complete(&self, id: &str, index: usize) -> Option<Assignment> {
        let taken = {
            let mut workers = self.lock();
            let entry = workers.get_mut(id)?;
            if matches!(&entry.assignment, Some(a) if a.unit.index == index) {
                entry.assignment.take()
            } else {
                None
            }
        };
        if taken.is_some() {
            self.notify();
        }
        taken
    }

    /// Clear `id`'s slot whatever it holds
    pub fn release(&self, id: &str) -> Option<Assignment> {
        let taken = self.lock().get_mut(id)?.assignment.take();
        if taken.is_some() {
            self.notify();
        }
        taken
    }

    /// `(job_id, row)` currently held by `id`
    pub fn assignment_of(&self, id: &str) -> Option<(u64, usize)> {
        self.lock()
            .get(id)?
            .assignment
            .as_ref()
            .map(|a| (a.unit.job_id, a.unit.index))
    }

    /// Number of workers currently holding a unit
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|e| e.assignment.is_some()).count()
    }

    /// Ids silent for longer than `deadline` or whose connection is closed
    pub fn expired(&self, now: Instant, deadline: Duration) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, e)| e.conn.is_closed() || now.saturating_duration_since(e.last_seen) > deadline)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        let now = Instant::now();
        let mut infos: Vec<WorkerInfo> = self
            .lock()
            .iter()
            .map(|(id, e)| WorkerInfo {
                id: id.clone(),
                peer: e.conn.peer().to_string(),
                silent_for: now.saturating_duration_since(e.last_seen),
                in_flight: e.assignment.as_ref().map(|a| a.unit.index),
                frames_received: e.frames_received,
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Wait until at least `count` workers are live or `timeout` elapses
    ///
    /// Returns the live count at the moment the wait ended.
    pub async fn wait_for_workers(&self, count: usize, timeout: Duration) -> usize {
        let mut rx = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let live = self.len();
            if live >= count {
                return live;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => return self.len(),
            }
        }
    }
}
