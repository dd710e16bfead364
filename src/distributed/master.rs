//! Master process: listener, registration and per-worker receive loops
//!
//! # Lifecycle
//!
//! 1. [`Master::bind`] opens the listener and starts the acceptor and the
//!    failure detector.
//! 2. Each accepted connection must open with REGISTER; the worker is then
//!    live in the registry and its receive loop runs until EOF, a protocol
//!    error, or eviction.
//! 3. Jobs run through [`Master::run_job`] / [`Master::coordinate`], one at a
//!    time.
//! 4. Dropping the [`Master`] (or calling [`Master::shutdown`]) stops every
//!    task and closes every worker connection.

use crate::config::MasterConfig;
use crate::distributed::connection::Connection;
use crate::distributed::coordinator;
use crate::distributed::detector::run_detector;
use crate::distributed::protocol::{read_frame, Frame, MessageType, PROTOCOL_VERSION};
use crate::distributed::recovery::evict_worker;
use crate::distributed::registry::WorkerInfo;
use crate::distributed::state::MasterState;
use crate::error::CoordinateError;
use crate::job::payload::decode_result;
use crate::job::{Job, JobOutcome, Matrix, RecordOutcome};
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

/// Running master
pub struct Master {
    state: Arc<MasterState>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
    detector: JoinHandle<()>,
}

impl Master {
    /// Bind the listener and start accepting workers
    pub async fn bind(config: MasterConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind master on {}", config.listen_addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!(addr = %local_addr, "master listening");

        let state = Arc::new(MasterState::new(config));
        let acceptor = tokio::spawn(accept_loop(state.clone(), listener));
        let detector = tokio::spawn(run_detector(state.clone()));

        Ok(Self {
            state,
            local_addr,
            acceptor,
            detector,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<MasterState> {
        &self.state
    }

    pub fn live_workers(&self) -> Vec<String> {
        self.state.registry.live_ids()
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.state.registry.workers()
    }

    /// Wait up to `timeout` for `count` workers; returns how many are live
    pub async fn wait_for_workers(&self, count: usize, timeout: std::time::Duration) -> usize {
        self.state.registry.wait_for_workers(count, timeout).await
    }

    /// Run one job to completion or deadline
    pub async fn run_job(&self, job: Job, desired_workers: usize) -> Result<JobOutcome, CoordinateError> {
        coordinator::run_job(&self.state, job, desired_workers).await
    }

    /// `data × data` for a named operation; `None` if the job could not run
    pub async fn coordinate(&self, operation: &str, data: &Matrix, desired_workers: usize) -> Option<Matrix> {
        coordinator::coordinate(&self.state, operation, data, desired_workers).await
    }

    /// Stop accepting, stop the detector and drop every worker
    pub fn shutdown(&self) {
        self.acceptor.abort();
        self.detector.abort();
        for id in self.state.registry.live_ids() {
            if let Some(removed) = self.state.registry.remove(&id) {
                removed.conn.close();
            }
        }
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(state: Arc<MasterState>, listener: TcpListener) {
    // Dropping the set (when this task is aborted) aborts every connection task
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    connections.spawn(serve_connection(state.clone(), stream, peer));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(state: Arc<MasterState>, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();
    let conn = Arc::new(Connection::new(writer, peer.to_string()));

    let id = match register(&state, &mut reader, &conn).await {
        Ok(id) => id,
        Err(e) => {
            warn!(%peer, error = %e, "registration failed");
            conn.close();
            return;
        }
    };

    let reason = receive_loop(&state, &id, &mut reader, &conn).await;
    evict_worker(&state, &id, reason);
}

/// Read the opening REGISTER and add the worker to the registry
///
/// The worker's own id is kept when it is non-empty and not already live;
/// otherwise the master assigns one.
async fn register(state: &MasterState, reader: &mut OwnedReadHalf, conn: &Arc<Connection>) -> Result<String> {
    let timeout = state.config.registration_timeout();
    let frame = tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| anyhow!("no REGISTER within {}ms", timeout.as_millis()))??
        .ok_or_else(|| anyhow!("connection closed before REGISTER"))?;

    if frame.kind != MessageType::Register {
        anyhow::bail!("expected REGISTER, got {}", frame.kind);
    }
    if frame.version != PROTOCOL_VERSION {
        warn!(peer = %conn.peer(), version = frame.version, "worker speaks a different protocol version");
    }

    let requested = frame.sender.trim();
    if !requested.is_empty() && state.registry.register(requested, conn.clone()).is_ok() {
        info!(worker = %requested, peer = %conn.peer(), session = %frame.session, "worker registered");
        return Ok(requested.to_string());
    }

    loop {
        let id = state.registry.generate_id();
        if state.registry.register(&id, conn.clone()).is_ok() {
            info!(
                worker = %id,
                requested = %requested,
                peer = %conn.peer(),
                session = %frame.session,
                "worker registered under assigned id"
            );
            return Ok(id);
        }
    }
}

/// Handle frames from a registered worker; returns why the loop ended
async fn receive_loop(
    state: &MasterState,
    id: &str,
    reader: &mut OwnedReadHalf,
    conn: &Connection,
) -> &'static str {
    loop {
        let frame = tokio::select! {
            frame = read_frame(reader) => frame,
            _ = conn.closed() => return "connection closed",
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return "worker disconnected",
            Err(e) => {
                warn!(worker = %id, error = %e, "dropping worker after protocol error");
                return "protocol error";
            }
        };

        if !state.registry.touch(id) {
            return "no longer registered";
        }

        match frame.kind {
            MessageType::Heartbeat => trace!(worker = %id, "heartbeat"),
            MessageType::Result => handle_result(state, id, &frame),
            MessageType::Register => debug!(worker = %id, "ignoring repeated REGISTER"),
            MessageType::Task => warn!(worker = %id, "ignoring TASK sent by a worker"),
        }
    }
}

/// Fold one RESULT into the active job
///
/// A row is written at most once. Results for a job that has ended are
/// counted as stale, a repeat of a written row as a duplicate. A result that
/// cannot be decoded or does not fit the job frees the worker's slot and the
/// row stays missing.
pub(crate) fn handle_result(state: &MasterState, worker: &str, frame: &Frame) {
    let Some(job) = state.active_job() else {
        debug!(worker, "result with no active job");
        state.registry.release(worker);
        return;
    };

    let (index, values) = match decode_result(&frame.payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(worker, error = %e, "undecodable result");
            job.stats().record_rejected();
            state.registry.release(worker);
            return;
        }
    };

    let assignment = state.registry.complete(worker, index);
    if let Some(a) = &assignment {
        if a.unit.job_id != job.id() {
            debug!(worker, job_id = a.unit.job_id, row = index, "stale result");
            job.stats().record_stale();
            return;
        }
    }
    let latency = assignment.as_ref().map(|a| a.assigned_at.elapsed());

    match job.record(index, values) {
        RecordOutcome::Accepted => {
            job.stats().record_accepted(latency);
            debug!(
                worker,
                row = index,
                completed = job.completed(),
                total = job.total(),
                "row accepted"
            );
        }
        RecordOutcome::Duplicate => {
            job.stats().record_duplicate();
            debug!(worker, row = index, "duplicate result ignored");
        }
        RecordOutcome::Rejected => {
            job.stats().record_rejected();
            if assignment.is_none() {
                state.registry.release(worker);
            }
            warn!(worker, row = index, "result does not fit the job, row left unfilled");
        }
    }
}
