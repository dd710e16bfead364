//! Worker runtime
//!
//! The worker side of the protocol:
//! - Connects to the master and sends REGISTER
//! - Sends HEARTBEAT every interval for the life of the connection
//! - Runs each TASK on a local rayon pool so a slow unit never blocks the
//!   receive loop
//! - Sends each RESULT back through the shared [`Connection`]
//!
//! A failed send or a closed master ends the run. Reconnection is left to
//! the caller.

use crate::config::WorkerConfig;
use crate::distributed::connection::Connection;
use crate::distributed::protocol::{read_frame, Frame, MessageType};
use crate::job::payload::{encode_result, peek_index};
use crate::job::{Computation, RowMultiply};
use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

/// Why a worker run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The master closed the connection between frames
    MasterClosed,
    /// A heartbeat or result could not be written
    SendFailed,
    /// The master sent bytes that are not a valid frame
    Protocol(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MasterClosed => write!(f, "master closed the connection"),
            ExitReason::SendFailed => write!(f, "send to master failed"),
            ExitReason::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

/// Summary returned when a worker run ends
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub reason: ExitReason,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Worker runtime
pub struct WorkerRuntime {
    config: WorkerConfig,
    computation: Arc<dyn Computation>,
}

impl WorkerRuntime {
    /// Runtime that multiplies rows
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_computation(config, Arc::new(RowMultiply))
    }

    pub fn with_computation(config: WorkerConfig, computation: Arc<dyn Computation>) -> Self {
        Self {
            config,
            computation,
        }
    }

    /// Identity this runtime will register with
    pub fn worker_id(&self) -> String {
        self.config
            .worker_id
            .clone()
            .unwrap_or_else(generate_worker_id)
    }

    /// Connect, register and serve tasks until the connection ends
    ///
    /// Errors only if the master cannot be reached or REGISTER cannot be sent;
    /// every later failure ends the run normally with an [`ExitReason`].
    pub async fn run(self) -> Result<WorkerSummary> {
        let id = self.worker_id();
        let session = self.config.client_tag.clone().unwrap_or_default();
        let addr = self.config.master_addr.clone();

        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("Timed out connecting to master at {}", addr))?
            .with_context(|| format!("Failed to connect to master at {}", addr))?;
        let _ = stream.set_nodelay(true);

        let (mut reader, writer) = stream.into_split();
        let conn = Arc::new(Connection::new(writer, addr.clone()));
        conn.send(&Frame::register(&id).with_session(&session))
            .await
            .context("Failed to send REGISTER")?;

        let threads = self.config.pool_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rowfarm-exec-{}", i))
            .build()
            .context("Failed to build execution pool")?;
        let pool = Arc::new(pool);
        info!(worker = %id, master = %addr, threads, "registered with master");

        let counters = Arc::new(Counters::default());
        // Dropping the set aborts the heartbeat and any result still in flight
        let mut tasks = JoinSet::new();
        tasks.spawn(heartbeat_loop(
            conn.clone(),
            id.clone(),
            session.clone(),
            self.config.heartbeat_interval(),
        ));

        let reason = loop {
            // read_frame is not cancel-safe, so only closing may interrupt it
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = conn.closed() => break ExitReason::SendFailed,
            };
            while tasks.try_join_next().is_some() {}
            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => break ExitReason::MasterClosed,
                Err(e) => break ExitReason::Protocol(e.to_string()),
            };

            match frame.kind {
                MessageType::Task => {
                    trace!(worker = %id, bytes = frame.payload.len(), "task received");
                    tasks.spawn(execute_task(
                        pool.clone(),
                        self.computation.clone(),
                        conn.clone(),
                        id.clone(),
                        session.clone(),
                        frame.payload,
                        counters.clone(),
                    ));
                }
                other => debug!(worker = %id, kind = %other, "ignoring frame"),
            }
        };

        conn.close();
        tasks.shutdown().await;

        let summary = WorkerSummary {
            worker_id: id,
            tasks_completed: counters.completed.load(Ordering::Relaxed),
            tasks_failed: counters.failed.load(Ordering::Relaxed),
            reason,
        };
        info!(
            worker = %summary.worker_id,
            completed = summary.tasks_completed,
            failed = summary.tasks_failed,
            reason = %summary.reason,
            "worker stopped"
        );
        Ok(summary)
    }
}

/// Heartbeat loop
///
/// Stops on the first failed send and closes the connection so the receive
/// loop ends too.
async fn heartbeat_loop(conn: Arc<Connection>, id: String, session: String, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // First tick is immediate; REGISTER has just gone out
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = conn.send(&Frame::heartbeat(&id).with_session(&session)).await {
            if !conn.is_closed() {
                warn!(worker = %id, error = %e, "failed to send heartbeat");
                conn.close();
            }
            break;
        }
        trace!(worker = %id, "heartbeat sent");
    }
}

/// Compute one unit on the pool and send its RESULT
///
/// A failed or panicking computation is answered with an empty row so the
/// master frees this worker's slot; the master leaves that row unfilled.
async fn execute_task(
    pool: Arc<rayon::ThreadPool>,
    computation: Arc<dyn Computation>,
    conn: Arc<Connection>,
    id: String,
    session: String,
    payload: Vec<u8>,
    counters: Arc<Counters>,
) {
    let index = peek_index(&payload);
    let (tx, rx) = oneshot::channel();
    pool.spawn(move || {
        // A panic escaping a rayon job aborts the process
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| computation.compute(&payload)))
            .unwrap_or_else(|cause| {
                Err(anyhow!("computation panicked: {}", panic_message(&*cause)))
            });
        let _ = tx.send(outcome);
    });

    let reply = match rx.await {
        Ok(Ok(reply)) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            reply
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(worker = %id, row = ?index, error = %e, "computation failed");
            match index {
                Some(index) => encode_result(index, &[]),
                None => return,
            }
        }
        // Pool dropped mid-computation
        Err(_) => return,
    };

    if let Err(e) = conn.send(&Frame::result(&id, reply).with_session(&session)).await {
        if !conn.is_closed() {
            warn!(worker = %id, row = ?index, error = %e, "failed to send result");
            conn.close();
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// `W-<host>-<nanos>`, unique enough across hosts and restarts
fn generate_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("W-{}-{}", host, nanos)
}
