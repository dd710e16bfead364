//! Jobs, work units and result assembly
//!
//! A [`Job`] is `A × B`. It is partitioned by rows of A: unit `i` carries row
//! `i` of A plus all of B, and its result is row `i` of the product. A
//! [`JobProgress`] collects result rows as they arrive and lets the
//! coordinator wait for the last one.

pub mod compute;
pub mod matrix;
pub mod payload;

pub use compute::{Computation, RowMultiply};
pub use matrix::Matrix;

use crate::error::CoordinateError;
use crate::stats::{JobStats, StatsSummary};
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One row of work, bound to the job that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub job_id: u64,
    pub index: usize,
    pub payload: Vec<u8>,
}

/// Operations a job can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Multiply,
}

impl FromStr for Operation {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multiply" | "matrix_multiply" | "block_multiply" => Ok(Operation::Multiply),
            _ => Err(CoordinateError::UnsupportedOperation(s.to_string())),
        }
    }
}

/// Validated `A × B`
#[derive(Debug, Clone)]
pub struct Job {
    lhs: Matrix,
    rhs: Matrix,
}

impl Job {
    pub fn multiply(lhs: Matrix, rhs: Matrix) -> Result<Self, CoordinateError> {
        if lhs.is_empty() || rhs.is_empty() {
            return Err(CoordinateError::MalformedInput(
                "matrices must have at least one row and one column".to_string(),
            ));
        }
        if lhs.cols() != rhs.rows() {
            return Err(CoordinateError::MalformedInput(format!(
                "cannot multiply {}x{} by {}x{}",
                lhs.rows(),
                lhs.cols(),
                rhs.rows(),
                rhs.cols()
            )));
        }
        Ok(Self { lhs, rhs })
    }

    /// `data × data`
    pub fn square(data: &Matrix) -> Result<Self, CoordinateError> {
        Self::multiply(data.clone(), data.clone())
    }

    /// Job for an operation name as accepted by the coordinator
    pub fn for_operation(operation: &str, data: &Matrix) -> Result<Self, CoordinateError> {
        match operation.parse::<Operation>()? {
            Operation::Multiply => Self::square(data),
        }
    }

    /// Rows in the result, which is also the number of units
    pub fn rows(&self) -> usize {
        self.lhs.rows()
    }

    pub fn cols(&self) -> usize {
        self.rhs.cols()
    }

    pub fn lhs(&self) -> &Matrix {
        &self.lhs
    }

    pub fn rhs(&self) -> &Matrix {
        &self.rhs
    }

    /// One unit per row of A, in row order
    pub fn partition(&self, job_id: u64) -> Vec<WorkUnit> {
        let rhs = payload::encode_matrix(&self.rhs);
        self.lhs
            .as_rows()
            .iter()
            .enumerate()
            .map(|(index, row)| WorkUnit {
                job_id,
                index,
                payload: payload::encode_task(index, row, &rhs),
            })
            .collect()
    }
}

/// What happened to one incoming result row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Row filled for the first time
    Accepted,
    /// Row was already filled; nothing changed
    Duplicate,
    /// Index or width does not fit this job
    Rejected,
}

/// Result rows of the active job
///
/// Each row is written at most once; the completed counter therefore never
/// exceeds the row count and duplicates are harmless.
#[derive(Debug)]
pub struct JobProgress {
    id: u64,
    cols: usize,
    rows: Vec<OnceLock<Vec<i64>>>,
    completed: AtomicUsize,
    finished: AtomicBool,
    changed: Notify,
    started: Instant,
    stats: JobStats,
}

impl JobProgress {
    pub fn new(id: u64, rows: usize, cols: usize) -> Self {
        Self {
            id,
            cols,
            rows: (0..rows).map(|_| OnceLock::new()).collect(),
            completed: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            changed: Notify::new(),
            started: Instant::now(),
            stats: JobStats::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total()
    }

    pub fn is_filled(&self, index: usize) -> bool {
        self.rows.get(index).is_some_and(|r| r.get().is_some())
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// Store row `index` unless it is already present
    pub fn record(&self, index: usize, values: Vec<i64>) -> RecordOutcome {
        let Some(slot) = self.rows.get(index) else {
            return RecordOutcome::Rejected;
        };
        if values.len() != self.cols {
            return RecordOutcome::Rejected;
        }
        if slot.set(values).is_err() {
            return RecordOutcome::Duplicate;
        }
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.total() {
            self.changed.notify_waiters();
        }
        RecordOutcome::Accepted
    }

    /// Mark the job as over, complete or not; wakes the dispatcher and waiters
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Resolves once every row is filled or the job is finished
    pub async fn wait(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between check and await is kept
            notified.as_mut().enable();
            if self.is_complete() || self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    /// Product assembled so far; unfilled rows are zeros
    pub fn snapshot(&self) -> Matrix {
        let rows = self
            .rows
            .iter()
            .map(|r| r.get().cloned().unwrap_or_else(|| vec![0; self.cols]))
            .collect();
        Matrix::from_rows(rows).unwrap_or_default()
    }

    /// Indices still missing, ascending
    pub fn missing(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.get().is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn outcome(&self) -> JobOutcome {
        JobOutcome {
            job_id: self.id,
            matrix: self.snapshot(),
            completed: self.completed(),
            total: self.total(),
            missing: self.missing(),
            elapsed: self.elapsed(),
            stats: self.stats.summary(),
        }
    }
}

/// Final state of a job as returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: u64,
    pub matrix: Matrix,
    pub completed: usize,
    pub total: usize,
    pub missing: Vec<usize>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub stats: StatsSummary,
}

impl JobOutcome {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
