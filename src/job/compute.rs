//! Worker-side computation
//!
//! The worker runtime never looks inside a TASK payload; it hands the bytes
//! to a [`Computation`] and ships whatever comes back as the RESULT payload.

use crate::error::PayloadError;
use crate::job::payload::{decode_task, encode_result};
use crate::job::Matrix;

/// Turns a TASK payload into a RESULT payload
///
/// Implementations run on the worker's blocking pool, never on the async
/// runtime, so they may take as long as the work needs.
pub trait Computation: Send + Sync {
    fn compute(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>>;
}

impl<F> Computation for F
where
    F: Fn(&[u8]) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    fn compute(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        self(payload)
    }
}

/// One row of A times all of B
#[derive(Debug, Clone, Copy, Default)]
pub struct RowMultiply;

impl Computation for RowMultiply {
    fn compute(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        let task = decode_task(payload)?;
        let row = multiply_row(task.index, &task.row, &task.rhs)?;
        Ok(encode_result(task.index, &row))
    }
}

/// `row × rhs`, failing on shape mismatch or i64 overflow
pub fn multiply_row(index: usize, row: &[i64], rhs: &Matrix) -> Result<Vec<i64>, PayloadError> {
    if row.len() != rhs.rows() {
        return Err(PayloadError::ShapeMismatch {
            row: row.len(),
            rows: rhs.rows(),
        });
    }
    (0..rhs.cols())
        .map(|j| {
            row.iter()
                .zip(rhs.as_rows())
                .try_fold(0i64, |acc, (&a, b_row)| {
                    a.checked_mul(b_row[j]).and_then(|p| acc.checked_add(p))
                })
                .ok_or(PayloadError::Overflow(index))
        })
        .collect()
}
