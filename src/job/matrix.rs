//! Integer matrices and the generators used to build demo jobs

use crate::error::PayloadError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense row-major integer matrix
///
/// Rows always have equal length; constructors that accept arbitrary rows
/// check this.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<i64>>", into = "Vec<Vec<i64>>")]
pub struct Matrix {
    rows: Vec<Vec<i64>>,
}

impl Matrix {
    /// Build from rows, rejecting ragged input
    pub fn from_rows(rows: Vec<Vec<i64>>) -> Result<Self, PayloadError> {
        if let Some(first) = rows.first() {
            let width = first.len();
            if rows.iter().any(|r| r.len() != width) {
                return Err(PayloadError::Ragged);
            }
        }
        Ok(Self { rows })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0)
    }

    pub fn filled(rows: usize, cols: usize, value: i64) -> Self {
        Self {
            rows: vec![vec![value; cols]; rows],
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.rows[i][i] = 1;
        }
        m
    }

    /// Values drawn uniformly from `0..max_value`
    pub fn random(rows: usize, cols: usize, max_value: i64) -> Self {
        let mut rng = rand::thread_rng();
        let upper = max_value.max(1);
        Self {
            rows: (0..rows)
                .map(|_| (0..cols).map(|_| rng.gen_range(0..upper)).collect())
                .collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn cols(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.cols() == 0
    }

    pub fn row(&self, index: usize) -> Option<&[i64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn as_rows(&self) -> &[Vec<i64>] {
        &self.rows
    }

    /// Local product, used to check distributed results
    pub fn multiply(&self, rhs: &Matrix) -> Result<Matrix, PayloadError> {
        if self.cols() != rhs.rows() {
            return Err(PayloadError::ShapeMismatch {
                row: self.cols(),
                rows: rhs.rows(),
            });
        }
        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| super::compute::multiply_row(i, row, rhs))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }
}

impl<const R: usize, const C: usize> From<[[i64; C]; R]> for Matrix {
    fn from(rows: [[i64; C]; R]) -> Self {
        Self {
            rows: rows.iter().map(|r| r.to_vec()).collect(),
        }
    }
}

impl TryFrom<Vec<Vec<i64>>> for Matrix {
    type Error = PayloadError;

    fn try_from(rows: Vec<Vec<i64>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<Matrix> for Vec<Vec<i64>> {
    fn from(m: Matrix) -> Self {
        m.rows
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .rows
            .iter()
            .flatten()
            .map(|v| v.to_string().len())
            .max()
            .unwrap_or(1);
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| format!("{:>width$}", v)).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_rejected() {
        assert_eq!(
            Matrix::from_rows(vec![vec![1, 2], vec![3]]),
            Err(PayloadError::Ragged)
        );
        assert!(Matrix::from_rows(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_generators() {
        let id = Matrix::identity(3);
        assert_eq!(id, Matrix::from([[1, 0, 0], [0, 1, 0], [0, 0, 1]]));

        let f = Matrix::filled(2, 3, 7);
        assert_eq!((f.rows(), f.cols()), (2, 3));
        assert!(f.as_rows().iter().flatten().all(|&v| v == 7));

        let r = Matrix::random(4, 5, 10);
        assert_eq!((r.rows(), r.cols()), (4, 5));
        assert!(r.as_rows().iter().flatten().all(|&v| (0..10).contains(&v)));
    }

    #[test]
    fn test_multiply() {
        let a = Matrix::from([[1, 2], [3, 4]]);
        let b = Matrix::from([[5, 6], [7, 8]]);
        assert_eq!(a.multiply(&b).unwrap(), Matrix::from([[19, 22], [43, 50]]));

        let m = Matrix::random(3, 3, 50);
        assert_eq!(m.multiply(&Matrix::identity(3)).unwrap(), m);
    }

    #[test]
    fn test_multiply_shape_mismatch() {
        let a = Matrix::from([[1, 2, 3]]);
        let b = Matrix::from([[1, 2], [3, 4]]);
        assert!(matches!(
            a.multiply(&b),
            Err(PayloadError::ShapeMismatch { row: 3, rows: 2 })
        ));
    }

    #[test]
    fn test_display() {
        let m = Matrix::from([[1, 22], [333, 4]]);
        assert_eq!(m.to_string(), "[  1  22]\n[333   4]\n");
    }

    #[test]
    fn test_serde_rejects_ragged() {
        let ok: Matrix = serde_json::from_str("[[1,2],[3,4]]").unwrap();
        assert_eq!(ok, Matrix::from([[1, 2], [3, 4]]));
        assert!(serde_json::from_str::<Matrix>("[[1,2],[3]]").is_err());
    }
}
