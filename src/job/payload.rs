//! Text payloads carried inside TASK and RESULT frames
//!
//! ```text
//! TASK   := index ';' row '|' matrix
//! RESULT := index ';' row
//! matrix := row ( '\' row )*
//! row    := value ( ',' value )*
//! ```
//!
//! The right-hand matrix is identical for every unit of a job, so callers
//! encode it once with [`encode_matrix`] and reuse the text.

use crate::error::PayloadError;
use crate::job::Matrix;

pub const INDEX_SEP: char = ';';
pub const OPERAND_SEP: char = '|';
pub const ROW_SEP: char = '\\';
pub const VALUE_SEP: char = ',';

/// Decoded TASK payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPayload {
    pub index: usize,
    pub row: Vec<i64>,
    pub rhs: Matrix,
}

fn join_values(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(VALUE_SEP.to_string().as_str())
}

fn parse_values(text: &str) -> Result<Vec<i64>, PayloadError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(VALUE_SEP)
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| PayloadError::BadNumber(v.to_string()))
        })
        .collect()
}

fn as_text(bytes: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(bytes).map_err(|_| PayloadError::InvalidUtf8)
}

fn split_index(text: &str) -> Result<(usize, &str), PayloadError> {
    let (index, rest) = text
        .split_once(INDEX_SEP)
        .ok_or(PayloadError::MissingSeparator(INDEX_SEP))?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|_| PayloadError::BadIndex(index.to_string()))?;
    Ok((index, rest))
}

pub fn encode_matrix(m: &Matrix) -> String {
    m.as_rows()
        .iter()
        .map(|r| join_values(r))
        .collect::<Vec<_>>()
        .join(ROW_SEP.to_string().as_str())
}

pub fn decode_matrix(text: &str) -> Result<Matrix, PayloadError> {
    if text.is_empty() {
        return Ok(Matrix::default());
    }
    let rows = text
        .split(ROW_SEP)
        .map(parse_values)
        .collect::<Result<Vec<_>, _>>()?;
    Matrix::from_rows(rows)
}

/// Build a TASK payload from a row and the pre-encoded right-hand matrix
pub fn encode_task(index: usize, row: &[i64], encoded_rhs: &str) -> Vec<u8> {
    format!("{}{}{}{}{}", index, INDEX_SEP, join_values(row), OPERAND_SEP, encoded_rhs)
        .into_bytes()
}

pub fn decode_task(bytes: &[u8]) -> Result<TaskPayload, PayloadError> {
    let (index, rest) = split_index(as_text(bytes)?)?;
    let (row, rhs) = rest
        .split_once(OPERAND_SEP)
        .ok_or(PayloadError::MissingSeparator(OPERAND_SEP))?;
    Ok(TaskPayload {
        index,
        row: parse_values(row)?,
        rhs: decode_matrix(rhs)?,
    })
}

/// Row index of a TASK or RESULT payload without decoding the rest
pub fn peek_index(bytes: &[u8]) -> Option<usize> {
    let end = bytes.iter().position(|&b| b == INDEX_SEP as u8)?;
    std::str::from_utf8(&bytes[..end]).ok()?.trim().parse().ok()
}

pub fn encode_result(index: usize, row: &[i64]) -> Vec<u8> {
    format!("{}{}{}", index, INDEX_SEP, join_values(row)).into_bytes()
}

pub fn decode_result(bytes: &[u8]) -> Result<(usize, Vec<i64>), PayloadError> {
    let (index, rest) = split_index(as_text(bytes)?)?;
    Ok((index, parse_values(rest)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_layout() {
        let rhs = Matrix::from([[5, 6], [7, 8]]);
        let payload = encode_task(1, &[3, 4], &encode_matrix(&rhs));
        assert_eq!(payload, b"1;3,4|5,6\\7,8");

        let task = decode_task(&payload).unwrap();
        assert_eq!(task.index, 1);
        assert_eq!(task.row, vec![3, 4]);
        assert_eq!(task.rhs, rhs);
    }

    #[test]
    fn test_result_layout_with_negatives() {
        let payload = encode_result(7, &[-1, 0, 42]);
        assert_eq!(payload, b"7;-1,0,42");
        assert_eq!(decode_result(&payload).unwrap(), (7, vec![-1, 0, 42]));
    }

    #[test]
    fn test_encode_matrix_separators() {
        let encoded = encode_matrix(&Matrix::from([[1, -2], [3, 4], [5, 6]]));
        let rows: Vec<&str> = encoded.split(ROW_SEP).collect();
        assert_eq!(rows, vec!["1,-2", "3,4", "5,6"]);
        assert!(rows.iter().all(|r| r.split(VALUE_SEP).count() == 2));
        assert_eq!(decode_matrix(&encoded).unwrap().rows(), 3);
    }

    #[test]
    fn test_decode_matrix() {
        assert_eq!(decode_matrix("1,2\\3,4").unwrap(), Matrix::from([[1, 2], [3, 4]]));
        assert_eq!(decode_matrix(" 1, 2 ").unwrap(), Matrix::from([[1, 2]]));
        assert!(decode_matrix("").unwrap().is_empty());
        assert_eq!(decode_matrix("1,2\\3"), Err(PayloadError::Ragged));
    }

    #[test]
    fn test_malformed_task() {
        assert_eq!(
            decode_task(b"no separators"),
            Err(PayloadError::MissingSeparator(';'))
        );
        assert_eq!(
            decode_task(b"0;1,2"),
            Err(PayloadError::MissingSeparator('|'))
        );
        assert_eq!(
            decode_task(b"x;1|1"),
            Err(PayloadError::BadIndex("x".to_string()))
        );
        assert_eq!(
            decode_task(b"0;1,a|1"),
            Err(PayloadError::BadNumber("a".to_string()))
        );
        assert_eq!(decode_task(&[0xff, 0xfe]), Err(PayloadError::InvalidUtf8));
    }

    #[test]
    fn test_malformed_result() {
        assert_eq!(decode_result(b"-1;2"), Err(PayloadError::BadIndex("-1".to_string())));
        assert_eq!(
            decode_result(b"3;1,,2"),
            Err(PayloadError::BadNumber(String::new()))
        );
        assert_eq!(decode_result(b"3;").unwrap(), (3, Vec::new()));
    }

    #[test]
    fn test_peek_index() {
        assert_eq!(peek_index(b"12;1,2|3,4"), Some(12));
        assert_eq!(peek_index(b"12"), None);
        assert_eq!(peek_index(b"x;1"), None);
    }
}
