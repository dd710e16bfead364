//! Domain error types
//!
//! Plumbing code uses `anyhow` (see [`crate::Result`]); the enums here name the
//! failures callers are expected to match on.

use thiserror::Error;

/// Wire frame decoding failures
///
/// Any of these means the byte stream can no longer be trusted and the
/// connection should be closed.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid frame: bad magic tag {0:?}")]
    BadMagic(String),

    #[error("invalid frame: truncated while reading {0}")]
    Truncated(&'static str),

    #[error("invalid frame: {field} length {len} exceeds limit {limit}")]
    LengthLimit {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("invalid frame: {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("invalid frame: unknown message type {0:?}")]
    UnknownType(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delimiter payload (`;` `|` `\` `,`) parse failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload is missing the {0} separator")]
    MissingSeparator(char),

    #[error("invalid row index {0:?}")]
    BadIndex(String),

    #[error("invalid number {0:?}")]
    BadNumber(String),

    #[error("matrix rows have inconsistent widths")]
    Ragged,

    #[error("row of length {row} cannot multiply matrix with {rows} rows")]
    ShapeMismatch { row: usize, rows: usize },

    #[error("arithmetic overflow computing row {0}")]
    Overflow(usize),
}

/// Registry mutations that can be refused
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("worker id {0:?} is already registered")]
    DuplicateId(String),
}

/// Job-level outcomes surfaced to the caller of the coordinator
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("no workers registered")]
    NoWorkers,

    #[error("unsupported operation {0:?}")]
    UnsupportedOperation(String),

    #[error("malformed job input: {0}")]
    MalformedInput(String),

    #[error("a job is already in progress")]
    JobInProgress,
}
