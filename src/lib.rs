//! rowfarm - fault-tolerant master/worker farm for row-partitioned matrix jobs
//!
//! A master accepts worker connections over TCP, splits `A × B` into one
//! unit per row of A and hands each unit to an idle worker. Workers that stop
//! heartbeating are evicted and their unit goes back on the queue, so a job
//! completes as long as one worker survives.
//!
//! # Architecture
//!
//! - **Wire protocol**: length-prefixed, self-describing frames
//! - **Single assignment**: a worker holds at most one unit at a time
//! - **At-least-once**: lost units are requeued, duplicate results ignored
//! - **Pluggable work**: workers run any [`job::Computation`] over task bytes

pub mod config;
pub mod distributed;
pub mod error;
pub mod job;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Master, WorkerRuntime};
pub use error::{CoordinateError, PayloadError, ProtocolError, RegistryError};
pub use job::{Job, JobOutcome, Matrix};

/// Result type used throughout rowfarm
pub type Result<T> = anyhow::Result<T>;
