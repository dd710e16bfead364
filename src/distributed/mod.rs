//! Master/worker distribution
//!
//! # Architecture
//!
//! A master accepts long-lived TCP connections from workers and farms out
//! row units of one job at a time:
//!
//! - **Master**: accepts workers, runs a receive loop per connection
//! - **Registry**: live workers, last-seen times and one assignment slot each
//! - **Detector**: evicts workers that go silent
//! - **Dispatcher**: moves queued units into idle workers' slots
//! - **Recovery**: puts a lost worker's unit back on the queue
//! - **Coordinator**: partitions a job and waits for its rows
//! - **Worker**: registers, heartbeats and computes units on a local pool
//!
//! # Modules
//!
//! - `protocol`: frame layout and codec
//! - `connection`: serialized write side of one stream

pub mod connection;
pub mod coordinator;
pub mod detector;
pub mod dispatcher;
pub mod master;
pub mod protocol;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod state;
pub mod worker;

// Re-export key types
pub use connection::Connection;
pub use master::Master;
pub use protocol::{Frame, MessageType, PROTOCOL_VERSION};
pub use registry::{Registry, WorkerInfo};
pub use worker::{ExitReason, WorkerRuntime, WorkerSummary};
