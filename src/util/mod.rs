//! Small shared utilities

pub mod time;
