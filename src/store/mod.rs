//! Durable persistence for pending submissions.
//!
//! The queue file is the sole durable record of submissions the server
//! has not yet acknowledged; everything else in the crate can be lost to
//! a process kill without dropping a report.

pub mod queue;

// Re-export key types
pub use queue::{DurableQueue, StoreError};
