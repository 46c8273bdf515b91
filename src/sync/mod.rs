//! Offline-first reconciliation between the durable queue and the server.

pub mod reconciler;

// Re-export key types
pub use reconciler::{
    FlushOutcome, FlushReport, Notice, Reconciler, ReconcilerHandle, ServerErrorPolicy,
    SubmitDisposition, SubmitFailure,
};
