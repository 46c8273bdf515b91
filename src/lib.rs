//! medrelay - offline-first issue submission core
//!
//! The durable heart of the patient companion app: accepts user-authored
//! issue reports (text and/or voice) while connectivity may be absent,
//! persists them, and reconciles them with the remote service once the
//! network returns, in order and without loss.
//!
//! # Architecture
//!
//! - Reports land in a durable FIFO queue when the service is unreachable
//! - A connectivity monitor emits one event per reachability transition
//! - The reconciler drains the queue sequentially on each restored edge
//! - Failed entries are requeued; only permanently rejected ones are dropped
//!
//! # Modules
//!
//! - `domain`: Data structures (Submission, SubmissionId)
//! - `store`: Durable queue persistence
//! - `net`: Connectivity monitor and HTTP submission client
//! - `sync`: The reconcile state machine
//! - `capture`: Voice recording session
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a report (queues automatically when offline)
//! medrelay submit --text "fever since yesterday"
//!
//! # Inspect the pending queue
//! medrelay status
//!
//! # Watch connectivity and flush on reconnect
//! medrelay watch
//! ```

pub mod capture;
pub mod cli;
pub mod config;
pub mod domain;
pub mod net;
pub mod store;
pub mod sync;

// Re-export main types at crate root for convenience
pub use capture::{CaptureError, RecordingSession, Recorder, SessionState};
pub use domain::{Submission, SubmissionError, SubmissionId};
pub use net::{
    Ack, ConnectivityMonitor, ConnectivityState, ReachabilityProbe, SubmitClient, SubmitError,
    TokenProvider,
};
pub use store::{DurableQueue, StoreError};
pub use sync::{
    FlushOutcome, FlushReport, Notice, Reconciler, ServerErrorPolicy, SubmitDisposition,
    SubmitFailure,
};
