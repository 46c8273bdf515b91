//! Network-facing collaborators: reachability and delivery.
//!
//! - `connectivity`: edge-triggered reachability monitor
//! - `client`: one-shot submission delivery over HTTP

pub mod client;
pub mod connectivity;

// Re-export key types
pub use client::{Ack, HttpSubmitClient, StaticToken, StoredToken, SubmitClient, SubmitError, TokenProvider};
pub use connectivity::{ConnectivityMonitor, ConnectivityState, HttpProbe, MonitorHandle, ReachabilityProbe};
