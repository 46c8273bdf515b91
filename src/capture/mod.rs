//! Voice capture: recorder backend and session state machine.
//!
//! The session owns the `Idle → Recording → Stopped` lifecycle and the
//! elapsed counter; the recorder trait hides the platform capture
//! mechanism and permission prompt.

pub mod recorder;
pub mod session;

// Re-export key types
pub use recorder::{CaptureError, CommandRecorder, Recorder};
pub use session::{RecordingSession, SessionState};
