//! Recording session lifecycle.
//!
//! One session per authoring screen: `Idle → Recording → Stopped`, with
//! `discard` returning `Stopped → Idle`. The elapsed counter runs on a
//! spawned one-second ticker that is aborted on stop, discard, and
//! drop, so no timer outlives its session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::recorder::{CaptureError, Recorder};

/// Lifecycle state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Stopped,
}

/// State machine for one voice-capture session
pub struct RecordingSession {
    recorder: Arc<dyn Recorder>,
    state: SessionState,
    elapsed: Arc<AtomicU64>,
    ticker: Option<tokio::task::JoinHandle<()>>,
    artifact: Option<PathBuf>,
}

impl RecordingSession {
    pub fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
            state: SessionState::Idle,
            elapsed: Arc::new(AtomicU64::new(0)),
            ticker: None,
            artifact: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whole seconds recorded so far in the current take
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    /// Artifact of the last stopped take, if not discarded
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Start a new take.
    ///
    /// Requests capture permission first; on denial the session stays
    /// `Idle`. Starting while already `Recording` is rejected. Starting
    /// from `Stopped` begins a fresh take; the previous artifact is left
    /// in place since a submission may already reference it.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.state == SessionState::Recording {
            return Err(CaptureError::AlreadyRecording);
        }

        if !self.recorder.request_permission().await {
            tracing::warn!("capture permission denied");
            return Err(CaptureError::PermissionDenied);
        }

        self.recorder.begin().await?;

        self.elapsed.store(0, Ordering::SeqCst);
        let elapsed = Arc::clone(&self.elapsed);
        self.ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }));

        self.artifact = None;
        self.state = SessionState::Recording;
        tracing::info!("recording started");
        Ok(())
    }

    /// Finalize the current take.
    ///
    /// Valid only from `Recording`; from any other state this is a
    /// no-op returning `None`. The returned path is usable as a
    /// submission's audio reference.
    pub async fn stop(&mut self) -> Result<Option<PathBuf>, CaptureError> {
        if self.state != SessionState::Recording {
            return Ok(None);
        }

        self.halt_ticker();

        match self.recorder.finish().await {
            Ok(artifact) => {
                self.state = SessionState::Stopped;
                self.artifact = Some(artifact.clone());
                tracing::info!(
                    artifact = %artifact.display(),
                    seconds = self.elapsed_secs(),
                    "recording stopped"
                );
                Ok(Some(artifact))
            }
            Err(e) => {
                // The take is gone either way; do not stay stuck in Recording
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Release the stopped take and return to `Idle`.
    ///
    /// No-op outside `Stopped`.
    pub async fn discard(&mut self) -> Result<(), CaptureError> {
        if self.state != SessionState::Stopped {
            return Ok(());
        }

        if let Some(artifact) = self.artifact.take() {
            self.recorder.release(&artifact).await?;
            tracing::debug!(artifact = %artifact.display(), "recording discarded");
        }
        self.state = SessionState::Idle;
        Ok(())
    }

    fn halt_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.halt_ticker();
    }
}
