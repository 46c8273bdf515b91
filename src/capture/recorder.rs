//! Audio capture backend.
//!
//! The platform recorder is an external collaborator: all this crate
//! needs is permission handling and an artifact path. `CommandRecorder`
//! shells out to a capture binary (arecord/sox style) the same way the
//! transcription backend shells out to whisper elsewhere in the stack.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors raised by recording-session usage and the capture backend
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("recorder failed: {0}")]
    Recorder(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to request capture permission and produce an artifact
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Request capture permission; `false` means denied
    async fn request_permission(&self) -> bool;

    /// Begin capturing to a fresh artifact
    async fn begin(&self) -> Result<(), CaptureError>;

    /// Finalize the capture and return the artifact reference
    async fn finish(&self) -> Result<PathBuf, CaptureError>;

    /// Release a discarded artifact
    async fn release(&self, artifact: &Path) -> Result<(), CaptureError>;
}

/// Recorder that drives an external capture binary.
///
/// The binary is expected to record until killed, writing to the path
/// given as its last argument (arecord and sox both fit).
pub struct CommandRecorder {
    binary: String,
    args: Vec<String>,
    output_dir: PathBuf,
    active: Mutex<Option<(Child, PathBuf)>>,
}

impl CommandRecorder {
    /// Create a recorder writing artifacts under `output_dir`.
    ///
    /// The binary comes from `MEDRELAY_RECORDER` when set.
    pub fn new(output_dir: PathBuf) -> Self {
        let binary =
            std::env::var("MEDRELAY_RECORDER").unwrap_or_else(|_| "arecord".to_string());
        Self {
            binary,
            args: vec!["-q".to_string(), "-f".to_string(), "cd".to_string()],
            output_dir,
            active: Mutex::new(None),
        }
    }

    /// Override the capture command line
    pub fn with_command(mut self, binary: impl Into<String>, args: Vec<String>) -> Self {
        self.binary = binary.into();
        self.args = args;
        self
    }
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn request_permission(&self) -> bool {
        // No OS prompt on this backend: a runnable capture binary is the
        // closest equivalent of a granted permission.
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn begin(&self) -> Result<(), CaptureError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let artifact = self.output_dir.join(format!("rec-{}.wav", Uuid::new_v4()));

        let child = Command::new(&self.binary)
            .args(&self.args)
            .arg(&artifact)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Recorder(format!("{}: {}", self.binary, e)))?;

        tracing::debug!(artifact = %artifact.display(), "capture started");
        *active = Some((child, artifact));
        Ok(())
    }

    async fn finish(&self) -> Result<PathBuf, CaptureError> {
        let (mut child, artifact) = self
            .active
            .lock()
            .await
            .take()
            .ok_or_else(|| CaptureError::Recorder("no capture in progress".to_string()))?;

        child
            .start_kill()
            .map_err(|e| CaptureError::Recorder(e.to_string()))?;
        let _ = child.wait().await;

        if !artifact.exists() {
            return Err(CaptureError::Recorder(format!(
                "capture produced no file: {}",
                artifact.display()
            )));
        }

        tracing::debug!(artifact = %artifact.display(), "capture finalized");
        Ok(artifact)
    }

    async fn release(&self, artifact: &Path) -> Result<(), CaptureError> {
        match tokio::fs::remove_file(artifact).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::Io(e)),
        }
    }
}
