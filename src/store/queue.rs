//! Durable FIFO store for not-yet-acknowledged submissions.
//!
//! The queue is persisted as a single JSON list and every mutation swaps
//! the whole list: the new contents are written to a temp file in the
//! same directory and renamed over the old file, so a crash never leaves
//! a half-written entry behind. An advisory file lock guards the
//! read-modify-write against a second process, and a tokio mutex
//! serializes callers within this one. The locked file work runs on a
//! blocking thread so a contended lock never stalls the runtime.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::Submission;

/// Errors that can occur with the durable queue
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue storage unavailable: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("failed to encode queue entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File-backed submission queue with whole-list-swap persistence
pub struct DurableQueue {
    /// Path to the queue JSON file
    queue_path: PathBuf,

    /// Serializes append/drain within this process
    serial: Mutex<()>,
}

impl DurableQueue {
    /// Create a queue backed by the given file
    pub fn new(queue_path: PathBuf) -> Self {
        Self {
            queue_path,
            serial: Mutex::new(()),
        }
    }

    /// Open the queue at the configured default location
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::queue_path()?))
    }

    /// Path to the backing file
    pub fn path(&self) -> &Path {
        &self.queue_path
    }

    /// Persist a submission as the new tail of the queue.
    ///
    /// Once this returns, the entry survives a process kill; a storage
    /// failure is returned to the caller so the submission is reported
    /// as "not saved" rather than silently assumed queued.
    pub async fn append(&self, submission: &Submission) -> Result<(), StoreError> {
        let _serial = self.serial.lock().await;
        let path = self.queue_path.clone();
        let entry = submission.clone();

        let pending = run_blocking(move || {
            let _lock = acquire_lock(&path)?;
            let mut entries = read_entries(&path)?;
            entries.push(entry);
            write_entries(&path, &entries)?;
            Ok(entries.len())
        })
        .await?;

        tracing::debug!(
            id = %submission.id,
            pending,
            "submission appended to queue"
        );
        Ok(())
    }

    /// Atomically take the entire queue contents, resetting it to empty.
    ///
    /// Returned entries preserve insertion order and are now in flight:
    /// the caller re-appends any that fail to submit.
    pub async fn drain_all(&self) -> Result<Vec<Submission>, StoreError> {
        let _serial = self.serial.lock().await;
        let path = self.queue_path.clone();

        run_blocking(move || {
            let _lock = acquire_lock(&path)?;
            let entries = read_entries(&path)?;
            if !entries.is_empty() {
                write_entries(&path, &[])?;
            }
            Ok(entries)
        })
        .await
    }

    /// Read-only view of the current queue contents
    pub async fn pending(&self) -> Result<Vec<Submission>, StoreError> {
        let _serial = self.serial.lock().await;
        let path = self.queue_path.clone();

        run_blocking(move || {
            let _lock = acquire_lock(&path)?;
            read_entries(&path)
        })
        .await
    }

    /// Number of entries currently queued
    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.pending().await?.len())
    }

    /// Whether the queue is currently empty
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}

/// Run locked file work on a blocking thread
async fn run_blocking<T, F>(work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Persistence(std::io::Error::new(
            std::io::ErrorKind::Other,
            e,
        ))),
    }
}

/// Take the advisory lock shared with other medrelay processes
fn acquire_lock(queue_path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = queue_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let lock_path = queue_path.with_extension("lock");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path)?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Load the persisted list.
///
/// A missing file is an empty queue. A corrupt file is logged and reset
/// to empty: losing unreadable entries beats handing the reconciler
/// garbage. Any other read failure means the store is unavailable and is
/// returned as such, so a mutation never overwrites entries it could not
/// see.
fn read_entries(queue_path: &Path) -> Result<Vec<Submission>, StoreError> {
    let raw = match fs::read_to_string(queue_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Persistence(e)),
    };

    match serde_json::from_str(&raw) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            tracing::error!(
                path = %queue_path.display(),
                error = %e,
                "corrupt queue file, resetting to empty"
            );
            write_entries(queue_path, &[])?;
            Ok(Vec::new())
        }
    }
}

/// Swap the persisted list via temp file + rename
fn write_entries(queue_path: &Path, entries: &[Submission]) -> Result<(), StoreError> {
    let parent = queue_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let json = serde_json::to_vec(entries)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(queue_path)
        .map_err(|e| StoreError::Persistence(e.error))?;

    Ok(())
}
