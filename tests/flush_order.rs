//! End-to-end ordering and recovery behavior of the offline queue.
//!
//! Covers the delivery guarantees: FIFO flush order, durability across a
//! simulated process restart, rejected entries not blocking the queue,
//! and the reconnect-triggered flush of reports authored offline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use medrelay::{
    Ack, ConnectivityMonitor, ConnectivityState, DurableQueue, ReachabilityProbe, Reconciler,
    ServerErrorPolicy, Submission, SubmitClient, SubmitError,
};

/// Client that accepts everything except entries whose text contains
/// "invalid", recording the order of attempts.
struct RecordingClient {
    attempts: Mutex<Vec<String>>,
}

impl RecordingClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmitClient for RecordingClient {
    async fn send(&self, submission: &Submission) -> Result<Ack, SubmitError> {
        let label = submission
            .text
            .clone()
            .or_else(|| {
                submission
                    .audio_ref
                    .as_ref()
                    .map(|p| p.display().to_string())
            })
            .unwrap_or_default();
        self.attempts.lock().unwrap().push(label.clone());

        if label.contains("invalid") {
            return Err(SubmitError::Validation("malformed payload".to_string()));
        }
        Ok(Ack {
            message: "received".to_string(),
        })
    }
}

/// Probe driven by a shared flag
struct SwitchProbe {
    up: Arc<AtomicBool>,
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self) -> ConnectivityState {
        if self.up.load(Ordering::SeqCst) {
            ConnectivityState::Reachable
        } else {
            ConnectivityState::Unreachable
        }
    }
}

fn switch_monitor(up: bool) -> (Arc<ConnectivityMonitor>, Arc<AtomicBool>) {
    let flag = Arc::new(AtomicBool::new(up));
    let probe = Arc::new(SwitchProbe {
        up: Arc::clone(&flag),
    });
    (
        Arc::new(ConnectivityMonitor::new(probe, Duration::from_millis(5))),
        flag,
    )
}

fn text_submission(text: &str) -> Submission {
    Submission::new(Some(text.to_string()), None, None).unwrap()
}

#[tokio::test]
async fn test_flush_preserves_append_order() {
    let temp = TempDir::new().unwrap();
    let queue = Arc::new(DurableQueue::new(temp.path().join("queue.json")));
    let client = RecordingClient::new();
    let (monitor, _flag) = switch_monitor(false);

    for text in ["first", "second", "third", "fourth"] {
        queue.append(&text_submission(text)).await.unwrap();
    }

    let (reconciler, _notices) = Reconciler::new(
        Arc::clone(&queue),
        client.clone() as Arc<dyn SubmitClient>,
        monitor,
        ServerErrorPolicy::StopBatch,
    );
    reconciler.flush().await;

    assert_eq!(client.attempts(), vec!["first", "second", "third", "fourth"]);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_queue_survives_restart_before_flush() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("queue.json");

    {
        let queue = DurableQueue::new(path.clone());
        queue.append(&text_submission("persisted")).await.unwrap();
        // Dropped here: the process "dies" before any flush
    }

    let queue = Arc::new(DurableQueue::new(path));
    let client = RecordingClient::new();
    let (monitor, _flag) = switch_monitor(false);

    let (reconciler, _notices) = Reconciler::new(
        Arc::clone(&queue),
        client.clone() as Arc<dyn SubmitClient>,
        monitor,
        ServerErrorPolicy::StopBatch,
    );
    reconciler.flush().await;

    assert_eq!(client.attempts(), vec!["persisted"]);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_rejected_entry_does_not_block_later_entries() {
    let temp = TempDir::new().unwrap();
    let queue = Arc::new(DurableQueue::new(temp.path().join("queue.json")));
    let client = RecordingClient::new();
    let (monitor, _flag) = switch_monitor(false);

    queue.append(&text_submission("invalid entry")).await.unwrap();
    queue.append(&text_submission("valid entry")).await.unwrap();

    let (reconciler, mut notices) = Reconciler::new(
        Arc::clone(&queue),
        client.clone() as Arc<dyn SubmitClient>,
        monitor,
        ServerErrorPolicy::StopBatch,
    );
    reconciler.flush().await;

    // Both attempted, the malformed one dropped, the valid one delivered
    assert_eq!(client.attempts(), vec!["invalid entry", "valid entry"]);
    assert!(queue.is_empty().await.unwrap());

    // The rejection was surfaced as a user-visible notice
    let mut saw_rejection = false;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, medrelay::Notice::Rejected { .. }) {
            saw_rejection = true;
        }
    }
    assert!(saw_rejection);
}

#[tokio::test]
async fn test_empty_submission_never_enters_queue() {
    let result = Submission::new(None, None, None);
    assert!(result.is_err());

    let result = Submission::new(Some("   ".to_string()), None, None);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_offline_reports_flush_on_reconnect() {
    let temp = TempDir::new().unwrap();
    let queue = Arc::new(DurableQueue::new(temp.path().join("queue.json")));
    let client = RecordingClient::new();
    let (monitor, flag) = switch_monitor(false);

    let (reconciler, _notices) = Reconciler::new(
        Arc::clone(&queue),
        client.clone() as Arc<dyn SubmitClient>,
        Arc::clone(&monitor),
        ServerErrorPolicy::StopBatch,
    );
    let reconciler = Arc::new(reconciler);

    let (events, monitor_handle) = monitor.start();
    let reconciler_handle = reconciler.spawn(events);

    // Author two reports while unreachable: text first, then a voice memo
    reconciler
        .submit(text_submission("fever"))
        .await
        .unwrap();
    reconciler
        .submit(Submission::new(None, Some(PathBuf::from("rec1.wav")), None).unwrap())
        .await
        .unwrap();

    assert_eq!(queue.len().await.unwrap(), 2);
    assert!(client.attempts().is_empty());

    // Connectivity returns; the edge event drives a flush
    flag.store(true, Ordering::SeqCst);

    let mut drained = false;
    for _ in 0..200 {
        if queue.is_empty().await.unwrap() && client.attempts().len() == 2 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drained, "queue was not flushed after reconnect");

    assert_eq!(client.attempts(), vec!["fever", "rec1.wav"]);

    reconciler_handle.stop().await.unwrap();
    monitor_handle.stop().await.unwrap();
}
