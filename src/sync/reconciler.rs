//! Queue reconciler: decides when to flush and resolves each entry.
//!
//! The reconciler is a two-state machine (`Idle`/`Flushing`) guarded by
//! an atomic flag. A flush is triggered by a `Reachable` connectivity
//! edge or an explicit request; a trigger that lands mid-flush is
//! dropped, and the entries it would have covered are picked up by the
//! next cycle. A cycle always terminates back in `Idle`: every failure
//! mode either requeues or drops the entry, nothing propagates out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::{Submission, SubmissionId};
use crate::net::{Ack, ConnectivityMonitor, ConnectivityState, SubmitClient, SubmitError};
use crate::store::{DurableQueue, StoreError};

/// How a flush cycle treats an ambiguous server-side failure.
///
/// The conservative default stops the batch, preserving order at the
/// cost of deferring later entries; `SkipEntry` requeues only the
/// failed entry and keeps sending, accepting a small reordering risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorPolicy {
    #[default]
    StopBatch,
    SkipEntry,
}

/// User-visible events emitted alongside the state machine
#[derive(Debug, Clone)]
pub enum Notice {
    /// Parked in the durable queue for a later flush
    Queued { id: SubmissionId },

    /// Acknowledged by the server
    Sent { id: SubmissionId, message: String },

    /// Permanently rejected and dropped from the queue
    Rejected { id: SubmissionId, reason: String },

    /// Could not be persisted; the user must re-attempt
    NotSaved { id: SubmissionId, reason: String },

    /// Entries remain queued after a flush attempt
    Pending { count: usize },
}

/// What happened to a directly submitted report
#[derive(Debug)]
pub enum SubmitDisposition {
    /// Delivered on the spot
    Sent(Ack),

    /// Parked in the queue (offline, or the immediate attempt failed)
    Queued,
}

/// Failures the submit path surfaces to the caller
#[derive(Debug, Error)]
pub enum SubmitFailure {
    #[error("submission not saved: {0}")]
    NotSaved(#[from] StoreError),

    #[error("submission rejected: {0}")]
    Rejected(SubmitError),
}

/// Tally of one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub requeued: usize,
    pub rejected: usize,
}

/// Result of a flush trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Completed(FlushReport),
    /// A cycle was already running; this trigger was dropped
    AlreadyFlushing,
}

/// Drains the durable queue and resolves success/failure per entry
pub struct Reconciler {
    queue: Arc<DurableQueue>,
    client: Arc<dyn SubmitClient>,
    monitor: Arc<ConnectivityMonitor>,
    policy: ServerErrorPolicy,
    flushing: AtomicBool,
    notice_tx: mpsc::Sender<Notice>,
}

impl Reconciler {
    /// Create a reconciler and the notice channel the UI layer consumes
    pub fn new(
        queue: Arc<DurableQueue>,
        client: Arc<dyn SubmitClient>,
        monitor: Arc<ConnectivityMonitor>,
        policy: ServerErrorPolicy,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (notice_tx, notice_rx) = mpsc::channel(64);
        (
            Self {
                queue,
                client,
                monitor,
                policy,
                flushing: AtomicBool::new(false),
                notice_tx,
            },
            notice_rx,
        )
    }

    /// Whether a flush cycle is currently in progress
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// Submit a new report.
    ///
    /// If the service is reachable, makes one best-effort delivery
    /// attempt and falls back to the queue on any retryable failure.
    /// Offline, the report goes straight to the queue and the call
    /// returns without waiting for the network.
    pub async fn submit(&self, submission: Submission) -> Result<SubmitDisposition, SubmitFailure> {
        if self.monitor.current_status().is_reachable() {
            match self.client.send(&submission).await {
                Ok(ack) => {
                    self.notify(Notice::Sent {
                        id: submission.id.clone(),
                        message: ack.message.clone(),
                    });
                    return Ok(SubmitDisposition::Sent(ack));
                }
                Err(e) if e.is_retryable() => {
                    warn!(id = %submission.id, error = %e, "direct send failed, queueing");
                    // fall through to the queue
                }
                Err(e) => {
                    self.notify(Notice::Rejected {
                        id: submission.id.clone(),
                        reason: e.to_string(),
                    });
                    return Err(SubmitFailure::Rejected(e));
                }
            }
        }

        match self.queue.append(&submission).await {
            Ok(()) => {
                info!(id = %submission.id, "submission queued for later delivery");
                self.notify(Notice::Queued {
                    id: submission.id.clone(),
                });
                Ok(SubmitDisposition::Queued)
            }
            Err(e) => {
                error!(id = %submission.id, error = %e, "submission could not be saved");
                self.notify(Notice::NotSaved {
                    id: submission.id.clone(),
                    reason: e.to_string(),
                });
                Err(SubmitFailure::NotSaved(e))
            }
        }
    }

    /// Trigger one flush cycle.
    ///
    /// No-op if a cycle is already running. Entries appended while the
    /// cycle runs stay in the store for the next trigger.
    pub async fn flush(&self) -> FlushOutcome {
        if self.flushing.swap(true, Ordering::SeqCst) {
            debug!("flush trigger dropped, cycle already in progress");
            return FlushOutcome::AlreadyFlushing;
        }

        let report = self.run_cycle().await;
        self.flushing.store(false, Ordering::SeqCst);
        FlushOutcome::Completed(report)
    }

    /// One drain-and-send cycle. Never fails: storage and network
    /// problems end the cycle early with the affected entries requeued.
    async fn run_cycle(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let drained = match self.queue.drain_all().await {
            Ok(drained) => drained,
            Err(e) => {
                error!(error = %e, "could not drain queue, skipping flush cycle");
                return report;
            }
        };

        if drained.is_empty() {
            debug!("queue empty, nothing to flush");
            return report;
        }

        info!(count = drained.len(), "flushing queued submissions");

        // Strictly sequential: each Ack is awaited before the next send
        // so entries reach the server in enqueue order.
        let mut entries = drained.into_iter();
        while let Some(entry) = entries.next() {
            match self.client.send(&entry).await {
                Ok(ack) => {
                    debug!(id = %entry.id, "queued submission delivered");
                    report.sent += 1;
                    self.notify(Notice::Sent {
                        id: entry.id,
                        message: ack.message,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    // A malformed entry can never succeed; dropping it is
                    // the one sanctioned reordering so later entries are
                    // not stuck behind it.
                    warn!(id = %entry.id, error = %e, "queued submission rejected, dropping");
                    report.rejected += 1;
                    self.notify(Notice::Rejected {
                        id: entry.id,
                        reason: e.to_string(),
                    });
                }
                Err(SubmitError::Server(status))
                    if self.policy == ServerErrorPolicy::SkipEntry =>
                {
                    warn!(id = %entry.id, status, "server error, requeueing entry and continuing");
                    self.requeue(entry, &mut report).await;
                }
                Err(e) => {
                    // Transient failure: connectivity likely dropped again.
                    // Requeue this entry and the unsent remainder in order
                    // and wait for the next trigger.
                    warn!(id = %entry.id, error = %e, "transient failure, stopping batch");
                    self.requeue(entry, &mut report).await;
                    for rest in entries.by_ref() {
                        self.requeue(rest, &mut report).await;
                    }
                    break;
                }
            }
        }

        if report.requeued > 0 {
            self.notify(Notice::Pending {
                count: report.requeued,
            });
        }

        info!(
            sent = report.sent,
            requeued = report.requeued,
            rejected = report.rejected,
            "flush cycle finished"
        );
        report
    }

    /// Put an in-flight entry back at the store tail
    async fn requeue(&self, entry: Submission, report: &mut FlushReport) {
        let id = entry.id.clone();
        match self.queue.append(&entry).await {
            Ok(()) => report.requeued += 1,
            Err(e) => {
                // Storage failing while the entry is out of the store is
                // the one place loss is possible; surface it loudly.
                error!(id = %id, error = %e, "failed to requeue in-flight submission");
                self.notify(Notice::NotSaved {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Run the reconcile loop: every `Reachable` edge triggers a flush.
    ///
    /// The loop runs independently of any UI lifecycle until the handle
    /// stops it or the event channel closes.
    pub fn spawn(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ConnectivityState>,
    ) -> ReconcilerHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let reconciler = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        debug!("reconciler stopping");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(ConnectivityState::Reachable) => {
                            info!("connectivity restored, flushing queue");
                            reconciler.flush().await;
                        }
                        Some(ConnectivityState::Unreachable) => {
                            debug!("connectivity lost");
                        }
                        None => break,
                    }
                }
            }
        });

        ReconcilerHandle { stop_tx, task }
    }

    /// Best-effort notice delivery; the queue itself never blocks on the UI
    fn notify(&self, notice: Notice) {
        if self.notice_tx.try_send(notice).is_err() {
            debug!("notice dropped, channel full or closed");
        }
    }
}

/// Handle to stop the reconcile loop
pub struct ReconcilerHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop and wait for it to exit
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::net::ReachabilityProbe;

    /// Client that replays a scripted sequence of outcomes
    struct ScriptedClient {
        script: std::sync::Mutex<VecDeque<Result<Ack, SubmitError>>>,
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<Ack, SubmitError>>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                sent: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn attempted(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubmitClient for ScriptedClient {
        async fn send(&self, submission: &Submission) -> Result<Ack, SubmitError> {
            self.sent
                .lock()
                .unwrap()
                .push(submission.text.clone().unwrap_or_default());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Ack { message: "ok".to_string() }))
        }
    }

    struct OfflineProbe;

    #[async_trait]
    impl ReachabilityProbe for OfflineProbe {
        async fn probe(&self) -> ConnectivityState {
            ConnectivityState::Unreachable
        }
    }

    fn offline_monitor() -> Arc<ConnectivityMonitor> {
        // Never started: current_status stays Unreachable
        Arc::new(ConnectivityMonitor::new(
            Arc::new(OfflineProbe),
            Duration::from_secs(3600),
        ))
    }

    fn ok() -> Result<Ack, SubmitError> {
        Ok(Ack { message: "ok".to_string() })
    }

    fn submission(text: &str) -> Submission {
        Submission::new(Some(text.to_string()), None, None).unwrap()
    }

    fn setup(
        script: Vec<Result<Ack, SubmitError>>,
        policy: ServerErrorPolicy,
    ) -> (Arc<Reconciler>, Arc<ScriptedClient>, Arc<DurableQueue>, TempDir) {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(DurableQueue::new(temp.path().join("queue.json")));
        let client = ScriptedClient::new(script);
        let (reconciler, _notices) = Reconciler::new(
            Arc::clone(&queue),
            client.clone() as Arc<dyn SubmitClient>,
            offline_monitor(),
            policy,
        );
        (Arc::new(reconciler), client, queue, temp)
    }

    #[tokio::test]
    async fn test_offline_submit_goes_to_queue() {
        let (reconciler, client, queue, _temp) = setup(vec![], ServerErrorPolicy::StopBatch);

        let disposition = reconciler.submit(submission("fever")).await.unwrap();
        assert!(matches!(disposition, SubmitDisposition::Queued));

        // No network attempt was made while unreachable
        assert!(client.attempted().is_empty());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_sends_in_enqueue_order() {
        let (reconciler, client, queue, _temp) =
            setup(vec![ok(), ok(), ok()], ServerErrorPolicy::StopBatch);

        for text in ["one", "two", "three"] {
            queue.append(&submission(text)).await.unwrap();
        }

        let outcome = reconciler.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                sent: 3,
                requeued: 0,
                rejected: 0
            })
        );
        assert_eq!(client.attempted(), vec!["one", "two", "three"]);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_network_error_stops_batch_and_requeues() {
        let (reconciler, client, queue, _temp) = setup(
            vec![ok(), Err(SubmitError::Network("reset".into()))],
            ServerErrorPolicy::StopBatch,
        );

        for text in ["a", "b", "c"] {
            queue.append(&submission(text)).await.unwrap();
        }

        let outcome = reconciler.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                sent: 1,
                requeued: 2,
                rejected: 0
            })
        );

        // Only "a" and the failing "b" hit the wire; "c" was never tried
        assert_eq!(client.attempted(), vec!["a", "b"]);

        // "b" and "c" are back in order for the next cycle
        let pending = queue.pending().await.unwrap();
        let texts: Vec<_> = pending.iter().map(|s| s.text.clone().unwrap()).collect();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_validation_error_drops_entry_and_continues() {
        let (reconciler, client, queue, _temp) = setup(
            vec![Err(SubmitError::Validation("bad payload".into())), ok()],
            ServerErrorPolicy::StopBatch,
        );

        queue.append(&submission("invalid")).await.unwrap();
        queue.append(&submission("valid")).await.unwrap();

        let outcome = reconciler.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                sent: 1,
                requeued: 0,
                rejected: 1
            })
        );
        assert_eq!(client.attempted(), vec!["invalid", "valid"]);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_policy_stop_batch() {
        let (reconciler, client, queue, _temp) = setup(
            vec![Err(SubmitError::Server(500))],
            ServerErrorPolicy::StopBatch,
        );

        queue.append(&submission("x")).await.unwrap();
        queue.append(&submission("y")).await.unwrap();

        reconciler.flush().await;
        assert_eq!(client.attempted(), vec!["x"]);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_server_error_policy_skip_entry() {
        let (reconciler, client, queue, _temp) = setup(
            vec![Err(SubmitError::Server(500)), ok()],
            ServerErrorPolicy::SkipEntry,
        );

        queue.append(&submission("x")).await.unwrap();
        queue.append(&submission("y")).await.unwrap();

        let outcome = reconciler.flush().await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                sent: 1,
                requeued: 1,
                rejected: 0
            })
        );

        // Both were attempted; only the failed one is queued again
        assert_eq!(client.attempted(), vec!["x", "y"]);
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending[0].text.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_auth_error_is_retryable() {
        let (reconciler, _client, queue, _temp) =
            setup(vec![Err(SubmitError::Auth)], ServerErrorPolicy::StopBatch);

        queue.append(&submission("needs token")).await.unwrap();
        reconciler.flush().await;

        // Still queued, waiting for re-auth plus the next trigger
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_flag_resets_after_cycle() {
        let (reconciler, _client, queue, _temp) = setup(vec![ok()], ServerErrorPolicy::StopBatch);

        queue.append(&submission("a")).await.unwrap();
        reconciler.flush().await;
        assert!(!reconciler.is_flushing());

        // A second trigger works normally
        queue.append(&submission("b")).await.unwrap();
        let outcome = reconciler.flush().await;
        assert!(matches!(outcome, FlushOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_empty_queue_flush_is_noop() {
        let (reconciler, client, _queue, _temp) = setup(vec![], ServerErrorPolicy::StopBatch);

        let outcome = reconciler.flush().await;
        assert_eq!(outcome, FlushOutcome::Completed(FlushReport::default()));
        assert!(client.attempted().is_empty());
    }
}
