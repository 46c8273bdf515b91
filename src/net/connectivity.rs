//! Network reachability monitor.
//!
//! Wraps a platform reachability signal behind the [`ReachabilityProbe`]
//! trait and polls it from a background task. Consecutive identical
//! observations are coalesced so subscribers see exactly one event per
//! genuine transition; the point-in-time status is kept in shared state
//! for synchronous checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Binary reachability of the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Reachable,
    Unreachable,
}

impl ConnectivityState {
    pub fn is_reachable(self) -> bool {
        matches!(self, Self::Reachable)
    }
}

/// Source of reachability observations.
///
/// One call is one probe; the monitor owns coalescing and scheduling.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> ConnectivityState;
}

/// Probe that issues a short-timeout HEAD request against the API base URL
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> ConnectivityState {
        // Any HTTP response at all means the network path is up;
        // status codes are the submission client's concern.
        match self.client.head(&self.url).send().await {
            Ok(_) => ConnectivityState::Reachable,
            Err(_) => ConnectivityState::Unreachable,
        }
    }
}

/// Polls a probe and emits edge-triggered transition events
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    reachable: Arc<AtomicBool>,
}

impl ConnectivityMonitor {
    /// Create a monitor; the state is pessimistically `Unreachable`
    /// until the first probe lands.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            reachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point-in-time reachability check
    pub fn current_status(&self) -> ConnectivityState {
        if self.reachable.load(Ordering::SeqCst) {
            ConnectivityState::Reachable
        } else {
            ConnectivityState::Unreachable
        }
    }

    /// Start the poll loop.
    ///
    /// Returns the transition event channel and a handle that stops the
    /// task, so the loop never outlives its owner.
    pub fn start(&self) -> (mpsc::Receiver<ConnectivityState>, MonitorHandle) {
        let (event_tx, event_rx) = mpsc::channel::<ConnectivityState>(16);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let probe = Arc::clone(&self.probe);
        let reachable = Arc::clone(&self.reachable);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut last = ConnectivityState::Unreachable;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::debug!("connectivity monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let status = probe.probe().await;
                        reachable.store(status.is_reachable(), Ordering::SeqCst);

                        if status != last {
                            tracing::info!(?status, "connectivity transition");
                            last = status;
                            if event_tx.send(status).await.is_err() {
                                // Subscriber went away, nothing left to notify
                                break;
                            }
                        }
                    }
                }
            }
        });

        (event_rx, MonitorHandle { stop_tx, task })
    }
}

/// Handle to stop the monitor task
pub struct MonitorHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the poll loop and wait for it to exit
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probe whose observations are driven by the test
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

    fn switch_monitor(up: bool) -> (ConnectivityMonitor, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(up));
        let probe = Arc::new(SwitchProbe {
            up: Arc::clone(&flag),
        });
        (
            ConnectivityMonitor::new(probe, Duration::from_millis(5)),
            flag,
        )
    }

    #[tokio::test]
    async fn test_initial_status_is_unreachable() {
        let (monitor, _flag) = switch_monitor(true);
        assert_eq!(monitor.current_status(), ConnectivityState::Unreachable);
    }

    #[tokio::test]
    async fn test_reachable_edge_fires_once() {
        let (monitor, _flag) = switch_monitor(true);
        let (mut events, handle) = monitor.start();

        // First observation transitions Unreachable -> Reachable
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for edge")
            .unwrap();
        assert_eq!(event, ConnectivityState::Reachable);
        assert_eq!(monitor.current_status(), ConnectivityState::Reachable);

        // Repeated identical probes are coalesced: no further events
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_both_ways() {
        let (monitor, flag) = switch_monitor(false);
        let (mut events, handle) = monitor.start();

        flag.store(true, Ordering::SeqCst);
        let up = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(up, ConnectivityState::Reachable);

        flag.store(false, Ordering::SeqCst);
        let down = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(down, ConnectivityState::Unreachable);
        assert_eq!(monitor.current_status(), ConnectivityState::Unreachable);

        handle.stop().await.unwrap();
    }
}
