//! Connectivity tracking.
//!
//! Raw reachability reports from the platform (or the health probe) are
//! debounced: going offline takes effect at once, coming back online only
//! after the link has held for the stability window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::sync::RemoteBackend;

/// Debounced online/offline signal. Clones share the same state.
#[derive(Clone)]
pub struct NetworkMonitor {
    reports: mpsc::UnboundedSender<bool>,
    state: watch::Receiver<bool>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

impl NetworkMonitor {
    /// Start a monitor. Must be called from within a tokio runtime.
    pub fn new(initially_online: bool, stability_window: Duration) -> Self {
        let (reports, rx) = mpsc::unbounded_channel();
        let (tx, state) = watch::channel(initially_online);
        tokio::spawn(debounce(rx, tx, stability_window));
        Self { reports, state }
    }

    /// Feed a raw connectivity observation
    pub fn report(&self, online: bool) {
        if self.reports.send(online).is_err() {
            tracing::debug!("Network monitor stopped; dropping report");
        }
    }

    /// Current debounced state
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that wakes on every online/offline transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }

    /// Periodically probe the backend and report the result.
    ///
    /// The returned task runs until aborted.
    pub fn spawn_probe(
        &self,
        remote: Arc<dyn RemoteBackend>,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = matches!(
                    tokio::time::timeout(timeout, remote.health()).await,
                    Ok(Ok(()))
                );
                monitor.report(reachable);
            }
        })
    }
}

async fn debounce(
    mut reports: mpsc::UnboundedReceiver<bool>,
    state: watch::Sender<bool>,
    stability_window: Duration,
) {
    let mut online_at: Option<Instant> = None;
    loop {
        let report = match online_at {
            Some(deadline) => tokio::select! {
                report = reports.recv() => report,
                () = tokio::time::sleep_until(deadline) => {
                    online_at = None;
                    set_state(&state, true);
                    continue;
                }
            },
            None => reports.recv().await,
        };
        let Some(online) = report else {
            break;
        };

        if online {
            if !*state.borrow() && online_at.is_none() {
                online_at = Some(Instant::now() + stability_window);
            }
        } else {
            online_at = None;
            set_state(&state, false);
        }
    }
}

fn set_state(state: &watch::Sender<bool>, online: bool) {
    let changed = state.send_if_modified(|current| {
        if *current == online {
            false
        } else {
            *current = online;
            true
        }
    });
    if changed {
        tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn offline_is_immediate() {
        let monitor = NetworkMonitor::new(true, WINDOW);
        let mut rx = monitor.subscribe();

        monitor.report(false);
        rx.changed().await.unwrap();
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn online_waits_for_stability_window() {
        let monitor = NetworkMonitor::new(false, WINDOW);
        let mut rx = monitor.subscribe();

        let start = Instant::now();
        monitor.report(true);
        rx.changed().await.unwrap();
        assert!(monitor.is_online());
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_never_declares_online() {
        let monitor = NetworkMonitor::new(false, WINDOW);
        let mut rx = monitor.subscribe();

        for _ in 0..5 {
            monitor.report(true);
            tokio::time::sleep(Duration::from_millis(500)).await;
            monitor.report(false);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let waited = tokio::time::timeout(Duration::from_secs(10), rx.changed()).await;
        assert!(waited.is_err(), "no transition expected");
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_reports_unreachable_backend() {
        use crate::sync::{PullPage, PushOperation, PushOutcome, RemoteError};
        use crate::models::EntityType;

        struct Down;

        #[async_trait::async_trait]
        impl RemoteBackend for Down {
            async fn push(
                &self,
                _: EntityType,
                _: Vec<PushOperation>,
            ) -> Result<Vec<PushOutcome>, RemoteError> {
                Err(RemoteError::Timeout)
            }
            async fn pull(
                &self,
                _: EntityType,
                _: Option<&str>,
                _: usize,
            ) -> Result<PullPage, RemoteError> {
                Err(RemoteError::Timeout)
            }
            async fn health(&self) -> Result<(), RemoteError> {
                Err(RemoteError::Transport("connection refused".to_string()))
            }
        }

        let monitor = NetworkMonitor::new(true, WINDOW);
        let mut rx = monitor.subscribe();
        let probe = monitor.spawn_probe(Arc::new(Down), Duration::from_secs(5), Duration::from_secs(1));

        rx.changed().await.unwrap();
        assert!(!monitor.is_online());
        probe.abort();
    }
}
