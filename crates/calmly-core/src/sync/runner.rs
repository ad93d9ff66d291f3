//! Background sync loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::manager::SyncManager;
use super::status::{SyncEvent, SyncTrigger};
use crate::network::NetworkMonitor;

/// Handle to the running loop. Dropping it also stops the loop; call
/// [`SyncHandle::shutdown`] to wait until it has exited.
pub struct SyncHandle {
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask for a manual cycle as soon as the loop is free
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Stop the loop, aborting any cycle in flight, and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::warn!("Sync loop ended abnormally: {error}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start the loop: a cycle on every tick while online, one on each
/// reconnection, and one per manual trigger.
pub fn spawn(manager: Arc<SyncManager>, monitor: NetworkMonitor, interval: Duration) -> SyncHandle {
    let wake = Arc::new(Notify::new());
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(manager, monitor, interval, wake.clone(), shutdown_rx));
    SyncHandle {
        wake,
        shutdown,
        task,
    }
}

async fn run(
    manager: Arc<SyncManager>,
    monitor: NetworkMonitor,
    interval: Duration,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut connectivity = monitor.subscribe();
    tracing::info!("Sync loop started (every {}s)", interval.as_secs());

    loop {
        let trigger = tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !monitor.is_online() {
                    tracing::debug!("Offline; skipping periodic sync");
                    continue;
                }
                SyncTrigger::Periodic
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *connectivity.borrow_and_update();
                manager.emit(SyncEvent::ConnectivityChanged { online });
                if !online {
                    continue;
                }
                SyncTrigger::Reconnected
            }
            () = wake.notified() => SyncTrigger::Manual,
        };

        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Sync cycle aborted by shutdown");
                break;
            }
            _ = manager.run_cycle(trigger) => {}
        }
    }
    tracing::info!("Sync loop stopped");
}
