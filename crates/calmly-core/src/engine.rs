//! Engine: the explicit context object hosts construct at startup.
//!
//! Owns the local store, the queues, and (when a backend is configured) the
//! sync manager. `start` launches the background loop and `shutdown` stops it;
//! nothing here is global.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::hooks::EntityHook;
use crate::models::{Entity, EntityType};
use crate::network::NetworkMonitor;
use crate::queue::{DeadLetterQueue, Outbox};
use crate::store::LocalStore;
use crate::sync::{
    self, HttpRemote, RemoteBackend, SyncEvent, SyncHandle, SyncManager, SyncPhase, SyncReport,
    SyncStatus, SyncTrigger,
};

const EVENT_CAPACITY: usize = 256;

/// State shared between the engine and its hooks
pub(crate) struct Shared {
    pub store: LocalStore,
    pub manager: Option<Arc<SyncManager>>,
}

impl Shared {
    pub fn sync_status(&self, entity: EntityType) -> Result<SyncStatus> {
        let (pending_count, dead_letter_count, state) = self.store.read(|conn| {
            Ok((
                db::outbox::count(conn, Some(entity))?,
                db::dead_letters::count(conn, Some(entity))?,
                db::sync_state::load(conn, entity)?,
            ))
        })?;
        Ok(SyncStatus {
            entity,
            pending_count,
            dead_letter_count,
            last_synced_at: state.last_synced_at,
            last_error: state.last_error,
            phase: self
                .manager
                .as_ref()
                .map_or(SyncPhase::Idle, |manager| manager.phase(entity)),
            degraded: self.store.degraded_reason(),
        })
    }

    pub async fn refresh(&self, entities: &[EntityType]) -> Result<SyncReport> {
        let manager = self.manager.as_ref().ok_or(Error::SyncNotConfigured)?;
        Ok(manager.run_cycle_for(entities, SyncTrigger::Manual).await)
    }
}

struct Running {
    handle: SyncHandle,
    probe: Option<JoinHandle<()>>,
}

pub struct Engine {
    shared: Arc<Shared>,
    config: EngineConfig,
    events: broadcast::Sender<SyncEvent>,
    running: Mutex<Option<Running>>,
}

impl Engine {
    /// Open the store at `config.db_path`. With `config.api_url` set, sync runs
    /// against that backend over HTTP.
    pub fn open(config: EngineConfig, clock: SharedClock) -> Result<Self> {
        let path = config
            .db_path
            .clone()
            .ok_or_else(|| Error::Config("db_path is not set".to_string()))?;
        let remote = match config.api_url.as_deref() {
            Some(url) => Some(Arc::new(HttpRemote::new(url, config.request_timeout())?)
                as Arc<dyn RemoteBackend>),
            None => None,
        };
        let store = LocalStore::open(path, clock)?;
        Ok(Self::with_store(store, config, remote))
    }

    /// In-memory engine against an explicit backend (or none)
    pub fn in_memory(
        config: EngineConfig,
        clock: SharedClock,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Result<Self> {
        let store = LocalStore::open_in_memory(clock)?;
        Ok(Self::with_store(store, config, remote))
    }

    pub fn with_store(
        store: LocalStore,
        config: EngineConfig,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let manager = remote.map(|remote| {
            Arc::new(SyncManager::new(
                store.clone(),
                remote,
                config.clone(),
                events.clone(),
            ))
        });
        Self {
            shared: Arc::new(Shared { store, manager }),
            config,
            events,
            running: Mutex::new(None),
        }
    }

    pub fn hook<T: Entity>(&self) -> EntityHook<T> {
        EntityHook::new(self.shared.clone())
    }

    pub fn store(&self) -> &LocalStore {
        &self.shared.store
    }

    pub fn outbox(&self) -> Outbox {
        Outbox::new(self.shared.store.clone())
    }

    pub fn dead_letters(&self) -> DeadLetterQueue {
        DeadLetterQueue::new(self.shared.store.clone())
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_sync_configured(&self) -> bool {
        self.shared.manager.is_some()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn sync_status(&self, entity: EntityType) -> Result<SyncStatus> {
        self.shared.sync_status(entity)
    }

    /// Run one manual cycle over every entity type and wait for it
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.shared.refresh(&EntityType::ALL).await
    }

    /// Launch the background loop and, when configured, the health probe.
    ///
    /// Returns the network monitor so the host can feed it platform
    /// connectivity reports. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<NetworkMonitor> {
        let manager = self.shared.manager.clone().ok_or(Error::SyncNotConfigured)?;
        let mut running = self
            .running
            .lock()
            .map_err(|_| Error::InvalidInput("engine state poisoned".to_string()))?;
        if running.is_some() {
            return Err(Error::InvalidInput("sync loop already started".to_string()));
        }

        let monitor = NetworkMonitor::new(true, self.config.stability_window());
        let probe = self.config.probe_interval().map(|interval| {
            monitor.spawn_probe(manager.remote(), interval, self.config.request_timeout())
        });
        let handle = sync::spawn(manager, monitor.clone(), self.config.sync_interval());
        *running = Some(Running { handle, probe });
        Ok(monitor)
    }

    /// Ask the background loop for a manual cycle without waiting for it
    pub fn trigger(&self) -> Result<()> {
        let running = self
            .running
            .lock()
            .map_err(|_| Error::InvalidInput("engine state poisoned".to_string()))?;
        let running = running
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("sync loop not started".to_string()))?;
        running.handle.trigger();
        Ok(())
    }

    /// Stop the background loop, aborting a cycle in flight
    pub async fn shutdown(&self) {
        let running = self.running.lock().ok().and_then(|mut running| running.take());
        if let Some(Running { handle, probe }) = running {
            if let Some(probe) = probe {
                probe.abort();
            }
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::MoodEntry;
    use crate::sync::MemoryRemote;
    use std::time::Duration;

    fn engine_with_remote() -> (Engine, MemoryRemote) {
        let clock = Arc::new(ManualClock::new(1_000));
        let remote = MemoryRemote::new(clock.clone());
        let config = EngineConfig {
            probe_interval_secs: 0,
            ..EngineConfig::default()
        };
        let engine = Engine::in_memory(config, clock, Some(Arc::new(remote.clone()))).unwrap();
        (engine, remote)
    }

    #[test]
    fn open_requires_db_path() {
        let error = Engine::open(EngineConfig::default(), Arc::new(ManualClock::new(0)));
        assert!(matches!(error, Err(Error::Config(_))));
    }

    #[test]
    fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            db_path: Some(dir.path().join("nested").join("calmly.db")),
            ..EngineConfig::default()
        };
        let engine = Engine::open(config, Arc::new(ManualClock::new(0))).unwrap();
        assert!(!engine.is_sync_configured());
        assert!(dir.path().join("nested").join("calmly.db").exists());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_shutdown_stops_loop() {
        let (engine, _) = engine_with_remote();
        engine.start().unwrap();
        assert!(engine.start().is_err());
        engine.shutdown().await;
        assert!(engine.trigger().is_err());
    }

    #[tokio::test]
    async fn background_loop_syncs_on_first_tick() {
        let (engine, remote) = engine_with_remote();
        let mut events = engine.subscribe_events();
        engine.hook::<MoodEntry>().create(MoodEntry::new(7, None)).unwrap();

        engine.start().unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SyncEvent::CycleFinished { report, .. }) = events.recv().await {
                    return report;
                }
            }
        })
        .await
        .unwrap();
        engine.shutdown().await;

        assert_eq!(finished.total_pushed(), 1);
        assert_eq!(remote.live_records(EntityType::MoodEntry).len(), 1);
        assert_eq!(engine.sync_status(EntityType::MoodEntry).unwrap().pending_count, 0);
    }
}
