//! calmly-core - offline-first storage and sync engine for Calmly
//!
//! Writes land in a local `SQLite` store together with an outbox entry and are
//! visible immediately. A background sync manager drains the outbox to the
//! backend and pulls remote changes, deferring server versions that would
//! clobber a local edit still in flight.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod models;
pub mod network;
pub mod queue;
pub mod store;
pub mod sync;
pub mod util;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{EngineConfig, RetryPolicy};
pub use engine::Engine;
pub use error::{Error, Result};
pub use hooks::EntityHook;
pub use models::{
    DeadLetterEntry, Entity, EntityType, JournalEntry, LocalRecord, MoodEntry, OpId,
    OutboxEntry, RecordId, SyncedRecord,
};
pub use network::NetworkMonitor;
pub use queue::{DeadLetterQueue, Outbox};
pub use store::{ChangeEvent, ChangeOrigin, LocalStore, Subscription};
pub use sync::{
    MemoryRemote, RemoteBackend, RemoteError, SyncEvent, SyncPhase, SyncReport, SyncStatus,
    SyncTrigger,
};
