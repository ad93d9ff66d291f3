//! Synchronization with the backend

mod http;
mod manager;
mod memory;
mod remote;
mod runner;
mod status;

pub use http::HttpRemote;
pub use manager::SyncManager;
pub use memory::MemoryRemote;
pub use remote::{
    PullPage, PushOperation, PushOutcome, RejectionKind, RemoteBackend, RemoteError, RemoteRecord,
};
pub use runner::{spawn, SyncHandle};
pub use status::{EntityReport, SyncEvent, SyncPhase, SyncReport, SyncStatus, SyncTrigger};
