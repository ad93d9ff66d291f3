//! Sync state as seen from the outside

use serde::Serialize;

use crate::models::EntityType;

/// Where one entity type is in its sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
    /// Waiting out a transport failure; periodic cycles skip the entity
    Backoff { until: i64 },
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Periodic,
    Reconnected,
    /// Explicit refresh; overrides entity backoff
    Manual,
}

impl SyncTrigger {
    pub const fn overrides_backoff(self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// Snapshot returned by `sync_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub entity: EntityType,
    pub pending_count: usize,
    pub dead_letter_count: usize,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub phase: SyncPhase,
    /// Set once the local store has hit a fatal storage fault
    pub degraded: Option<String>,
}

/// Per-entity counters for one finished cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub pushed: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    pub pulled: usize,
    pub deferred: usize,
    /// Skipped because the entity was backing off or the device was offline
    pub skipped: bool,
    pub error: Option<String>,
}

/// Result of one cycle over every entity type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub entities: Vec<(EntityType, EntityReport)>,
}

impl SyncReport {
    pub fn total_pushed(&self) -> usize {
        self.entities.iter().map(|(_, report)| report.pushed).sum()
    }

    pub fn total_pulled(&self) -> usize {
        self.entities.iter().map(|(_, report)| report.pulled).sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = (EntityType, &str)> {
        self.entities
            .iter()
            .filter_map(|(entity, report)| report.error.as_deref().map(|error| (*entity, error)))
    }

    pub fn get(&self, entity: EntityType) -> Option<&EntityReport> {
        self.entities
            .iter()
            .find(|(candidate, _)| *candidate == entity)
            .map(|(_, report)| report)
    }
}

/// Broadcast notifications for status indicators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    PhaseChanged { entity: EntityType, phase: SyncPhase },
    CycleFinished { trigger: SyncTrigger, report: SyncReport },
    /// The backend refused our credentials; the host should re-authenticate
    AuthenticationRequired { entity: EntityType, message: String },
    /// The local store hit a fatal fault and stopped accepting writes
    StorageFault { message: String },
    ConnectivityChanged { online: bool },
}
