//! Local record envelope shared by all entity types

use serde::{Deserialize, Serialize};

use super::{Entity, RecordId};
use crate::error::Result;

/// A domain payload plus the bookkeeping the sync engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord<T> {
    /// Stable client-generated identifier
    pub id: RecordId,
    /// Assigned after the first acknowledged push, immutable afterwards
    pub server_id: Option<String>,
    /// Domain fields
    pub data: T,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Tombstone flag, kept until the delete is acknowledged
    pub deleted: bool,
}

impl<T: Entity> LocalRecord<T> {
    /// Wrap a payload in a fresh, never-synced record.
    ///
    /// Timestamps are assigned by the store when the record is first put.
    #[must_use]
    pub fn new(data: T) -> Self {
        Self {
            id: RecordId::new(),
            server_id: None,
            data,
            created_at: 0,
            updated_at: 0,
            deleted: false,
        }
    }

    pub(crate) fn from_raw(raw: RawRecord) -> Result<Self> {
        Ok(Self {
            id: raw.id,
            server_id: raw.server_id,
            data: serde_json::from_value(raw.payload)?,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            deleted: raw.deleted,
        })
    }
}

/// Untyped row as stored in an entity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawRecord {
    pub id: RecordId,
    pub server_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
}

/// A record as handed to read consumers, with its sync indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedRecord<T> {
    #[serde(flatten)]
    pub record: LocalRecord<T>,
    /// True while the record has unacknowledged outbox entries
    pub pending_sync: bool,
}

impl<T> std::ops::Deref for SyncedRecord<T> {
    type Target = LocalRecord<T>;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}
