//! Typed per-entity facade for UI and CLI consumers.
//!
//! Writes go straight to the local store and return at once; reads carry a
//! `pending_sync` flag so callers can show sync state without touching the
//! queues.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::Shared;
use crate::error::{Error, Result};
use crate::models::{Entity, LocalRecord, RecordId, SyncedRecord};
use crate::store::{ChangeEvent, Subscription};
use crate::sync::{SyncReport, SyncStatus};

/// Data access for one entity type. Cheap to clone.
pub struct EntityHook<T> {
    shared: Arc<Shared>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityHook<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntityHook<T> {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            _entity: PhantomData,
        }
    }

    /// Store a new record and queue it for upload
    pub fn create(&self, data: T) -> Result<SyncedRecord<T>> {
        let record = LocalRecord::new(data);
        let id = self.shared.store.put(&record)?;
        self.fetch(&id)
    }

    /// Replace a record's fields and queue the update
    pub fn update(&self, id: &RecordId, data: T) -> Result<SyncedRecord<T>> {
        let mut record = self
            .shared
            .store
            .get::<T>(id)?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::TYPE)))?;
        record.data = data;
        self.shared.store.put(&record)?;
        self.fetch(id)
    }

    /// Tombstone a record and queue the delete
    pub fn delete(&self, id: &RecordId) -> Result<()> {
        self.shared.store.soft_delete(T::TYPE, id)
    }

    pub fn get(&self, id: &RecordId) -> Result<Option<SyncedRecord<T>>> {
        let Some(record) = self.shared.store.get::<T>(id)? else {
            return Ok(None);
        };
        let pending_sync = self.shared.store.has_pending(T::TYPE, id)?;
        Ok(Some(SyncedRecord {
            record,
            pending_sync,
        }))
    }

    /// Every live record, most recently updated first
    pub fn list(&self) -> Result<Vec<SyncedRecord<T>>> {
        self.query(|_| true)
    }

    pub fn query(&self, predicate: impl Fn(&LocalRecord<T>) -> bool) -> Result<Vec<SyncedRecord<T>>> {
        let records = self.shared.store.query(predicate)?;
        let pending = self.shared.store.pending_record_ids(T::TYPE)?;
        Ok(records
            .into_iter()
            .map(|record| SyncedRecord {
                pending_sync: pending.contains(&record.id),
                record,
            })
            .collect())
    }

    /// Watch committed changes to this entity type
    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.store.subscribe(T::TYPE, callback)
    }

    pub fn sync_status(&self) -> Result<SyncStatus> {
        self.shared.sync_status(T::TYPE)
    }

    /// Sync this entity type now, ignoring any backoff
    pub async fn refresh(&self) -> Result<SyncReport> {
        self.shared.refresh(&[T::TYPE]).await
    }

    fn fetch(&self, id: &RecordId) -> Result<SyncedRecord<T>> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::TYPE)))
    }
}
