//! Outbox: durable ledger of local operations awaiting acknowledgment

use std::time::Duration;

use crate::clock::add_duration;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{
    DeadLetterEntry, EntityType, FailureReason, OpId, OperationKind, OutboxEntry, RecordId,
};
use crate::store::reconcile::release_deferred;
use crate::store::{ChangeOrigin, LocalStore, WriteTxn};

/// Append an operation inside the caller's write transaction.
///
/// Taking the transaction rather than a store handle means a record change and
/// its outbox entry can only ever commit together.
pub(crate) fn enqueue(
    txn: &WriteTxn<'_>,
    entity: EntityType,
    record_id: RecordId,
    kind: OperationKind,
    payload: serde_json::Value,
) -> Result<OpId> {
    let now = txn.now();
    let mut entry = OutboxEntry {
        id: OpId::new(),
        seq: 0,
        entity_type: entity,
        record_id,
        kind,
        payload,
        attempt_count: 0,
        created_at: now,
        last_attempt_at: None,
        next_retry_at: now,
        last_error: None,
    };
    entry.seq = db::outbox::insert(txn, &entry)?;
    tracing::debug!("Enqueued {} {entity} {record_id} as {}", kind.as_str(), entry.id);
    Ok(entry.id)
}

/// Handle over the `outbox_ops` table.
#[derive(Clone)]
pub struct Outbox {
    store: LocalStore,
}

impl Outbox {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Due entries for one entity type in enqueue order.
    ///
    /// Entries behind a same-record entry that is still backing off are held
    /// back, so the batch never reorders operations on one record.
    pub fn dequeue_batch(&self, entity: EntityType, limit: usize) -> Result<Vec<OutboxEntry>> {
        let now = self.store.now();
        self.store
            .read(|conn| db::outbox::due(conn, entity, now, limit))
    }

    /// Remove an entry the backend accepted.
    ///
    /// Assigns the server id on first acceptance, purges the tombstone of an
    /// accepted delete, and releases a parked server version once the record
    /// has nothing left in flight. Returns false if the entry was already gone.
    pub fn acknowledge(&self, id: &OpId, server_id: Option<&str>, accepted_at: i64) -> Result<bool> {
        self.store.write(|txn| {
            let Some(entry) = db::outbox::get(txn, id)? else {
                return Ok(false);
            };
            db::outbox::delete(txn, id)?;
            let entity = entry.entity_type;
            let record_id = entry.record_id;

            if let Some(server_id) = server_id {
                if let Some(local) = db::records::get(txn, entity, &record_id)? {
                    match local.server_id.as_deref() {
                        None => {
                            db::records::assign_server_id(txn, entity, &record_id, server_id)?;
                        }
                        Some(existing) if existing != server_id => tracing::warn!(
                            "Ignoring server id {server_id} for {entity} {record_id}, already bound to {existing}"
                        ),
                        Some(_) => {}
                    }
                }
            }

            let drained = db::outbox::count_for_record(txn, entity, &record_id)? == 0;
            if entry.kind == OperationKind::Delete && drained {
                db::sync_state::discard(txn, entity, &record_id)?;
                db::records::purge(txn, entity, &record_id)?;
            } else {
                release_deferred(txn, entity, &record_id, Some(accepted_at))?;
            }

            txn.record_change(entity, record_id, ChangeOrigin::Remote);
            tracing::debug!("Acknowledged {} for {entity} {record_id}", entry.id);
            Ok(true)
        })
    }

    /// Count one failed attempt and delay the entry by `backoff`
    pub fn reschedule(&self, id: &OpId, backoff: Duration, error: &str) -> Result<()> {
        self.store.write(|txn| {
            let now = txn.now();
            let next_retry_at = add_duration(now, backoff);
            if !db::outbox::record_failure(txn, id, now, next_retry_at, error)? {
                return Err(Error::NotFound(format!("outbox entry {id}")));
            }
            tracing::warn!("Rescheduled {id} in {}ms: {error}", backoff.as_millis());
            Ok(())
        })
    }

    /// Move an entry to the dead-letter queue, counting the attempt that failed.
    ///
    /// Any server version parked behind the record is applied once the
    /// record has no other pending operations.
    pub fn move_to_dlq(&self, id: &OpId, reason: FailureReason) -> Result<()> {
        self.store.write(|txn| {
            let now = txn.now();
            let mut entry = db::outbox::get(txn, id)?
                .ok_or_else(|| Error::NotFound(format!("outbox entry {id}")))?;
            db::outbox::delete(txn, id)?;

            entry.attempt_count = entry.attempt_count.saturating_add(1);
            entry.last_attempt_at = Some(now);
            entry.last_error = Some(reason.message.clone());
            let entity = entry.entity_type;
            let record_id = entry.record_id;
            tracing::warn!("Moved {id} ({entity} {record_id}) to the dead-letter queue: {reason}");

            db::dead_letters::insert(
                txn,
                &DeadLetterEntry {
                    entry,
                    reason,
                    moved_at: now,
                },
            )?;
            release_deferred(txn, entity, &record_id, None)?;
            txn.record_change(entity, record_id, ChangeOrigin::Remote);
            Ok(())
        })
    }

    /// All pending entries, optionally for one entity type
    pub fn pending(&self, entity: Option<EntityType>) -> Result<Vec<OutboxEntry>> {
        self.store.read(|conn| db::outbox::list(conn, entity))
    }

    pub fn pending_count(&self, entity: Option<EntityType>) -> Result<usize> {
        self.store.read(|conn| db::outbox::count(conn, entity))
    }

    pub fn get(&self, id: &OpId) -> Result<Option<OutboxEntry>> {
        self.store.read(|conn| db::outbox::get(conn, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{FailureKind, LocalRecord, MoodEntry};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup() -> (LocalStore, Outbox, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = LocalStore::open_in_memory(clock.clone()).unwrap();
        let outbox = Outbox::new(store.clone());
        (store, outbox, clock)
    }

    #[test]
    fn dequeue_is_fifo_and_bounded() {
        let (store, outbox, _) = setup();
        let mut first = LocalRecord::new(MoodEntry::new(1, None));
        store.put(&first).unwrap();
        store.put(&LocalRecord::new(MoodEntry::new(2, None))).unwrap();
        first.data.score = 3;
        store.put(&first).unwrap();

        let batch = outbox.dequeue_batch(EntityType::MoodEntry, 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].seq < batch[1].seq);
        assert_eq!(batch[0].record_id, first.id);
        assert!(outbox.dequeue_batch(EntityType::JournalEntry, 10).unwrap().is_empty());
    }

    #[test]
    fn reschedule_holds_back_later_entries_for_same_record() {
        let (store, outbox, clock) = setup();
        let mut record = LocalRecord::new(MoodEntry::new(1, None));
        store.put(&record).unwrap();
        record.data.score = 2;
        store.put(&record).unwrap();

        let first = outbox.dequeue_batch(EntityType::MoodEntry, 10).unwrap()[0].clone();
        outbox
            .reschedule(&first.id, Duration::from_secs(1), "timeout")
            .unwrap();

        assert!(outbox.dequeue_batch(EntityType::MoodEntry, 10).unwrap().is_empty());

        clock.advance(Duration::from_secs(1));
        let batch = outbox.dequeue_batch(EntityType::MoodEntry, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, first.id);
        assert_eq!(batch[0].attempt_count, 1);
        assert_eq!(batch[0].last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn acknowledge_assigns_server_id_once() {
        let (store, outbox, _) = setup();
        let record = LocalRecord::new(MoodEntry::new(5, None));
        store.put(&record).unwrap();
        let entry = outbox.pending(None).unwrap()[0].clone();

        assert!(outbox.acknowledge(&entry.id, Some("srv-1"), 20_000).unwrap());
        assert!(!outbox.acknowledge(&entry.id, Some("srv-2"), 20_000).unwrap());

        let local = store.get::<MoodEntry>(&record.id).unwrap().unwrap();
        assert_eq!(local.server_id.as_deref(), Some("srv-1"));
        assert_eq!(outbox.pending_count(None).unwrap(), 0);
    }

    #[test]
    fn acknowledged_delete_purges_tombstone() {
        let (store, outbox, _) = setup();
        let record = LocalRecord::new(MoodEntry::new(5, None));
        store.put(&record).unwrap();
        store.soft_delete(EntityType::MoodEntry, &record.id).unwrap();

        for entry in outbox.pending(None).unwrap() {
            outbox.acknowledge(&entry.id, Some("srv-1"), 20_000).unwrap();
        }
        let row = store
            .read(|conn| db::records::get(conn, EntityType::MoodEntry, &record.id))
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn move_to_dlq_counts_failed_attempt() {
        let (store, outbox, _) = setup();
        store.put(&LocalRecord::new(MoodEntry::new(5, None))).unwrap();
        let entry = outbox.pending(None).unwrap()[0].clone();

        outbox
            .move_to_dlq(&entry.id, FailureReason::new(FailureKind::Validation, "bad"))
            .unwrap();

        assert_eq!(outbox.pending_count(None).unwrap(), 0);
        let dead = store.read(|conn| db::dead_letters::list(conn)).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].entry.attempt_count, 1);
        assert_eq!(dead[0].reason.kind, FailureKind::Validation);
        assert!(matches!(
            outbox.move_to_dlq(&entry.id, FailureReason::new(FailureKind::Validation, "bad")),
            Err(Error::NotFound(_))
        ));
    }
}
