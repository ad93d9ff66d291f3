//! Dead-letter queue: operations that need a person to decide

use crate::db;
use crate::error::{Error, Result};
use crate::models::{DeadLetterEntry, EntityType, OpId, OperationKind, OutboxEntry};
use crate::store::{ChangeOrigin, LocalStore};

/// Handle over the `failed_ops` table.
#[derive(Clone)]
pub struct DeadLetterQueue {
    store: LocalStore,
}

impl DeadLetterQueue {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Newest failures first
    pub fn list(&self) -> Result<Vec<DeadLetterEntry>> {
        self.store.read(db::dead_letters::list)
    }

    pub fn get(&self, id: &OpId) -> Result<Option<DeadLetterEntry>> {
        self.store.read(|conn| db::dead_letters::get(conn, id))
    }

    pub fn count(&self, entity: Option<EntityType>) -> Result<usize> {
        self.store.read(|conn| db::dead_letters::count(conn, entity))
    }

    /// Put an entry back at the tail of the outbox with a fresh retry budget.
    ///
    /// The operation keeps its id so the backend can still deduplicate it.
    /// A create or update carries the record's current payload rather than
    /// its old snapshot, and becomes an update once the record has a server
    /// id, so a replay never rolls back a later edit that already synced.
    /// Replaying a create or update of a deleted record is refused.
    pub fn replay(&self, id: &OpId) -> Result<OutboxEntry> {
        self.store.write(|txn| {
            let dead = db::dead_letters::get(txn, id)?
                .ok_or_else(|| Error::NotFound(format!("dead-letter entry {id}")))?;
            db::dead_letters::delete(txn, id)?;

            let now = txn.now();
            let mut entry = OutboxEntry {
                attempt_count: 0,
                last_attempt_at: None,
                next_retry_at: now,
                last_error: None,
                ..dead.entry
            };
            if entry.kind != OperationKind::Delete {
                let current = db::records::get(txn, entry.entity_type, &entry.record_id)?
                    .filter(|record| !record.deleted)
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "{} {} was deleted; discard {id} instead",
                            entry.entity_type, entry.record_id
                        ))
                    })?;
                if current.server_id.is_some() {
                    entry.kind = OperationKind::Update;
                }
                entry.payload = current.payload;
            }
            entry.seq = db::outbox::insert(txn, &entry)?;
            txn.record_change(entry.entity_type, entry.record_id, ChangeOrigin::Local);
            tracing::info!("Replayed {id} from the dead-letter queue");
            Ok(entry)
        })
    }

    /// Drop an entry for good
    pub fn discard(&self, id: &OpId) -> Result<()> {
        self.store.write(|txn| {
            if !db::dead_letters::delete(txn, id)? {
                return Err(Error::NotFound(format!("dead-letter entry {id}")));
            }
            tracing::info!("Discarded {id} from the dead-letter queue");
            Ok(())
        })
    }
}
