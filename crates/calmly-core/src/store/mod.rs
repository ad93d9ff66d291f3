//! Local Store: durable entity tables plus queue and cursor state
//!
//! One connection guarded by a mutex serializes writers. Every mutating call
//! runs in a single `IMMEDIATE` transaction that also carries its outbox
//! entry, so a record change never commits without its pending operation.
//! Observers are notified synchronously after the commit returns.
//!
//! A file-backed store serves reads from a pool of read-only connections, so
//! readers neither wait for the writer nor for each other. An in-memory store
//! has no file to share and reads through the writer connection.

mod observers;
pub(crate) mod reconcile;

use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::clock::SharedClock;
use crate::db::{self, Database};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityType, LocalRecord, OperationKind, RawRecord, RecordId};
use crate::queue;

pub use observers::{ChangeEvent, ChangeOrigin, Subscription};
pub use reconcile::ApplyOutcome;

use observers::{group_changes, Observers};

/// Idle readers kept around between reads
const MAX_IDLE_READERS: usize = 4;

struct StoreInner {
    db: Mutex<Database>,
    readers: Option<ReaderPool>,
    clock: SharedClock,
    observers: Observers,
    degraded: Mutex<Option<String>>,
}

struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let conn = match pooled {
            Some(conn) => conn,
            None => db::open_reader(&self.path)?,
        };
        let result = f(&conn);
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }
        result
    }
}

/// Cheaply cloneable handle to the local database.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

/// An open write transaction. Dereferences to the connection so the `db`
/// helpers can run inside it.
pub(crate) struct WriteTxn<'a> {
    tx: Transaction<'a>,
    now: i64,
    changes: Vec<(EntityType, RecordId, ChangeOrigin)>,
}

impl WriteTxn<'_> {
    /// Timestamp fixed at the start of the transaction
    pub const fn now(&self) -> i64 {
        self.now
    }

    pub fn record_change(&mut self, entity: EntityType, id: RecordId, origin: ChangeOrigin) {
        self.changes.push((entity, id, origin));
    }
}

impl Deref for WriteTxn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

impl LocalStore {
    /// Open (or create) the store file at `path`
    pub fn open(path: impl AsRef<Path>, clock: SharedClock) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::debug!("Opening local store at {}", path.display());
        Ok(Self::from_database(Database::open(path)?, clock))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory(clock: SharedClock) -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?, clock))
    }

    pub fn from_database(db: Database, clock: SharedClock) -> Self {
        let readers = db.path().map(|path| ReaderPool {
            path: path.to_path_buf(),
            idle: Mutex::new(Vec::new()),
        });
        Self {
            inner: Arc::new(StoreInner {
                db: Mutex::new(db),
                readers,
                clock,
                observers: Observers::default(),
                degraded: Mutex::new(None),
            }),
        }
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Insert or update a record and enqueue its create/update operation.
    ///
    /// `server_id`, timestamps, and the tombstone flag on the passed record are
    /// ignored; the store owns them. Writing an unchanged payload is a no-op.
    pub fn put<T: Entity>(&self, record: &LocalRecord<T>) -> Result<RecordId> {
        let entity = T::TYPE;
        let payload = serde_json::to_value(&record.data)?;
        let id = record.id;

        self.write(|txn| {
            let now = txn.now();
            match db::records::get(txn, entity, &id)? {
                None => {
                    let raw = RawRecord {
                        id,
                        server_id: None,
                        payload: payload.clone(),
                        created_at: now,
                        updated_at: now,
                        deleted: false,
                    };
                    db::records::insert(txn, entity, &raw)?;
                    queue::enqueue(txn, entity, id, OperationKind::Create, payload)?;
                }
                Some(existing) if existing.deleted => {
                    return Err(Error::NotFound(format!("{entity} {id} was deleted")));
                }
                Some(existing) if existing.payload == payload => return Ok(()),
                Some(existing) => {
                    let raw = RawRecord {
                        payload: payload.clone(),
                        updated_at: now.max(existing.updated_at + 1),
                        ..existing
                    };
                    db::records::update(txn, entity, &raw)?;
                    queue::enqueue(txn, entity, id, OperationKind::Update, payload)?;
                }
            }
            txn.record_change(entity, id, ChangeOrigin::Local);
            Ok(())
        })?;

        Ok(id)
    }

    /// Fetch a live record. Tombstones read as absent.
    pub fn get<T: Entity>(&self, id: &RecordId) -> Result<Option<LocalRecord<T>>> {
        let raw = self.read(|conn| db::records::get(conn, T::TYPE, id))?;
        raw.filter(|raw| !raw.deleted)
            .map(LocalRecord::from_raw)
            .transpose()
    }

    /// Live records matching `predicate`, most recently updated first
    pub fn query<T: Entity>(
        &self,
        predicate: impl Fn(&LocalRecord<T>) -> bool,
    ) -> Result<Vec<LocalRecord<T>>> {
        let rows = self.read(|conn| db::records::list(conn, T::TYPE))?;
        let mut records = Vec::with_capacity(rows.len());
        for raw in rows {
            let record = LocalRecord::from_raw(raw)?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Tombstone a record and enqueue its delete operation
    pub fn soft_delete(&self, entity: EntityType, id: &RecordId) -> Result<()> {
        self.write(|txn| {
            let existing = db::records::get(txn, entity, id)?
                .filter(|raw| !raw.deleted)
                .ok_or_else(|| Error::NotFound(format!("{entity} {id}")))?;
            let raw = RawRecord {
                updated_at: txn.now().max(existing.updated_at + 1),
                deleted: true,
                ..existing
            };
            db::records::update(txn, entity, &raw)?;
            queue::enqueue(txn, entity, *id, OperationKind::Delete, serde_json::Value::Null)?;
            txn.record_change(entity, *id, ChangeOrigin::Local);
            Ok(())
        })
    }

    /// Register a callback for committed changes to `entity`
    pub fn subscribe(
        &self,
        entity: EntityType,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(entity, callback)
    }

    /// Records of `entity` with unacknowledged outbox entries
    pub fn pending_record_ids(&self, entity: EntityType) -> Result<HashSet<RecordId>> {
        self.read(|conn| db::outbox::pending_record_ids(conn, entity))
    }

    /// Whether one record has unacknowledged outbox entries
    pub fn has_pending(&self, entity: EntityType, id: &RecordId) -> Result<bool> {
        self.read(|conn| db::outbox::count_for_record(conn, entity, id)).map(|count| count > 0)
    }

    /// Pull watermark of one entity type
    pub fn cursor(&self, entity: EntityType) -> Result<Option<String>> {
        self.read(|conn| db::sync_state::load(conn, entity)).map(|state| state.cursor)
    }

    /// Server versions parked behind pending local edits
    pub fn deferred_count(&self, entity: EntityType) -> Result<usize> {
        self.read(|conn| db::sync_state::count_parked(conn, entity))
    }

    /// Whether a fatal storage fault has been observed
    pub fn is_degraded(&self) -> bool {
        self.degraded_reason().is_some()
    }

    pub fn degraded_reason(&self) -> Option<String> {
        self.inner
            .degraded
            .lock()
            .map_or_else(|_| Some("degraded flag poisoned".to_string()), |flag| flag.clone())
    }

    /// Run a read-only closure against the connection
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let result = if let Some(readers) = &self.inner.readers {
            readers.read(f)
        } else {
            let db = self.lock()?;
            let result = f(db.connection());
            drop(db);
            result
        };
        self.check(result)
    }

    /// Run a closure inside one write transaction; commit on `Ok`, roll back on `Err`.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<R>) -> Result<R> {
        if let Some(reason) = self.degraded_reason() {
            return Err(Error::Degraded(reason));
        }

        let now = self.now();
        let result = {
            let mut db = self.lock()?;
            Self::run_transaction(db.connection_mut(), now, f)
        };

        match self.check(result) {
            Ok((value, changes)) => {
                self.inner.observers.notify(&group_changes(changes));
                Ok(value)
            }
            Err(error) => Err(error),
        }
    }

    #[allow(clippy::type_complexity)]
    fn run_transaction<R>(
        conn: &mut Connection,
        now: i64,
        f: impl FnOnce(&mut WriteTxn<'_>) -> Result<R>,
    ) -> Result<(R, Vec<(EntityType, RecordId, ChangeOrigin)>)> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut txn = WriteTxn {
            tx,
            now,
            changes: Vec::new(),
        };
        // Dropping an uncommitted transaction rolls it back
        let value = f(&mut txn)?;
        let WriteTxn { tx, changes, .. } = txn;
        tx.commit()?;
        Ok((value, changes))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Database>> {
        self.inner.db.lock().map_err(|_| {
            self.latch_degraded("database lock poisoned by a panicked writer");
            Error::Degraded("database lock poisoned".to_string())
        })
    }

    fn check<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(error) = &result {
            if error.is_fatal_storage() {
                self.latch_degraded(&error.to_string());
            }
        }
        result
    }

    fn latch_degraded(&self, reason: &str) {
        if let Ok(mut flag) = self.inner.degraded.lock() {
            if flag.is_none() {
                tracing::error!("Local store entering degraded mode: {reason}");
                *flag = Some(reason.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{JournalEntry, MoodEntry};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (LocalStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = LocalStore::open_in_memory(clock.clone()).unwrap();
        (store, clock)
    }

    fn outbox_kinds(store: &LocalStore) -> Vec<OperationKind> {
        store
            .read(|conn| db::outbox::list(conn, None))
            .unwrap()
            .into_iter()
            .map(|entry| entry.kind)
            .collect()
    }

    #[test]
    fn put_creates_record_and_outbox_entry_together() {
        let (store, _) = setup();
        let record = LocalRecord::new(MoodEntry::new(7, Some("calm".to_string())));
        let id = store.put(&record).unwrap();

        let fetched = store.get::<MoodEntry>(&id).unwrap().unwrap();
        assert_eq!(fetched.data, record.data);
        assert_eq!(fetched.server_id, None);
        assert_eq!(fetched.created_at, 1_000);
        assert_eq!(outbox_kinds(&store), vec![OperationKind::Create]);
        assert!(store.has_pending(EntityType::MoodEntry, &id).unwrap());
    }

    #[test]
    fn put_existing_enqueues_update_and_bumps_updated_at() {
        let (store, _) = setup();
        let mut record = LocalRecord::new(JournalEntry::new("Day 1", "ok"));
        store.put(&record).unwrap();

        // Same clock reading: updated_at must still move forward
        record.data.body = "better".to_string();
        store.put(&record).unwrap();

        let fetched = store.get::<JournalEntry>(&record.id).unwrap().unwrap();
        assert_eq!(fetched.data.body, "better");
        assert_eq!(fetched.updated_at, 1_001);
        assert_eq!(
            outbox_kinds(&store),
            vec![OperationKind::Create, OperationKind::Update]
        );
    }

    #[test]
    fn put_unchanged_payload_is_noop() {
        let (store, _) = setup();
        let record = LocalRecord::new(MoodEntry::new(3, None));
        store.put(&record).unwrap();
        store.put(&record).unwrap();
        assert_eq!(outbox_kinds(&store), vec![OperationKind::Create]);
    }

    #[test]
    fn soft_delete_hides_record_but_keeps_tombstone() {
        let (store, _) = setup();
        let record = LocalRecord::new(MoodEntry::new(3, None));
        store.put(&record).unwrap();
        store.soft_delete(EntityType::MoodEntry, &record.id).unwrap();

        assert!(store.get::<MoodEntry>(&record.id).unwrap().is_none());
        assert!(store.query::<MoodEntry>(|_| true).unwrap().is_empty());
        let tombstone = store
            .read(|conn| db::records::get(conn, EntityType::MoodEntry, &record.id))
            .unwrap()
            .unwrap();
        assert!(tombstone.deleted);
        assert_eq!(
            outbox_kinds(&store),
            vec![OperationKind::Create, OperationKind::Delete]
        );

        assert!(matches!(
            store.soft_delete(EntityType::MoodEntry, &record.id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.put(&record), Err(Error::NotFound(_))));
    }

    #[test]
    fn query_applies_predicate() {
        let (store, clock) = setup();
        store.put(&LocalRecord::new(MoodEntry::new(2, None))).unwrap();
        clock.advance(std::time::Duration::from_millis(10));
        store.put(&LocalRecord::new(MoodEntry::new(9, None))).unwrap();

        let happy = store.query::<MoodEntry>(|record| record.data.score > 5).unwrap();
        assert_eq!(happy.len(), 1);
        assert_eq!(happy[0].data.score, 9);

        let all = store.query::<MoodEntry>(|_| true).unwrap();
        assert_eq!(all[0].data.score, 9, "newest first");
    }

    #[test]
    fn subscribe_fires_after_commit_and_stops_after_unsubscribe() {
        let (store, _) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let reader = store.clone();
        let sub = store.subscribe(EntityType::MoodEntry, move |event| {
            // The write is already committed and readable from inside the callback
            let record = reader.get::<MoodEntry>(&event.record_ids[0]).unwrap();
            assert!(record.is_some());
            assert_eq!(event.origin, ChangeOrigin::Local);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.put(&LocalRecord::new(MoodEntry::new(5, None))).unwrap();
        store.put(&LocalRecord::new(JournalEntry::new("t", ""))).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        store.put(&LocalRecord::new(MoodEntry::new(6, None))).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_transaction_rolls_back_and_does_not_notify() {
        let (store, _) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = store.subscribe(EntityType::MoodEntry, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = RecordId::new();
        let result: Result<()> = store.write(|txn| {
            let raw = RawRecord {
                id,
                server_id: None,
                payload: serde_json::json!({ "score": 1, "recorded_at": 0 }),
                created_at: 0,
                updated_at: 0,
                deleted: false,
            };
            db::records::insert(txn, EntityType::MoodEntry, &raw)?;
            txn.record_change(EntityType::MoodEntry, id, ChangeOrigin::Local);
            Err(Error::InvalidInput("abort".to_string()))
        });

        assert!(result.is_err());
        assert!(store.get::<MoodEntry>(&id).unwrap().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!store.is_degraded());
    }

    #[test]
    fn degraded_store_refuses_writes_but_serves_reads() {
        let (store, _) = setup();
        let record = LocalRecord::new(MoodEntry::new(5, None));
        store.put(&record).unwrap();

        store.latch_degraded("disk full");
        assert!(store.is_degraded());
        assert!(matches!(
            store.put(&LocalRecord::new(MoodEntry::new(1, None))),
            Err(Error::Degraded(_))
        ));
        assert!(store.get::<MoodEntry>(&record.id).unwrap().is_some());
    }

    #[test]
    fn file_store_reads_do_not_wait_for_the_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(
            dir.path().join("calmly.db"),
            Arc::new(ManualClock::new(1_000)),
        )
        .unwrap();
        let id = store.put(&LocalRecord::new(MoodEntry::new(4, None))).unwrap();

        let writer = store.inner.db.lock().unwrap();
        let fetched = store.get::<MoodEntry>(&id).unwrap().unwrap();
        assert_eq!(fetched.data.score, 4);
        assert!(store.has_pending(EntityType::MoodEntry, &id).unwrap());
        drop(writer);

        store.put(&LocalRecord { data: MoodEntry::new(9, None), ..fetched }).unwrap();
        assert_eq!(store.get::<MoodEntry>(&id).unwrap().unwrap().data.score, 9);
    }
}
