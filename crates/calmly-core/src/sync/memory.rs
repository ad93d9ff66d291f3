//! In-memory backend.
//!
//! Serves the reference API server and stands in for the network in tests.
//! Every accepted change takes the next value of a global sequence; the
//! pull cursor is that sequence number as a decimal string.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::remote::{
    PullPage, PushOperation, PushOutcome, RejectionKind, RemoteBackend, RemoteError, RemoteRecord,
};
use crate::clock::{SharedClock, SystemClock};
use crate::models::{EntityType, OpId, OperationKind, RecordId};

#[derive(Debug, Clone)]
struct Stored {
    record: RemoteRecord,
    change_seq: u64,
}

#[derive(Debug, Default)]
struct Collection {
    records: HashMap<String, Stored>,
    by_client: HashMap<RecordId, String>,
}

#[derive(Debug, Default)]
struct ServerState {
    change_seq: u64,
    last_time: i64,
    collections: HashMap<EntityType, Collection>,
    outcomes: HashMap<OpId, PushOutcome>,
    received: Vec<PushOperation>,
}

impl ServerState {
    /// Strictly increasing server time
    fn tick(&mut self, now: i64) -> i64 {
        self.last_time = now.max(self.last_time + 1);
        self.last_time
    }

    fn store(&mut self, entity: EntityType, record: RemoteRecord) {
        self.change_seq += 1;
        let change_seq = self.change_seq;
        let collection = self.collections.entry(entity).or_default();
        if let Some(client_id) = record.client_id {
            collection
                .by_client
                .insert(client_id, record.server_id.clone());
        }
        collection
            .records
            .insert(record.server_id.clone(), Stored { record, change_seq });
    }

    fn locate(&self, entity: EntityType, op: &PushOperation) -> Option<RemoteRecord> {
        let collection = self.collections.get(&entity)?;
        let server_id = op
            .server_id
            .as_ref()
            .or_else(|| collection.by_client.get(&op.local_id))?;
        collection
            .records
            .get(server_id)
            .map(|stored| stored.record.clone())
    }
}

/// Thread-safe in-memory sync backend.
#[derive(Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<ServerState>>,
    clock: SharedClock,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote").finish_non_exhaustive()
    }
}

impl MemoryRemote {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState::default())),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServerState>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Unavailable {
                status: 500,
                message: "server state poisoned".to_string(),
            })
    }

    fn apply(&self, state: &mut ServerState, entity: EntityType, op: &PushOperation) -> PushOutcome {
        if let Some(previous) = state.outcomes.get(&op.client_op_id) {
            return previous.clone();
        }
        state.received.push(op.clone());

        let reject = |kind, message: String| PushOutcome::Rejected {
            client_op_id: op.client_op_id,
            kind,
            message,
        };
        if op.entity_type != entity {
            return reject(
                RejectionKind::Validation,
                format!("operation for {} sent to {entity}", op.entity_type),
            );
        }

        let existing = state.locate(entity, op);
        let accepted_at = state.tick(self.clock.now_millis());
        let server_id = match op.operation_kind {
            OperationKind::Create | OperationKind::Update => {
                if let Err(message) = entity.validate(&op.payload) {
                    return reject(RejectionKind::Validation, message);
                }
                let server_id = existing
                    .as_ref()
                    .map_or_else(|| Uuid::now_v7().to_string(), |record| record.server_id.clone());
                let client_id = existing
                    .and_then(|record| record.client_id)
                    .unwrap_or(op.local_id);
                state.store(
                    entity,
                    RemoteRecord {
                        server_id: server_id.clone(),
                        client_id: Some(client_id),
                        payload: op.payload.clone(),
                        updated_at: accepted_at,
                        deleted: false,
                    },
                );
                Some(server_id)
            }
            OperationKind::Delete => existing.map(|record| {
                let server_id = record.server_id.clone();
                state.store(
                    entity,
                    RemoteRecord {
                        payload: serde_json::Value::Null,
                        updated_at: accepted_at,
                        deleted: true,
                        ..record
                    },
                );
                server_id
            }),
        };

        let outcome = PushOutcome::Accepted {
            client_op_id: op.client_op_id,
            server_id,
            accepted_at,
        };
        state.outcomes.insert(op.client_op_id, outcome.clone());
        outcome
    }

    /// Create a record as if another device had pushed it; returns its server id
    pub fn insert_remote(&self, entity: EntityType, payload: serde_json::Value) -> String {
        self.write_remote(entity, None, payload, false)
    }

    /// Change a record as if another device had edited it
    pub fn edit_remote(&self, entity: EntityType, server_id: &str, payload: serde_json::Value) {
        self.write_remote(entity, Some(server_id), payload, false);
    }

    /// Delete a record as if another device had removed it
    pub fn delete_remote(&self, entity: EntityType, server_id: &str) {
        self.write_remote(entity, Some(server_id), serde_json::Value::Null, true);
    }

    fn write_remote(
        &self,
        entity: EntityType,
        server_id: Option<&str>,
        payload: serde_json::Value,
        deleted: bool,
    ) -> String {
        let Ok(mut state) = self.state.lock() else {
            return String::new();
        };
        let server_id = server_id.map_or_else(|| Uuid::now_v7().to_string(), str::to_string);
        let client_id = state
            .collections
            .get(&entity)
            .and_then(|collection| collection.records.get(&server_id))
            .and_then(|stored| stored.record.client_id);
        let updated_at = state.tick(self.clock.now_millis());
        state.store(
            entity,
            RemoteRecord {
                server_id: server_id.clone(),
                client_id,
                payload,
                updated_at,
                deleted,
            },
        );
        server_id
    }

    /// Current server version of a record
    pub fn record(&self, entity: EntityType, server_id: &str) -> Option<RemoteRecord> {
        let state = self.state.lock().ok()?;
        state
            .collections
            .get(&entity)?
            .records
            .get(server_id)
            .map(|stored| stored.record.clone())
    }

    /// Live records of one type
    pub fn live_records(&self, entity: EntityType) -> Vec<RemoteRecord> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut records: Vec<_> = state
            .collections
            .get(&entity)
            .map(|collection| {
                collection
                    .records
                    .values()
                    .filter(|stored| !stored.record.deleted)
                    .map(|stored| stored.record.clone())
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|record| record.updated_at);
        records
    }

    /// Every distinct operation received, in arrival order
    pub fn received_operations(&self) -> Vec<PushOperation> {
        self.state
            .lock()
            .map(|state| state.received.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn push(
        &self,
        entity: EntityType,
        operations: Vec<PushOperation>,
    ) -> Result<Vec<PushOutcome>, RemoteError> {
        let mut state = self.lock()?;
        Ok(operations
            .iter()
            .map(|op| self.apply(&mut state, entity, op))
            .collect())
    }

    async fn pull(
        &self,
        entity: EntityType,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PullPage, RemoteError> {
        let after = match cursor {
            None => 0,
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| RemoteError::Validation(format!("invalid cursor: {raw}")))?,
        };
        let state = self.lock()?;
        let mut changes: Vec<&Stored> = state
            .collections
            .get(&entity)
            .map(|collection| {
                collection
                    .records
                    .values()
                    .filter(|stored| stored.change_seq > after)
                    .collect()
            })
            .unwrap_or_default();
        changes.sort_by_key(|stored| stored.change_seq);

        let has_more = changes.len() > limit;
        changes.truncate(limit);
        let next_cursor = changes
            .last()
            .map_or(after, |stored| stored.change_seq)
            .to_string();

        Ok(PullPage {
            records: changes.into_iter().map(|stored| stored.record.clone()).collect(),
            next_cursor: Some(next_cursor),
            has_more,
        })
    }

    async fn health(&self) -> Result<(), RemoteError> {
        self.lock().map(|_| ())
    }
}
