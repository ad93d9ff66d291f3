//! Push/pull orchestration per entity type.
//!
//! One cycle walks every entity type in turn: drain due outbox entries to the
//! backend, then pull changes since the stored cursor. Failures never escape
//! to callers of the store; they drive the outbox, the dead-letter queue,
//! and the status snapshot instead.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::remote::{PushOperation, PushOutcome, RejectionKind, RemoteBackend, RemoteError};
use super::status::{EntityReport, SyncEvent, SyncPhase, SyncReport, SyncTrigger};
use crate::clock::add_duration;
use crate::config::EngineConfig;
use crate::db;
use crate::error::Error;
use crate::models::{EntityType, FailureKind, FailureReason, OpId, OutboxEntry, RecordId};
use crate::queue::Outbox;
use crate::store::{reconcile, ApplyOutcome, LocalStore};

/// Why an entity's cycle stopped early
#[derive(Debug)]
enum Failure {
    Storage(Error),
    Remote(RemoteError),
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self::Storage(error)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(error) => error.fmt(f),
            Self::Remote(error) => error.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EntityState {
    phase: SyncPhase,
    /// Consecutive cycles that ended in a retryable transport failure
    failures: u32,
}

pub struct SyncManager {
    store: LocalStore,
    outbox: Outbox,
    remote: Arc<dyn RemoteBackend>,
    config: EngineConfig,
    states: Mutex<HashMap<EntityType, EntityState>>,
    events: broadcast::Sender<SyncEvent>,
    cycle: tokio::sync::Mutex<()>,
}

impl SyncManager {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteBackend>,
        config: EngineConfig,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            outbox: Outbox::new(store.clone()),
            store,
            remote,
            config,
            states: Mutex::new(HashMap::new()),
            events,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn remote(&self) -> Arc<dyn RemoteBackend> {
        self.remote.clone()
    }

    /// Current phase of one entity type
    pub fn phase(&self, entity: EntityType) -> SyncPhase {
        self.states
            .lock()
            .map(|states| states.get(&entity).copied().unwrap_or_default().phase)
            .unwrap_or_default()
    }

    /// Run one cycle over every entity type
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> SyncReport {
        self.run_cycle_for(&EntityType::ALL, trigger).await
    }

    /// Run one cycle over the given entity types, in order.
    ///
    /// Cycles never overlap; a second caller waits for the running one.
    /// Dropping the future mid-cycle leaves unacknowledged entries and the
    /// cursor exactly as the last committed transaction left them.
    pub async fn run_cycle_for(&self, entities: &[EntityType], trigger: SyncTrigger) -> SyncReport {
        let _running = self.cycle.lock().await;
        let mut report = SyncReport::default();
        for &entity in entities {
            let entity_report = self.sync_entity(entity, trigger).await;
            report.entities.push((entity, entity_report));
        }

        tracing::info!(
            "Sync cycle ({trigger:?}) finished: pushed {}, pulled {}",
            report.total_pushed(),
            report.total_pulled()
        );
        self.emit(SyncEvent::CycleFinished {
            trigger,
            report: report.clone(),
        });
        report
    }

    async fn sync_entity(&self, entity: EntityType, trigger: SyncTrigger) -> EntityReport {
        let mut report = EntityReport::default();

        if let Some(reason) = self.store.degraded_reason() {
            report.skipped = true;
            report.error = Some(format!("local store degraded: {reason}"));
            return report;
        }
        if let SyncPhase::Backoff { until } = self.phase(entity) {
            if self.store.now() < until && !trigger.overrides_backoff() {
                tracing::debug!("Skipping {entity}: backing off until {until}");
                report.skipped = true;
                return report;
            }
        }

        self.set_phase(entity, SyncPhase::Pushing);
        let result = match self.push_entity(entity, &mut report).await {
            Ok(()) => {
                self.set_phase(entity, SyncPhase::Pulling);
                self.pull_entity(entity, &mut report).await
            }
            Err(failure) => Err(failure),
        };

        match result {
            Ok(()) => {
                self.reset_failures(entity);
                self.set_phase(entity, SyncPhase::Idle);
                if let Err(error) = self
                    .store
                    .write(|txn| db::sync_state::mark_synced(txn, entity, txn.now()))
                {
                    self.storage_failed(&error);
                    report.error = Some(error.to_string());
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                tracing::warn!("Sync of {entity} failed: {message}");
                match &failure {
                    Failure::Remote(error) if error.is_retryable() => self.enter_backoff(entity),
                    Failure::Remote(_) => self.set_phase(entity, SyncPhase::Idle),
                    Failure::Storage(error) => {
                        self.storage_failed(error);
                        self.set_phase(entity, SyncPhase::Idle);
                    }
                }
                if let Err(error) = self
                    .store
                    .write(|txn| db::sync_state::set_error(txn, entity, &message))
                {
                    tracing::warn!("Could not record sync error for {entity}: {error}");
                }
                report.error = Some(message);
            }
        }
        report
    }

    /// Push due entries in rounds of at most one operation per record.
    ///
    /// A record whose operation was not acknowledged sits out the rest of the
    /// batch, so its later operations can never overtake it.
    async fn push_entity(&self, entity: EntityType, report: &mut EntityReport) -> Result<(), Failure> {
        let batch = self
            .outbox
            .dequeue_batch(entity, self.config.push_batch_size)?;
        if batch.is_empty() {
            return Ok(());
        }
        tracing::debug!("Pushing {} {entity} operations", batch.len());

        let mut remaining: VecDeque<OutboxEntry> = batch.into();
        let mut blocked: HashSet<RecordId> = HashSet::new();

        while !remaining.is_empty() {
            let mut round = Vec::new();
            let mut in_round = HashSet::new();
            let mut later = VecDeque::new();
            for entry in remaining.drain(..) {
                if blocked.contains(&entry.record_id) {
                    continue;
                }
                if in_round.insert(entry.record_id) {
                    round.push(entry);
                } else {
                    later.push_back(entry);
                }
            }
            remaining = later;
            if round.is_empty() {
                break;
            }

            let operations = round
                .iter()
                .map(|entry| self.operation_for(entry))
                .collect::<Result<Vec<_>, Error>>()?;

            let (outcomes, interrupted) =
                match self.call(self.remote.push(entity, operations.clone())).await {
                    Ok(outcomes) => (outcomes, None),
                    Err(RemoteError::Validation(_)) if round.len() > 1 => {
                        tracing::debug!("Batch of {} rejected; pushing one at a time", round.len());
                        self.push_one_by_one(entity, operations).await
                    }
                    Err(error) => {
                        self.fail_round(entity, &round, &error, report)?;
                        if matches!(error, RemoteError::Validation(_)) {
                            continue;
                        }
                        return Err(Failure::Remote(error));
                    }
                };

            let mut by_id: HashMap<_, _> = outcomes
                .into_iter()
                .map(|outcome| (*outcome.client_op_id(), outcome))
                .collect();
            let mut auth_error = None;
            let mut failed = Vec::new();

            for entry in &round {
                match by_id.remove(&entry.id) {
                    Some(PushOutcome::Accepted {
                        server_id,
                        accepted_at,
                        ..
                    }) => {
                        self.outbox
                            .acknowledge(&entry.id, server_id.as_deref(), accepted_at)?;
                        report.pushed += 1;
                    }
                    Some(PushOutcome::Rejected {
                        kind: RejectionKind::Validation,
                        message,
                        ..
                    }) => {
                        self.outbox.move_to_dlq(
                            &entry.id,
                            FailureReason::new(FailureKind::Validation, message),
                        )?;
                        report.dead_lettered += 1;
                    }
                    Some(PushOutcome::Rejected {
                        kind: RejectionKind::Authorization,
                        message,
                        ..
                    }) => {
                        self.outbox.move_to_dlq(
                            &entry.id,
                            FailureReason::new(FailureKind::Authorization, message.clone()),
                        )?;
                        report.dead_lettered += 1;
                        auth_error = Some(message);
                    }
                    Some(PushOutcome::Rejected {
                        kind: RejectionKind::Transient,
                        message,
                        ..
                    }) => {
                        self.retry_later(entry, &message, report)?;
                        blocked.insert(entry.record_id);
                    }
                    None if interrupted
                        .as_ref()
                        .is_some_and(|(failed_id, _)| *failed_id == entry.id) =>
                    {
                        failed.push(entry.clone());
                    }
                    // Never sent before the fallback stopped; attempts stay as they are
                    None if interrupted.is_some() => {}
                    None => {
                        self.retry_later(entry, "missing from push response", report)?;
                        blocked.insert(entry.record_id);
                    }
                }
            }

            if let Some((_, error)) = interrupted {
                self.fail_round(entity, &failed, &error, report)?;
                return Err(Failure::Remote(error));
            }

            if let Some(message) = auth_error {
                self.emit(SyncEvent::AuthenticationRequired {
                    entity,
                    message: message.clone(),
                });
                return Err(Failure::Remote(RemoteError::Authorization(message)));
            }
        }
        Ok(())
    }

    /// Resend a rejected batch operation by operation so a single invalid
    /// payload does not take its neighbours down with it. Stops at the first
    /// failure that is not a validation rejection and returns it with the id
    /// of the operation that hit it; later operations are not sent.
    async fn push_one_by_one(
        &self,
        entity: EntityType,
        operations: Vec<PushOperation>,
    ) -> (Vec<PushOutcome>, Option<(OpId, RemoteError)>) {
        let mut outcomes = Vec::with_capacity(operations.len());
        for operation in operations {
            let client_op_id = operation.client_op_id;
            match self.call(self.remote.push(entity, vec![operation])).await {
                Ok(mut results) => outcomes.append(&mut results),
                Err(RemoteError::Validation(message)) => outcomes.push(PushOutcome::Rejected {
                    client_op_id,
                    kind: RejectionKind::Validation,
                    message,
                }),
                Err(error) => return (outcomes, Some((client_op_id, error))),
            }
        }
        (outcomes, None)
    }

    fn operation_for(&self, entry: &OutboxEntry) -> Result<PushOperation, Error> {
        let server_id = self.store.read(|conn| {
            Ok(db::records::get(conn, entry.entity_type, &entry.record_id)?
                .and_then(|record| record.server_id))
        })?;
        Ok(PushOperation::from_entry(entry, server_id))
    }

    /// Settle every operation of a round whose request failed as a whole
    fn fail_round(
        &self,
        entity: EntityType,
        round: &[OutboxEntry],
        error: &RemoteError,
        report: &mut EntityReport,
    ) -> Result<(), Error> {
        let message = error.to_string();
        let terminal = match error {
            RemoteError::Validation(_) => Some(FailureKind::Validation),
            RemoteError::Authorization(_) => Some(FailureKind::Authorization),
            _ => None,
        };

        for entry in round {
            match terminal {
                Some(kind) => {
                    self.outbox
                        .move_to_dlq(&entry.id, FailureReason::new(kind, message.clone()))?;
                    report.dead_lettered += 1;
                }
                None => self.retry_later(entry, &message, report)?,
            }
        }

        if let RemoteError::Authorization(reason) = error {
            self.emit(SyncEvent::AuthenticationRequired {
                entity,
                message: reason.clone(),
            });
        }
        Ok(())
    }

    /// Reschedule with backoff, or dead-letter once the retry budget is spent
    fn retry_later(&self, entry: &OutboxEntry, message: &str, report: &mut EntityReport) -> Result<(), Error> {
        let failures = entry.attempt_count.saturating_add(1);
        let policy = self.config.retry;
        if policy.is_exhausted(failures) {
            self.outbox.move_to_dlq(
                &entry.id,
                FailureReason::new(
                    FailureKind::RetriesExhausted,
                    format!("gave up after {failures} attempts: {message}"),
                ),
            )?;
            report.dead_lettered += 1;
        } else {
            self.outbox
                .reschedule(&entry.id, policy.delay_for(failures), message)?;
            report.rescheduled += 1;
        }
        Ok(())
    }

    /// Pull pages until the backend reports no more, up to the page limit.
    ///
    /// Each page and its cursor commit in one transaction, so a failed page
    /// leaves the cursor where it was and the page is fetched again later.
    async fn pull_entity(&self, entity: EntityType, report: &mut EntityReport) -> Result<(), Failure> {
        let mut cursor = self.store.read(|conn| db::sync_state::load(conn, entity))?.cursor;

        for _ in 0..self.config.max_pull_pages {
            let page = self
                .call(
                    self.remote
                        .pull(entity, cursor.as_deref(), self.config.pull_page_size),
                )
                .await
                .map_err(Failure::Remote)?;

            for record in page.records.iter().filter(|record| !record.deleted) {
                entity.check_shape(&record.payload).map_err(|message| {
                    Failure::Remote(RemoteError::InvalidResponse(format!(
                        "{entity} {}: {message}",
                        record.server_id
                    )))
                })?;
            }

            let outcomes = self.store.write(|txn| {
                let mut outcomes = Vec::with_capacity(page.records.len());
                for record in &page.records {
                    outcomes.push(reconcile::apply_remote(txn, entity, record)?);
                }
                if let Some(next) = page.next_cursor.as_deref() {
                    db::sync_state::set_cursor(txn, entity, Some(next))?;
                }
                Ok(outcomes)
            })?;

            report.pulled += outcomes.iter().filter(|outcome| outcome.is_change()).count();
            report.deferred += outcomes
                .iter()
                .filter(|outcome| **outcome == ApplyOutcome::Deferred)
                .count();

            if page.next_cursor.is_some() {
                cursor = page.next_cursor;
            }
            if !page.has_more {
                break;
            }
        }
        Ok(())
    }

    /// Bound a remote call by the request timeout
    async fn call<T>(&self, request: impl Future<Output = Result<T, RemoteError>>) -> Result<T, RemoteError> {
        tokio::time::timeout(self.config.request_timeout(), request)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    fn set_phase(&self, entity: EntityType, phase: SyncPhase) {
        let changed = self.states.lock().is_ok_and(|mut states| {
            let state = states.entry(entity).or_default();
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        });
        if changed {
            self.emit(SyncEvent::PhaseChanged { entity, phase });
        }
    }

    fn enter_backoff(&self, entity: EntityType) {
        let failures = self.states.lock().map_or(1, |mut states| {
            let state = states.entry(entity).or_default();
            state.failures = state.failures.saturating_add(1);
            state.failures
        });
        let delay = self.config.retry.delay_for(failures);
        let until = add_duration(self.store.now(), delay);
        tracing::warn!("{entity} backing off for {}ms", delay.as_millis());
        self.set_phase(entity, SyncPhase::Backoff { until });
    }

    fn reset_failures(&self, entity: EntityType) {
        if let Ok(mut states) = self.states.lock() {
            states.entry(entity).or_default().failures = 0;
        }
    }

    fn storage_failed(&self, error: &Error) {
        if error.is_fatal_storage() {
            tracing::error!("Storage fault during sync: {error}");
            self.emit(SyncEvent::StorageFault {
                message: error.to_string(),
            });
        }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}
