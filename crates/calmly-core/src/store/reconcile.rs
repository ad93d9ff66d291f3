//! Applying server versions to local records
//!
//! The server is authoritative, except that a record with unacknowledged
//! local operations is never overwritten: the incoming version is parked in
//! `deferred_deltas` and released once the outbox for that record drains.

use serde::Serialize;

use super::{ChangeOrigin, WriteTxn};
use crate::db::{self, sync_state::DeferredDelta};
use crate::error::Result;
use crate::models::{EntityType, RawRecord, RecordId};
use crate::sync::RemoteRecord;

/// What happened to the local copy when a server version was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// No local copy existed; one was created
    Inserted,
    /// The local copy was overwritten
    Updated,
    /// The local copy was removed
    Deleted,
    /// The local copy already matched
    Unchanged,
    /// The local copy has pending operations; the version was parked
    Deferred,
    /// Nothing to do (deletion of a record never seen locally)
    Skipped,
}

impl ApplyOutcome {
    /// Whether the local table changed
    pub const fn is_change(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Deleted)
    }
}

/// Locate the local row a server version refers to.
///
/// Records the server knows by id are matched on `server_id`. A record whose
/// create acknowledgement was lost has no server id yet, so the echoed client
/// id is tried against rows still lacking one.
fn find_local(txn: &WriteTxn<'_>, entity: EntityType, remote: &RemoteRecord) -> Result<Option<RawRecord>> {
    if let Some(found) = db::records::find_by_server_id(txn, entity, &remote.server_id)? {
        return Ok(Some(found));
    }
    let Some(client_id) = remote.client_id else {
        return Ok(None);
    };
    Ok(db::records::get(txn, entity, &client_id)?.filter(|raw| raw.server_id.is_none()))
}

/// Apply one pulled server version inside the caller's transaction.
pub(crate) fn apply_remote(
    txn: &mut WriteTxn<'_>,
    entity: EntityType,
    remote: &RemoteRecord,
) -> Result<ApplyOutcome> {
    let Some(local) = find_local(txn, entity, remote)? else {
        if remote.deleted {
            return Ok(ApplyOutcome::Skipped);
        }
        let mut raw = RawRecord {
            id: remote.client_id.unwrap_or_default(),
            server_id: Some(remote.server_id.clone()),
            payload: remote.payload.clone(),
            created_at: remote.updated_at,
            updated_at: remote.updated_at,
            deleted: false,
        };
        if db::records::get(txn, entity, &raw.id)?.is_some() {
            // Client id already bound locally to a different server record
            raw.id = RecordId::new();
        }
        return insert(txn, entity, raw);
    };

    if db::outbox::count_for_record(txn, entity, &local.id)? > 0 {
        let delta = DeferredDelta {
            entity,
            record_id: local.id,
            server_id: remote.server_id.clone(),
            payload: remote.payload.clone(),
            remote_updated_at: remote.updated_at,
            deleted: remote.deleted,
        };
        db::sync_state::park(txn, &delta, txn.now())?;
        tracing::debug!(
            "Deferred remote {entity} {} behind pending local operations",
            local.id
        );
        return Ok(ApplyOutcome::Deferred);
    }

    overwrite(
        txn,
        entity,
        local,
        &remote.server_id,
        &remote.payload,
        remote.updated_at,
        remote.deleted,
    )
}

/// Apply a parked server version once the record has no pending operations.
///
/// `accepted_at` is the server time of the acknowledgement that drained the
/// outbox, if any; a parked version no newer than it is already superseded by
/// the local write the server just accepted.
pub(crate) fn release_deferred(
    txn: &mut WriteTxn<'_>,
    entity: EntityType,
    record_id: &RecordId,
    accepted_at: Option<i64>,
) -> Result<Option<ApplyOutcome>> {
    if db::outbox::count_for_record(txn, entity, record_id)? > 0 {
        return Ok(None);
    }
    let Some(delta) = db::sync_state::take(txn, entity, record_id)? else {
        return Ok(None);
    };
    if accepted_at.is_some_and(|at| delta.remote_updated_at <= at) {
        tracing::debug!("Dropped superseded remote version of {entity} {record_id}");
        return Ok(Some(ApplyOutcome::Unchanged));
    }

    let outcome = match db::records::get(txn, entity, record_id)? {
        Some(local) => overwrite(
            txn,
            entity,
            local,
            &delta.server_id,
            &delta.payload,
            delta.remote_updated_at,
            delta.deleted,
        )?,
        None if delta.deleted => ApplyOutcome::Skipped,
        None => insert(
            txn,
            entity,
            RawRecord {
                id: *record_id,
                server_id: Some(delta.server_id),
                payload: delta.payload,
                created_at: delta.remote_updated_at,
                updated_at: delta.remote_updated_at,
                deleted: false,
            },
        )?,
    };
    Ok(Some(outcome))
}

fn insert(txn: &mut WriteTxn<'_>, entity: EntityType, raw: RawRecord) -> Result<ApplyOutcome> {
    db::records::insert(txn, entity, &raw)?;
    txn.record_change(entity, raw.id, ChangeOrigin::Remote);
    Ok(ApplyOutcome::Inserted)
}

/// Replace a local row with a server version. Timestamps come from the server
/// so reapplying the same version is a no-op.
fn overwrite(
    txn: &mut WriteTxn<'_>,
    entity: EntityType,
    local: RawRecord,
    server_id: &str,
    payload: &serde_json::Value,
    updated_at: i64,
    deleted: bool,
) -> Result<ApplyOutcome> {
    let id = local.id;
    if deleted {
        db::records::purge(txn, entity, &id)?;
        txn.record_change(entity, id, ChangeOrigin::Remote);
        return Ok(ApplyOutcome::Deleted);
    }

    let assigned = if local.server_id.is_none() {
        db::records::assign_server_id(txn, entity, &id, server_id)?
    } else {
        false
    };
    if !assigned && !local.deleted && local.payload == *payload && local.updated_at == updated_at {
        return Ok(ApplyOutcome::Unchanged);
    }

    let raw = RawRecord {
        payload: payload.clone(),
        updated_at,
        deleted: false,
        ..local
    };
    db::records::update(txn, entity, &raw)?;
    txn.record_change(entity, id, ChangeOrigin::Remote);
    Ok(ApplyOutcome::Updated)
}
