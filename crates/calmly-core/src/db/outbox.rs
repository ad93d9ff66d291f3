//! `outbox_ops` table access

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_column;
use crate::error::Result;
use crate::models::{EntityType, OpId, OutboxEntry, RecordId};

const COLUMNS: &str = "seq, op_id, entity_type, record_id, kind, payload, attempt_count, \
                       created_at, last_attempt_at, next_retry_at, last_error";

pub(super) fn parse_entry(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let op_id: String = row.get(1)?;
    let entity_type: String = row.get(2)?;
    let record_id: String = row.get(3)?;
    let kind: String = row.get(4)?;
    Ok(OutboxEntry {
        seq: row.get(0)?,
        id: parse_column(1, &op_id)?,
        entity_type: parse_column(2, &entity_type)?,
        record_id: parse_column(3, &record_id)?,
        kind: parse_column(4, &kind)?,
        payload: row.get(5)?,
        attempt_count: row.get(6)?,
        created_at: row.get(7)?,
        last_attempt_at: row.get(8)?,
        next_retry_at: row.get(9)?,
        last_error: row.get(10)?,
    })
}

/// Append an entry. The sequence number is assigned here and returned.
pub fn insert(conn: &Connection, entry: &OutboxEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO outbox_ops (op_id, entity_type, record_id, kind, payload, attempt_count,
                                 created_at, last_attempt_at, next_retry_at, last_error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.id.as_str(),
            entry.entity_type.as_str(),
            entry.record_id.as_str(),
            entry.kind.as_str(),
            entry.payload,
            entry.attempt_count,
            entry.created_at,
            entry.last_attempt_at,
            entry.next_retry_at,
            entry.last_error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Entries due at `now`, oldest first.
///
/// An entry is held back while any earlier entry for the same record is still
/// waiting out its backoff, so per-record order survives retries.
pub fn due(conn: &Connection, entity: EntityType, now: i64, limit: usize) -> Result<Vec<OutboxEntry>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM outbox_ops o
         WHERE o.entity_type = ?1
           AND o.next_retry_at <= ?2
           AND NOT EXISTS (
               SELECT 1 FROM outbox_ops p
               WHERE p.entity_type = o.entity_type
                 AND p.record_id = o.record_id
                 AND p.seq < o.seq
                 AND p.next_retry_at > ?2
           )
         ORDER BY o.seq ASC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(
            params![entity.as_str(), now, limit as i64],
            parse_entry,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn get(conn: &Connection, id: &OpId) -> Result<Option<OutboxEntry>> {
    let sql = format!("SELECT {COLUMNS} FROM outbox_ops WHERE op_id = ?");
    Ok(conn
        .query_row(&sql, params![id.as_str()], parse_entry)
        .optional()?)
}

/// All entries, optionally for one entity type, oldest first
pub fn list(conn: &Connection, entity: Option<EntityType>) -> Result<Vec<OutboxEntry>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM outbox_ops
         WHERE ?1 IS NULL OR entity_type = ?1
         ORDER BY seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![entity.map(EntityType::as_str)], parse_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn delete(conn: &Connection, id: &OpId) -> Result<bool> {
    let rows = conn.execute("DELETE FROM outbox_ops WHERE op_id = ?", params![id.as_str()])?;
    Ok(rows > 0)
}

/// Count one failed attempt and push the entry's next retry out.
pub fn record_failure(
    conn: &Connection,
    id: &OpId,
    attempted_at: i64,
    next_retry_at: i64,
    error: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE outbox_ops
         SET attempt_count = attempt_count + 1,
             last_attempt_at = ?,
             next_retry_at = ?,
             last_error = ?
         WHERE op_id = ?",
        params![attempted_at, next_retry_at, error, id.as_str()],
    )?;
    Ok(rows > 0)
}

pub fn count(conn: &Connection, entity: Option<EntityType>) -> Result<usize> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM outbox_ops WHERE ?1 IS NULL OR entity_type = ?1",
        params![entity.map(EntityType::as_str)],
        |row| row.get(0),
    )?)
}

pub fn count_for_record(conn: &Connection, entity: EntityType, record_id: &RecordId) -> Result<usize> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM outbox_ops WHERE entity_type = ? AND record_id = ?",
        params![entity.as_str(), record_id.as_str()],
        |row| row.get(0),
    )?)
}

/// Records of one entity type with at least one unacknowledged entry
pub fn pending_record_ids(conn: &Connection, entity: EntityType) -> Result<HashSet<RecordId>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT record_id FROM outbox_ops WHERE entity_type = ?")?;
    let ids = stmt
        .query_map(params![entity.as_str()], |row| {
            let id: String = row.get(0)?;
            parse_column(0, &id)
        })?
        .collect::<rusqlite::Result<HashSet<RecordId>>>()?;
    Ok(ids)
}
