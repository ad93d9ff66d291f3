//! `failed_ops` table access

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::outbox::parse_entry;
use super::parse_column;
use crate::error::Result;
use crate::models::{DeadLetterEntry, EntityType, FailureReason, OpId};

const COLUMNS: &str = "seq, op_id, entity_type, record_id, kind, payload, attempt_count, \
                       created_at, last_attempt_at, next_retry_at, last_error, \
                       failure_kind, reason, moved_at";

fn parse_dead_letter(row: &Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
    let failure_kind: String = row.get(11)?;
    Ok(DeadLetterEntry {
        entry: parse_entry(row)?,
        reason: FailureReason {
            kind: parse_column(11, &failure_kind)?,
            message: row.get(12)?,
        },
        moved_at: row.get(13)?,
    })
}

pub fn insert(conn: &Connection, dead: &DeadLetterEntry) -> Result<()> {
    let entry = &dead.entry;
    conn.execute(
        &format!("INSERT INTO failed_ops ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            entry.seq,
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
            dead.reason.kind.as_str(),
            dead.reason.message,
            dead.moved_at,
        ],
    )?;
    Ok(())
}

/// Newest failures first
pub fn list(conn: &Connection) -> Result<Vec<DeadLetterEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM failed_ops ORDER BY moved_at DESC, seq DESC"
    ))?;
    let entries = stmt
        .query_map([], parse_dead_letter)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn get(conn: &Connection, id: &OpId) -> Result<Option<DeadLetterEntry>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM failed_ops WHERE op_id = ?"),
            params![id.as_str()],
            parse_dead_letter,
        )
        .optional()?)
}

pub fn delete(conn: &Connection, id: &OpId) -> Result<bool> {
    let rows = conn.execute("DELETE FROM failed_ops WHERE op_id = ?", params![id.as_str()])?;
    Ok(rows > 0)
}

pub fn count(conn: &Connection, entity: Option<EntityType>) -> Result<usize> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM failed_ops WHERE ?1 IS NULL OR entity_type = ?1",
        params![entity.map(EntityType::as_str)],
        |row| row.get(0),
    )?)
}
