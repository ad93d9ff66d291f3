//! `sync_state` and `deferred_deltas` table access

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{EntityType, RecordId};

/// Persisted per-entity sync bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStateRow {
    pub cursor: Option<String>,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
}

pub fn load(conn: &Connection, entity: EntityType) -> Result<SyncStateRow> {
    Ok(conn
        .query_row(
            "SELECT cursor, last_synced_at, last_error FROM sync_state WHERE entity_type = ?",
            params![entity.as_str()],
            |row| {
                Ok(SyncStateRow {
                    cursor: row.get(0)?,
                    last_synced_at: row.get(1)?,
                    last_error: row.get(2)?,
                })
            },
        )
        .optional()?
        .unwrap_or_default())
}

pub fn set_cursor(conn: &Connection, entity: EntityType, cursor: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (entity_type, cursor) VALUES (?1, ?2)
         ON CONFLICT(entity_type) DO UPDATE SET cursor = excluded.cursor",
        params![entity.as_str(), cursor],
    )?;
    Ok(())
}

/// Record a fully successful cycle and clear the last error
pub fn mark_synced(conn: &Connection, entity: EntityType, at: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (entity_type, last_synced_at, last_error) VALUES (?1, ?2, NULL)
         ON CONFLICT(entity_type) DO UPDATE SET last_synced_at = excluded.last_synced_at,
                                                last_error = NULL",
        params![entity.as_str(), at],
    )?;
    Ok(())
}

pub fn set_error(conn: &Connection, entity: EntityType, error: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (entity_type, last_error) VALUES (?1, ?2)
         ON CONFLICT(entity_type) DO UPDATE SET last_error = excluded.last_error",
        params![entity.as_str(), error],
    )?;
    Ok(())
}

/// A pulled server version held back behind an in-flight local edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredDelta {
    pub entity: EntityType,
    pub record_id: RecordId,
    pub server_id: String,
    pub payload: serde_json::Value,
    pub remote_updated_at: i64,
    pub deleted: bool,
}

/// Park a delta, keeping whichever version is newer if one is already parked
pub fn park(conn: &Connection, delta: &DeferredDelta, received_at: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO deferred_deltas
             (entity_type, record_id, server_id, payload, remote_updated_at, deleted, received_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(entity_type, record_id) DO UPDATE SET
             server_id = excluded.server_id,
             payload = excluded.payload,
             remote_updated_at = excluded.remote_updated_at,
             deleted = excluded.deleted,
             received_at = excluded.received_at
         WHERE excluded.remote_updated_at >= deferred_deltas.remote_updated_at",
        params![
            delta.entity.as_str(),
            delta.record_id.as_str(),
            delta.server_id,
            delta.payload,
            delta.remote_updated_at,
            i32::from(delta.deleted),
            received_at,
        ],
    )?;
    Ok(())
}

/// Remove and return the parked delta for a record
pub fn take(
    conn: &Connection,
    entity: EntityType,
    record_id: &RecordId,
) -> Result<Option<DeferredDelta>> {
    let delta = conn
        .query_row(
            "SELECT server_id, payload, remote_updated_at, deleted FROM deferred_deltas
             WHERE entity_type = ? AND record_id = ?",
            params![entity.as_str(), record_id.as_str()],
            |row| {
                Ok(DeferredDelta {
                    entity,
                    record_id: *record_id,
                    server_id: row.get(0)?,
                    payload: row.get(1)?,
                    remote_updated_at: row.get(2)?,
                    deleted: row.get::<_, i32>(3)? != 0,
                })
            },
        )
        .optional()?;

    if delta.is_some() {
        discard(conn, entity, record_id)?;
    }
    Ok(delta)
}

pub fn discard(conn: &Connection, entity: EntityType, record_id: &RecordId) -> Result<()> {
    conn.execute(
        "DELETE FROM deferred_deltas WHERE entity_type = ? AND record_id = ?",
        params![entity.as_str(), record_id.as_str()],
    )?;
    Ok(())
}

pub fn count_parked(conn: &Connection, entity: EntityType) -> Result<usize> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM deferred_deltas WHERE entity_type = ?",
        params![entity.as_str()],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn delta(record_id: RecordId, updated_at: i64, score: u8) -> DeferredDelta {
        DeferredDelta {
            entity: EntityType::MoodEntry,
            record_id,
            server_id: "srv".to_string(),
            payload: json!({ "score": score, "recorded_at": 1 }),
            remote_updated_at: updated_at,
            deleted: false,
        }
    }

    #[test]
    fn cursor_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        assert_eq!(load(conn, EntityType::MoodEntry).unwrap(), SyncStateRow::default());

        set_cursor(conn, EntityType::MoodEntry, Some("7")).unwrap();
        mark_synced(conn, EntityType::MoodEntry, 99).unwrap();
        let state = load(conn, EntityType::MoodEntry).unwrap();
        assert_eq!(state.cursor.as_deref(), Some("7"));
        assert_eq!(state.last_synced_at, Some(99));
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn mark_synced_clears_error() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        set_error(conn, EntityType::JournalEntry, "timeout").unwrap();
        assert_eq!(
            load(conn, EntityType::JournalEntry).unwrap().last_error.as_deref(),
            Some("timeout")
        );
        mark_synced(conn, EntityType::JournalEntry, 5).unwrap();
        assert_eq!(load(conn, EntityType::JournalEntry).unwrap().last_error, None);
    }

    #[test]
    fn park_keeps_newest_version() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let id = RecordId::new();

        park(conn, &delta(id, 20, 3), 1).unwrap();
        park(conn, &delta(id, 10, 9), 2).unwrap();
        assert_eq!(count_parked(conn, EntityType::MoodEntry).unwrap(), 1);

        let taken = take(conn, EntityType::MoodEntry, &id).unwrap().unwrap();
        assert_eq!(taken.remote_updated_at, 20);
        assert_eq!(taken.payload["score"], 3);
        assert!(take(conn, EntityType::MoodEntry, &id).unwrap().is_none());
    }
}
