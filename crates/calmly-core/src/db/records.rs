//! Row-level access to the per-entity tables
//!
//! Table names come from [`EntityType::table`], never from user input.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_column;
use crate::error::Result;
use crate::models::{EntityType, RawRecord, RecordId};

const COLUMNS: &str = "id, server_id, payload, created_at, updated_at, deleted";

fn parse_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    let id: String = row.get(0)?;
    Ok(RawRecord {
        id: parse_column(0, &id)?,
        server_id: row.get(1)?,
        payload: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        deleted: row.get::<_, i32>(5)? != 0,
    })
}

/// Fetch a row by local id, tombstones included
pub fn get(conn: &Connection, entity: EntityType, id: &RecordId) -> Result<Option<RawRecord>> {
    let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?", entity.table());
    Ok(conn
        .query_row(&sql, params![id.as_str()], parse_record)
        .optional()?)
}

/// Fetch a row by server id, tombstones included
pub fn find_by_server_id(
    conn: &Connection,
    entity: EntityType,
    server_id: &str,
) -> Result<Option<RawRecord>> {
    let sql = format!("SELECT {COLUMNS} FROM {} WHERE server_id = ?", entity.table());
    Ok(conn
        .query_row(&sql, params![server_id], parse_record)
        .optional()?)
}

/// Live rows, most recently updated first
pub fn list(conn: &Connection, entity: EntityType) -> Result<Vec<RawRecord>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM {} WHERE deleted = 0 ORDER BY updated_at DESC, id DESC",
        entity.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], parse_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn insert(conn: &Connection, entity: EntityType, record: &RawRecord) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)",
        entity.table()
    );
    conn.execute(
        &sql,
        params![
            record.id.as_str(),
            record.server_id,
            record.payload,
            record.created_at,
            record.updated_at,
            i32::from(record.deleted)
        ],
    )?;
    Ok(())
}

/// Overwrite the mutable columns. `server_id` and `created_at` are left alone.
pub fn update(conn: &Connection, entity: EntityType, record: &RawRecord) -> Result<bool> {
    let sql = format!(
        "UPDATE {} SET payload = ?, updated_at = ?, deleted = ? WHERE id = ?",
        entity.table()
    );
    let rows = conn.execute(
        &sql,
        params![
            record.payload,
            record.updated_at,
            i32::from(record.deleted),
            record.id.as_str()
        ],
    )?;
    Ok(rows > 0)
}

/// Attach a server id to a record that has none. Returns false if one was already set.
pub fn assign_server_id(
    conn: &Connection,
    entity: EntityType,
    id: &RecordId,
    server_id: &str,
) -> Result<bool> {
    let sql = format!(
        "UPDATE {} SET server_id = ? WHERE id = ? AND server_id IS NULL",
        entity.table()
    );
    let rows = conn.execute(&sql, params![server_id, id.as_str()])?;
    Ok(rows > 0)
}

/// Hard-delete a row
pub fn purge(conn: &Connection, entity: EntityType, id: &RecordId) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?", entity.table());
    let rows = conn.execute(&sql, params![id.as_str()])?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn raw(payload: serde_json::Value) -> RawRecord {
        RawRecord {
            id: RecordId::new(),
            server_id: None,
            payload,
            created_at: 10,
            updated_at: 10,
            deleted: false,
        }
    }

    #[test]
    fn insert_get_and_list() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let record = raw(json!({ "score": 5, "recorded_at": 1 }));
        insert(conn, EntityType::MoodEntry, &record).unwrap();

        let fetched = get(conn, EntityType::MoodEntry, &record.id).unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(list(conn, EntityType::MoodEntry).unwrap().len(), 1);
        assert!(list(conn, EntityType::JournalEntry).unwrap().is_empty());
    }

    #[test]
    fn server_id_is_assigned_once() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let record = raw(json!({ "title": "t", "body": "" }));
        insert(conn, EntityType::JournalEntry, &record).unwrap();

        assert!(assign_server_id(conn, EntityType::JournalEntry, &record.id, "srv-1").unwrap());
        assert!(!assign_server_id(conn, EntityType::JournalEntry, &record.id, "srv-2").unwrap());

        let found = find_by_server_id(conn, EntityType::JournalEntry, "srv-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
    }

    #[test]
    fn tombstones_are_hidden_from_list_until_purged() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut record = raw(json!({ "score": 5, "recorded_at": 1 }));
        insert(conn, EntityType::MoodEntry, &record).unwrap();

        record.deleted = true;
        update(conn, EntityType::MoodEntry, &record).unwrap();
        assert!(list(conn, EntityType::MoodEntry).unwrap().is_empty());
        assert!(get(conn, EntityType::MoodEntry, &record.id).unwrap().is_some());

        assert!(purge(conn, EntityType::MoodEntry, &record.id).unwrap());
        assert!(get(conn, EntityType::MoodEntry, &record.id).unwrap().is_none());
    }
}
