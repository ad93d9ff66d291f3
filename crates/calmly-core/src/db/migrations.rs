//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

fn apply(conn: &mut Connection, version: i32, statements: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(statements)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: entity tables, outbox, dead letters, cursors
const MIGRATION_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS mood_entries (
        id TEXT PRIMARY KEY,
        server_id TEXT UNIQUE,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_mood_entries_updated ON mood_entries(updated_at DESC);

    CREATE TABLE IF NOT EXISTS journal_entries (
        id TEXT PRIMARY KEY,
        server_id TEXT UNIQUE,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_journal_entries_updated ON journal_entries(updated_at DESC);

    CREATE TABLE IF NOT EXISTS outbox_ops (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        op_id TEXT NOT NULL UNIQUE,
        entity_type TEXT NOT NULL,
        record_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        last_attempt_at INTEGER,
        next_retry_at INTEGER NOT NULL,
        last_error TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_outbox_record ON outbox_ops(entity_type, record_id, seq);
    CREATE INDEX IF NOT EXISTS idx_outbox_due ON outbox_ops(entity_type, next_retry_at);

    CREATE TABLE IF NOT EXISTS failed_ops (
        op_id TEXT PRIMARY KEY,
        seq INTEGER NOT NULL,
        entity_type TEXT NOT NULL,
        record_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT,
        attempt_count INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        last_attempt_at INTEGER,
        next_retry_at INTEGER NOT NULL,
        last_error TEXT,
        failure_kind TEXT NOT NULL,
        reason TEXT NOT NULL,
        moved_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_failed_ops_moved ON failed_ops(moved_at DESC);

    CREATE TABLE IF NOT EXISTS sync_state (
        entity_type TEXT PRIMARY KEY,
        cursor TEXT,
        last_synced_at INTEGER,
        last_error TEXT
    );
";

/// Version 2: remote versions parked behind in-flight local edits
const MIGRATION_V2: &str = "
    CREATE TABLE IF NOT EXISTS deferred_deltas (
        entity_type TEXT NOT NULL,
        record_id TEXT NOT NULL,
        server_id TEXT NOT NULL,
        payload TEXT,
        remote_updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        received_at INTEGER NOT NULL,
        PRIMARY KEY (entity_type, record_id)
    );
";

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_all_sync_tables_exist() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        for table in [
            "mood_entries",
            "journal_entries",
            "outbox_ops",
            "failed_ops",
            "sync_state",
            "deferred_deltas",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }
}
