//! Database connection management

use crate::error::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

use super::migrations;

/// Database wrapper for the local `SQLite` file
///
/// The file is owned exclusively by this process; entity tables and the
/// outbox, dead-letter, and cursor tables share one transactional boundary.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let mut database = Self {
            conn,
            path: Some(path.as_ref().to_path_buf()),
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut database = Self { conn, path: None };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for an embedded single-writer workload
    fn configure(&self) -> Result<()> {
        // In-memory databases report "memory" instead of switching to WAL
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// File backing this database; `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, needed to open transactions
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Open an extra read-only connection to a migrated database file.
///
/// Under WAL such connections read the last committed state without waiting
/// for the writer.
pub fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let value: i32 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_open_file_uses_wal() {
        let tmp = tempdir().unwrap();
        let db = Database::open(tmp.path().join("calmly.db")).unwrap();
        let mode: String = db
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }

    #[test]
    fn test_reader_sees_committed_rows_and_cannot_write() {
        let tmp = tempdir().unwrap();
        let db = Database::open(tmp.path().join("calmly.db")).unwrap();
        db.connection()
            .execute(
                "INSERT INTO sync_state (entity_type, cursor) VALUES ('mood_entry', '7')",
                [],
            )
            .unwrap();

        let reader = open_reader(db.path().unwrap()).unwrap();
        let cursor: String = reader
            .query_row(
                "SELECT cursor FROM sync_state WHERE entity_type = 'mood_entry'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(cursor, "7");
        assert!(reader
            .execute("DELETE FROM sync_state", [])
            .is_err());
        assert!(Database::open_in_memory().unwrap().path().is_none());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("calmly.db");
        {
            let db = Database::open(&path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO sync_state (entity_type, cursor) VALUES ('mood_entry', '42')",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let cursor: String = db
            .connection()
            .query_row(
                "SELECT cursor FROM sync_state WHERE entity_type = 'mood_entry'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(cursor, "42");
    }
}
