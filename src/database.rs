use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const APP_DIR_NAME: &str = "workflow-mindmaps";
const DB_FILE_NAME: &str = "workflow.db";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to acquire database lock")]
    Lock,
    #[error("No data directory available on this platform")]
    NoDataDir,
}

/// Local SQLite database shared by the stores.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at the default location under the platform data dir.
    pub fn new() -> Result<Self, DbError> {
        let path = Self::default_path()?;
        Self::open(&path)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database path, `WORKFLOW_DB_PATH` wins when set.
    pub fn default_path() -> Result<PathBuf, DbError> {
        if let Ok(path) = std::env::var("WORKFLOW_DB_PATH") {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        let data_dir = dirs::data_dir().ok_or(DbError::NoDataDir)?;
        Ok(data_dir.join(APP_DIR_NAME).join(DB_FILE_NAME))
    }

    /// Create the key/value table backing the persisted stores
    pub fn create_local_storage_table(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Read a raw value stored under `key`
    pub fn get_item(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        let value = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Write (insert or replace) the value stored under `key`
    pub fn set_item(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        )?;

        Ok(())
    }

    /// Remove the value stored under `key`
    pub fn remove_item(&self, key: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        let affected = conn.execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.create_local_storage_table().unwrap();

        assert_eq!(db.get_item("missing").unwrap(), None);

        db.set_item("k", "v1").unwrap();
        db.set_item("k", "v2").unwrap();
        assert_eq!(db.get_item("k").unwrap().as_deref(), Some("v2"));

        assert!(db.remove_item("k").unwrap());
        assert!(!db.remove_item("k").unwrap());
        assert_eq!(db.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workflow.db");

        let db = Database::open(&path).unwrap();
        db.create_local_storage_table().unwrap();
        db.set_item("k", "v").unwrap();

        assert!(path.exists());
    }
}
