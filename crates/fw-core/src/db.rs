use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use tokio_rusqlite::Connection;

/// Errors surfaced by the SQLite-backed stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Shared handle to the SQLite database holding the event log, checkpoints,
/// and the folder/file tree.
///
/// Cloning is cheap: every clone talks to the same background connection
/// thread, so writes from different stores are serialized by SQLite itself.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Sqlite(tokio_rusqlite::Error::Other(Box::new(e)))
                })?;
            }
        }
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;

                    -- AUTOINCREMENT: event ids are never reused, even after vacuum.
                    CREATE TABLE IF NOT EXISTS file_change_events (
                        id            INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id       INTEGER NOT NULL,
                        entity_type   TEXT NOT NULL,
                        entity_id     INTEGER NOT NULL,
                        action        TEXT NOT NULL,
                        old_parent_id INTEGER,
                        new_parent_id INTEGER,
                        old_name      TEXT,
                        new_name      TEXT,
                        payload       TEXT,
                        created_at    TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_events_user_id
                        ON file_change_events(user_id, id);

                    CREATE TABLE IF NOT EXISTS organize_checkpoints (
                        user_id           INTEGER PRIMARY KEY,
                        last_event_id     INTEGER NOT NULL DEFAULT 0,
                        last_full_scan_at TEXT,
                        updated_at        TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS folders (
                        id        INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id   INTEGER NOT NULL,
                        name      TEXT NOT NULL,
                        parent_id INTEGER REFERENCES folders(id)
                    );

                    CREATE INDEX IF NOT EXISTS idx_folders_user   ON folders(user_id);
                    CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);

                    CREATE TABLE IF NOT EXISTS files (
                        id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id     INTEGER NOT NULL,
                        name        TEXT NOT NULL,
                        parent_id   INTEGER REFERENCES folders(id),
                        size        INTEGER,
                        mime_type   TEXT,
                        description TEXT,
                        created_at  TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_files_user   ON files(user_id);
                    CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_id);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_kind<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_json(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
