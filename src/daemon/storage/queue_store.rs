use std::{ops::Deref, path::Path};

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

use super::entities::{QueueEntry, UsageRecord};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("queue database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("queue directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interface for the durable queue of records that haven't been acknowledged by the endpoint.
pub trait QueueStore {
    /// Appends a record. The record is durable once this returns.
    fn enqueue(&self, record: &UsageRecord) -> Result<i64, StorageError>;

    /// Returns every pending record in insertion order. Always reflects the current contents of
    /// the store.
    fn list_pending(&self) -> Result<Vec<QueueEntry>, StorageError>;

    /// Deletes the entry with the given id. Missing ids are ignored.
    fn remove(&self, id: i64) -> Result<(), StorageError>;

    fn pending_count(&self) -> Result<u64, StorageError>;
}

impl<T: Deref> QueueStore for T
where
    T::Target: QueueStore,
{
    fn enqueue(&self, record: &UsageRecord) -> Result<i64, StorageError> {
        self.deref().enqueue(record)
    }

    fn list_pending(&self) -> Result<Vec<QueueEntry>, StorageError> {
        self.deref().list_pending()
    }

    fn remove(&self, id: i64) -> Result<(), StorageError> {
        self.deref().remove(id)
    }

    fn pending_count(&self) -> Result<u64, StorageError> {
        self.deref().pending_count()
    }
}

/// The main realization of [QueueStore]. Every statement runs in its own implicit transaction
/// with `synchronous=FULL`, so nothing is buffered in memory.
pub struct SqliteQueueStore {
    conn: Connection,
}

impl SqliteQueueStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening queue at {path:?}");
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA synchronous=FULL;
            CREATE TABLE IF NOT EXISTS queue (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                system_id TEXT NOT NULL,
                app_name  TEXT NOT NULL,
                duration  REAL NOT NULL,
                location  TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Oldest pending entry, used by diagnostics.
    pub fn oldest_pending(&self) -> Result<Option<QueueEntry>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, system_id, app_name, duration, location, timestamp
                 FROM queue ORDER BY id ASC LIMIT 1",
                [],
                row_to_entry,
            )
            .optional()?)
    }
}

fn row_to_entry(row: &Row) -> Result<QueueEntry, rusqlite::Error> {
    let identity: String = row.get("system_id")?;
    let application: String = row.get("app_name")?;
    let location: String = row.get("location")?;
    Ok(QueueEntry {
        id: row.get("id")?,
        record: UsageRecord {
            identity: identity.into(),
            application: application.into(),
            duration_seconds: row.get("duration")?,
            location: location.into(),
            end_timestamp: row.get("timestamp")?,
        },
    })
}

impl QueueStore for SqliteQueueStore {
    fn enqueue(&self, record: &UsageRecord) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO queue (system_id, app_name, duration, location, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &*record.identity,
                &*record.application,
                record.duration_seconds,
                &*record.location,
                record.end_timestamp,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Queued record {id} for {}", record.application);
        Ok(id)
    }

    fn list_pending(&self) -> Result<Vec<QueueEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, system_id, app_name, duration, location, timestamp
             FROM queue ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn remove(&self, id: i64) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn pending_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
