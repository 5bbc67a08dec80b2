use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{migrations, Storage, StorageError, STORAGE_KEY};
use crate::event::Event;

/// SQLite-backed store. The whole sequence is kept as one JSON document
/// under a single key, so a save is one atomic row write.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    key: String,
}

impl SqliteStorage {
    /// Open (or create) a database file at `path`, enable WAL mode, and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    /// Store the sequence under `key` instead of [`STORAGE_KEY`].
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            key: STORAGE_KEY.to_string(),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("event store mutex poisoned")
    }

    #[cfg(test)]
    fn write_raw(&self, raw: &str) -> Result<(), StorageError> {
        self.write_json(raw)
    }

    fn write_json(&self, events_json: &str) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO event_store (key, events_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key)
             DO UPDATE SET events_json = excluded.events_json, updated_at = excluded.updated_at",
            params![self.key, events_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn load(&self) -> Result<Vec<Event>, StorageError> {
        let raw: Option<String> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT events_json FROM event_store WHERE key = ?1")?;
            let mut rows = stmt.query_map(params![self.key], |row| row.get(0))?;
            let raw = match rows.next() {
                Some(row) => Some(row?),
                None => None,
            };
            raw
        };

        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, events: &[Event]) -> Result<(), StorageError> {
        let events_json = serde_json::to_string(events)?;
        self.write_json(&events_json)
    }
}
