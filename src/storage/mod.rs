//! Durable store for events that overflowed the in-memory buffer.
//!
//! The store holds one ordered sequence of events. Implementations only
//! need `load` and `save`; eviction has a default in terms of both.
//! All methods may block and are only called from the background worker
//! (see [`crate::runtime::worker`]).

mod migrations;
mod sqlite;

pub use sqlite::SqliteStorage;

use std::sync::Mutex;

use thiserror::Error;

use crate::event::Event;

/// Key the event sequence is stored under.
pub const STORAGE_KEY: &str = "trackbuffer-events";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored events are unreadable: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("migration failed: {0}")]
    Migration(String),
}

pub trait Storage: Send + Sync {
    /// Stored events, oldest first. An absent store loads as empty.
    fn load(&self) -> Result<Vec<Event>, StorageError>;

    /// Replace the stored sequence.
    fn save(&self, events: &[Event]) -> Result<(), StorageError>;

    /// Drop the oldest stored event, if any.
    fn evict_oldest(&self) -> Result<(), StorageError> {
        let mut events = self.load()?;
        if events.is_empty() {
            return Ok(());
        }
        events.remove(0);
        self.save(&events)
    }
}

/// Volatile store, for hosts without a writable disk and for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    events: Mutex<Vec<Event>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Vec<Event>, StorageError> {
        Ok(self.events.lock().expect("storage mutex poisoned").clone())
    }

    fn save(&self, events: &[Event]) -> Result<(), StorageError> {
        *self.events.lock().expect("storage mutex poisoned") = events.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(n: u64) -> Event {
        serde_json::from_value(json!({ "action": "pageview", "n": n })).unwrap()
    }

    #[test]
    fn evict_oldest_drops_front_of_sequence() {
        let storage = MemoryStorage::with_events(vec![event(1), event(2), event(3)]);

        storage.evict_oldest().unwrap();

        assert_eq!(storage.load().unwrap(), vec![event(2), event(3)]);
    }

    #[test]
    fn evict_oldest_on_empty_store_is_noop() {
        let storage = MemoryStorage::new();
        storage.evict_oldest().unwrap();
        assert!(storage.load().unwrap().is_empty());
    }
}
