//! Storage module for persisting crawl progress
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Run tracking and resumption support
//! - Per-entity scroll state checkpoints
//! - The persistent work queue
//! - Credential counter snapshots

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{CheckpointStore, Storage, StorageError, StorageResult};

use crate::state::ScrollState;
use crate::TidemarkError;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(TidemarkError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, TidemarkError> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A storage backend shared between the coordinator, the queue and the
/// pagination loops
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<Mutex<SqliteStorage>>,
}

impl SharedStorage {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    /// Locks the underlying storage
    ///
    /// Every write is a single statement or an upsert, so a guard recovered
    /// from a poisoned lock still sees a consistent database.
    pub fn lock(&self) -> MutexGuard<'_, SqliteStorage> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CheckpointStore for SharedStorage {
    fn load(&self, run_id: i64) -> StorageResult<HashMap<String, ScrollState>> {
        self.lock().load_scroll_states(run_id)
    }

    fn save_entity(
        &self,
        run_id: i64,
        entity_id: &str,
        state: &ScrollState,
    ) -> StorageResult<()> {
        self.lock().upsert_scroll_state(run_id, entity_id, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_shared_storage_checkpoint_roundtrip() {
        let shared = SharedStorage::new(SqliteStorage::new_in_memory().unwrap());
        let run_id = shared.lock().create_run("hash").unwrap();

        let mut state = ScrollState::new();
        state.mark_seen("1");
        state.mark_seen("2");
        shared.save_entity(run_id, "nasa", &state).unwrap();
        shared.save_entity(run_id, "nasa", &state).unwrap();

        let loaded = shared.load(run_id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("nasa"), Some(&state));
    }
}
