//! Storage traits and error types
//!
//! This module defines the trait interfaces for storage backends and
//! associated error types.

use crate::credentials::Credential;
use crate::queue::{QueuedItem, WorkItem, WorkStatus};
use crate::state::ScrollState;
use crate::storage::{RunRecord, RunStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the coordinator and
/// the persistent queue. Callers share one backend behind a mutex.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as finished with the given terminal status
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Scroll State Persistence =====

    /// Loads every entity checkpoint recorded for a run
    fn load_scroll_states(&self, run_id: i64) -> StorageResult<HashMap<String, ScrollState>>;

    /// Inserts or replaces one entity checkpoint
    ///
    /// Writing the same snapshot twice leaves the table unchanged.
    fn upsert_scroll_state(
        &mut self,
        run_id: i64,
        entity_id: &str,
        state: &ScrollState,
    ) -> StorageResult<()>;

    // ===== Work Queue =====

    /// Adds a work item unless one with the same key already exists in the run
    ///
    /// # Returns
    ///
    /// `true` if the item was inserted, `false` if it was a duplicate
    fn insert_work_item(&mut self, run_id: i64, key: &str, item: &WorkItem)
        -> StorageResult<bool>;

    /// Claims the oldest pending work item, marking it in progress
    fn claim_work_item(&mut self, run_id: i64) -> StorageResult<Option<QueuedItem>>;

    /// Sets the final status of a work item
    fn set_work_item_status(
        &mut self,
        run_id: i64,
        key: &str,
        status: WorkStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Returns in-progress items of a run to pending (crash recovery)
    ///
    /// # Returns
    ///
    /// The number of items reclaimed
    fn reclaim_work_items(&mut self, run_id: i64) -> StorageResult<usize>;

    /// Counts work items of a run in the given status
    fn count_work_items(&self, run_id: i64, status: WorkStatus) -> StorageResult<u64>;

    /// Lists failed work items of a run with their error messages
    fn get_failed_work_items(&self, run_id: i64) -> StorageResult<Vec<(String, String)>>;

    // ===== Credential Counters =====

    /// Persists credential counters for a run
    fn save_credentials(&mut self, run_id: i64, credentials: &[Credential]) -> StorageResult<()>;

    /// Loads persisted credential counters
    ///
    /// Returned credentials carry a null payload; only counters are stored.
    fn load_credentials(&self, run_id: i64) -> StorageResult<Vec<Credential>>;
}

/// Durable map from entity id to scroll state
///
/// Implementations must accept concurrent calls and treat repeated writes of
/// the same snapshot as a no-op.
pub trait CheckpointStore: Send + Sync {
    /// Loads every checkpoint of a run
    fn load(&self, run_id: i64) -> StorageResult<HashMap<String, ScrollState>>;

    /// Saves one entity's checkpoint
    fn save_entity(&self, run_id: i64, entity_id: &str, state: &ScrollState)
        -> StorageResult<()>;

    /// Saves every checkpoint in the map
    fn save(&self, run_id: i64, states: &HashMap<String, ScrollState>) -> StorageResult<()> {
        for (entity_id, state) in states {
            self.save_entity(run_id, entity_id, state)?;
        }
        Ok(())
    }
}
