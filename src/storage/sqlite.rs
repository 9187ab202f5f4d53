//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::credentials::Credential;
use crate::queue::{QueuedItem, WorkItem, WorkStatus};
use crate::state::{PageType, ScrollState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::TidemarkError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(TidemarkError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, TidemarkError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, TidemarkError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        Ok(())
    }

    // ===== Scroll State Persistence =====

    fn load_scroll_states(&self, run_id: i64) -> StorageResult<HashMap<String, ScrollState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entity_id, state_json FROM scroll_states WHERE run_id = ?1")?;

        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut states = HashMap::new();
        for row in rows {
            let (entity_id, json) = row?;
            let state: ScrollState = serde_json::from_str(&json)?;
            states.insert(entity_id, state);
        }

        Ok(states)
    }

    fn upsert_scroll_state(
        &mut self,
        run_id: i64,
        entity_id: &str,
        state: &ScrollState,
    ) -> StorageResult<()> {
        let json = serde_json::to_string(state)?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT OR REPLACE INTO scroll_states
             (run_id, entity_id, state_json, seen_count, stop_reason, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                entity_id,
                json,
                state.seen_count() as i64,
                state.stop_reason.map(|r| r.to_db_string()),
                now,
            ],
        )?;
        Ok(())
    }

    // ===== Work Queue =====

    fn insert_work_item(
        &mut self,
        run_id: i64,
        key: &str,
        item: &WorkItem,
    ) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO work_items
             (run_id, url_key, url, page_type, label, status, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                key,
                item.url,
                item.page_type_hint.map(|t| t.to_db_string()),
                item.label,
                WorkStatus::Pending.to_db_string(),
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn claim_work_item(&mut self, run_id: i64) -> StorageResult<Option<QueuedItem>> {
        let claimed = self
            .conn
            .query_row(
                "SELECT url_key, url, page_type, label FROM work_items
                 WHERE run_id = ?1 AND status = ?2 ORDER BY id ASC LIMIT 1",
                params![run_id, WorkStatus::Pending.to_db_string()],
                |row| {
                    let page_type: Option<String> = row.get(2)?;
                    Ok(QueuedItem {
                        key: row.get(0)?,
                        item: WorkItem {
                            url: row.get(1)?,
                            page_type_hint: page_type.as_deref().and_then(PageType::from_db_string),
                            label: row.get(3)?,
                        },
                    })
                },
            )
            .optional()?;

        if let Some(queued) = &claimed {
            self.conn.execute(
                "UPDATE work_items SET status = ?1 WHERE run_id = ?2 AND url_key = ?3",
                params![WorkStatus::InProgress.to_db_string(), run_id, queued.key],
            )?;
        }

        Ok(claimed)
    }

    fn set_work_item_status(
        &mut self,
        run_id: i64,
        key: &str,
        status: WorkStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE work_items SET status = ?1, error_message = ?2 WHERE run_id = ?3 AND url_key = ?4",
            params![status.to_db_string(), error_message, run_id, key],
        )?;
        Ok(())
    }

    fn reclaim_work_items(&mut self, run_id: i64) -> StorageResult<usize> {
        let reclaimed = self.conn.execute(
            "UPDATE work_items SET status = ?1 WHERE run_id = ?2 AND status = ?3",
            params![
                WorkStatus::Pending.to_db_string(),
                run_id,
                WorkStatus::InProgress.to_db_string()
            ],
        )?;
        Ok(reclaimed)
    }

    fn count_work_items(&self, run_id: i64, status: WorkStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM work_items WHERE run_id = ?1 AND status = ?2",
            params![run_id, status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_failed_work_items(&self, run_id: i64) -> StorageResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, COALESCE(error_message, '') FROM work_items
             WHERE run_id = ?1 AND status = ?2 ORDER BY id ASC",
        )?;

        let failed = stmt
            .query_map(
                params![run_id, WorkStatus::Failed.to_db_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(failed)
    }

    // ===== Credential Counters =====

    fn save_credentials(&mut self, run_id: i64, credentials: &[Credential]) -> StorageResult<()> {
        for credential in credentials {
            self.conn.execute(
                "INSERT OR REPLACE INTO credentials (run_id, login_index, uses, errors)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    run_id,
                    credential.index as i64,
                    credential.uses as i64,
                    credential.errors
                ],
            )?;
        }
        Ok(())
    }

    fn load_credentials(&self, run_id: i64) -> StorageResult<Vec<Credential>> {
        let mut stmt = self.conn.prepare(
            "SELECT login_index, uses, errors FROM credentials WHERE run_id = ?1 ORDER BY login_index",
        )?;

        let credentials = stmt
            .query_map(params![run_id], |row| {
                Ok(Credential {
                    index: row.get::<_, i64>(0)? as usize,
                    payload: Value::Null,
                    uses: row.get::<_, i64>(1)? as u64,
                    errors: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(credentials)
    }
}
