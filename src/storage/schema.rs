//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Tidemark database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Per-entity pagination checkpoints
CREATE TABLE IF NOT EXISTS scroll_states (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    entity_id TEXT NOT NULL,
    state_json TEXT NOT NULL,
    seen_count INTEGER NOT NULL DEFAULT 0,
    stop_reason TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, entity_id)
);

-- Work queue, deduplicated by normalized URL within a run
CREATE TABLE IF NOT EXISTS work_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    url_key TEXT NOT NULL,
    url TEXT NOT NULL,
    page_type TEXT,
    label TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    enqueued_at TEXT NOT NULL,
    UNIQUE(run_id, url_key)
);

CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(run_id, status);

-- Credential counters (login material itself is never stored)
CREATE TABLE IF NOT EXISTS credentials (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    login_index INTEGER NOT NULL,
    uses INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (run_id, login_index)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
