//! Work queue for the execution scheduler
//!
//! This module provides:
//! - `WorkItem`, the unit of work the scheduler runs
//! - The `WorkQueue` trait: FIFO with at-least-once delivery and dedup by URL
//! - `MemoryQueue`, an in-process implementation
//! - `StorageQueue`, backed by the run's SQLite database so a restarted run
//!   picks up where it left off

mod memory;
mod persistent;

pub use memory::MemoryQueue;
pub use persistent::StorageQueue;

use crate::state::PageType;
use crate::url::normalize_url;
use crate::TidemarkError;
use std::fmt;
use tokio::sync::Notify;

/// A target queued for the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// The page to open
    pub url: String,

    /// Expected page type, if known ahead of classification
    pub page_type_hint: Option<PageType>,

    /// Human label used in logs and failure records
    pub label: Option<String>,
}

impl WorkItem {
    /// Creates a work item with no hint or label
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_type_hint: None,
            label: None,
        }
    }

    pub fn with_hint(mut self, page_type: PageType) -> Self {
        self.page_type_hint = Some(page_type);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label for logs, falling back to the URL
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({})", label, self.url),
            None => write!(f, "{}", self.url),
        }
    }
}

/// A dequeued work item with its dedup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub key: String,
    pub item: WorkItem,
}

/// Lifecycle of a queued work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
    Pending,
    InProgress,
    Handled,
    Failed,
}

impl WorkStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Handled => "handled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "handled" => Some(Self::Handled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// FIFO of work items with dedup by normalized URL
///
/// Items are delivered at least once: an item dequeued but never marked
/// handled or failed is delivered again after a restart.
pub trait WorkQueue: Send + Sync {
    /// Adds an item unless its URL was already enqueued
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The item was added
    /// * `Ok(false)` - An item with the same normalized URL exists
    /// * `Err(TidemarkError)` - The URL is invalid or the backend failed
    fn enqueue(&self, item: WorkItem) -> Result<bool, TidemarkError>;

    /// Takes the oldest pending item
    fn dequeue(&self) -> Result<Option<QueuedItem>, TidemarkError>;

    /// Marks an item as done
    fn mark_handled(&self, key: &str) -> Result<(), TidemarkError>;

    /// Marks an item as permanently failed
    fn mark_failed(&self, key: &str, error: &str) -> Result<(), TidemarkError>;

    /// Number of items waiting to be dequeued
    fn pending_count(&self) -> Result<usize, TidemarkError>;

    /// Notified once per item added, so an idle consumer can wake up
    fn notifier(&self) -> &Notify;
}

/// Computes the dedup key for a URL
pub fn dedup_key(url: &str) -> Result<String, TidemarkError> {
    Ok(normalize_url(url)?.to_string())
}
