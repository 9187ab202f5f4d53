//! In-process work queue

use crate::queue::{dedup_key, QueuedItem, WorkItem, WorkQueue, WorkStatus};
use crate::TidemarkError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<QueuedItem>,
    statuses: HashMap<String, WorkStatus>,
}

/// A FIFO queue held in memory; progress is lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    added: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of an item by key
    pub fn status(&self, key: &str) -> Option<WorkStatus> {
        self.lock().statuses.get(key).copied()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorkQueue for MemoryQueue {
    fn enqueue(&self, item: WorkItem) -> Result<bool, TidemarkError> {
        let key = dedup_key(&item.url)?;
        let mut inner = self.lock();

        if inner.statuses.contains_key(&key) {
            return Ok(false);
        }

        inner.statuses.insert(key.clone(), WorkStatus::Pending);
        inner.pending.push_back(QueuedItem { key, item });
        drop(inner);
        self.added.notify_one();
        Ok(true)
    }

    fn dequeue(&self) -> Result<Option<QueuedItem>, TidemarkError> {
        let mut inner = self.lock();
        let next = inner.pending.pop_front();
        if let Some(queued) = &next {
            inner
                .statuses
                .insert(queued.key.clone(), WorkStatus::InProgress);
        }
        Ok(next)
    }

    fn mark_handled(&self, key: &str) -> Result<(), TidemarkError> {
        self.lock()
            .statuses
            .insert(key.to_string(), WorkStatus::Handled);
        Ok(())
    }

    fn mark_failed(&self, key: &str, _error: &str) -> Result<(), TidemarkError> {
        self.lock()
            .statuses
            .insert(key.to_string(), WorkStatus::Failed);
        Ok(())
    }

    fn pending_count(&self) -> Result<usize, TidemarkError> {
        Ok(self.lock().pending.len())
    }

    fn notifier(&self) -> &Notify {
        &self.added
    }
}
