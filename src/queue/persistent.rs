//! Work queue persisted in the run's database

use crate::queue::{dedup_key, QueuedItem, WorkItem, WorkQueue, WorkStatus};
use crate::storage::{SharedStorage, Storage};
use crate::TidemarkError;
use std::sync::Arc;
use tokio::sync::Notify;

/// A work queue stored in the `work_items` table, scoped to one run
#[derive(Clone)]
pub struct StorageQueue {
    storage: SharedStorage,
    run_id: i64,
    added: Arc<Notify>,
}

impl StorageQueue {
    pub fn new(storage: SharedStorage, run_id: i64) -> Self {
        Self {
            storage,
            run_id,
            added: Arc::new(Notify::new()),
        }
    }

    /// Returns items a crashed process left in progress to the pending state
    ///
    /// # Returns
    ///
    /// The number of items that will be delivered again
    pub fn reclaim(&self) -> Result<usize, TidemarkError> {
        let reclaimed = self.storage.lock().reclaim_work_items(self.run_id)?;
        if reclaimed > 0 {
            tracing::info!("Reclaimed {} in-progress work items", reclaimed);
        }
        Ok(reclaimed)
    }
}

impl WorkQueue for StorageQueue {
    fn enqueue(&self, item: WorkItem) -> Result<bool, TidemarkError> {
        let key = dedup_key(&item.url)?;
        let inserted = self
            .storage
            .lock()
            .insert_work_item(self.run_id, &key, &item)?;
        if inserted {
            self.added.notify_one();
        }
        Ok(inserted)
    }

    fn dequeue(&self) -> Result<Option<QueuedItem>, TidemarkError> {
        Ok(self.storage.lock().claim_work_item(self.run_id)?)
    }

    fn mark_handled(&self, key: &str) -> Result<(), TidemarkError> {
        self.storage
            .lock()
            .set_work_item_status(self.run_id, key, WorkStatus::Handled, None)?;
        Ok(())
    }

    fn mark_failed(&self, key: &str, error: &str) -> Result<(), TidemarkError> {
        self.storage
            .lock()
            .set_work_item_status(self.run_id, key, WorkStatus::Failed, Some(error))?;
        Ok(())
    }

    fn pending_count(&self) -> Result<usize, TidemarkError> {
        let count = self
            .storage
            .lock()
            .count_work_items(self.run_id, WorkStatus::Pending)?;
        Ok(count as usize)
    }

    fn notifier(&self) -> &Notify {
        &self.added
    }
}
