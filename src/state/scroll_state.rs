//! Per-entity pagination progress

use crate::state::StopReason;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Progress record for one entity's pagination loop
///
/// `seen_ids` only ever grows. Once `reached_boundary` is set or
/// `has_next_page` is cleared, no further page loads are scheduled for the
/// entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollState {
    /// Ids already consumed (emitted or skipped as out of range)
    pub seen_ids: HashSet<String>,

    /// Whether the site reported more pages after the last batch
    pub has_next_page: bool,

    /// Whether the last batch fell entirely outside the time range
    pub reached_boundary: bool,

    /// Whether the last batch produced no newly accepted items
    pub all_duplicates_last_batch: bool,

    /// Consecutive duplicate-only batches seen so far
    #[serde(default)]
    pub duplicate_streak: u32,

    /// Why the loop last stopped, if it has
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollState {
    /// Creates the state for an entity that has not been paginated yet
    pub fn new() -> Self {
        Self {
            seen_ids: HashSet::new(),
            has_next_page: true,
            reached_boundary: false,
            all_duplicates_last_batch: false,
            duplicate_streak: 0,
            stop_reason: None,
        }
    }

    /// Number of ids consumed so far
    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Marks an id as seen, returning false if it already was
    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.seen_ids.insert(id.to_string())
    }

    /// Returns true if no further page loads may be scheduled
    pub fn is_finished(&self) -> bool {
        !self.has_next_page
            || self.reached_boundary
            || self.stop_reason.map(|r| r.is_terminal()).unwrap_or(false)
    }
}

/// Shared map of entity id to scroll state for the current run
///
/// This is the in-memory side of the checkpoint store: the pagination engine
/// reads an entity's state when it starts and writes it back after every batch.
/// Per-entity exclusivity is enforced by the scheduler, so the map lock is only
/// held for the duration of a copy.
#[derive(Debug, Default)]
pub struct Checkpoints {
    states: Mutex<HashMap<String, ScrollState>>,
}

impl Checkpoints {
    /// Creates an empty checkpoint map
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a checkpoint map from previously persisted states
    pub fn from_map(states: HashMap<String, ScrollState>) -> Self {
        Self {
            states: Mutex::new(states),
        }
    }

    /// Returns a copy of the entity's state, creating it lazily
    pub fn get(&self, entity_id: &str) -> ScrollState {
        let mut states = self.lock();
        states
            .entry(entity_id.to_string())
            .or_insert_with(ScrollState::new)
            .clone()
    }

    /// Replaces the entity's state
    pub fn put(&self, entity_id: &str, state: ScrollState) {
        self.lock().insert(entity_id.to_string(), state);
    }

    /// Returns a copy of every tracked state (for persistence)
    pub fn snapshot(&self) -> HashMap<String, ScrollState> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ScrollState>> {
        // A poisoned map still holds consistent per-entity copies
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
