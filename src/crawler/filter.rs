//! Dedup and time-range filter for one batch of items

use crate::crawler::adapter::SiteAdapter;
use crate::state::{ScrollState, TimeRange};
use crate::TidemarkError;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Filters a batch against an entity's scroll state
///
/// Every item's id is extracted before anything is touched, so a batch with a
/// missing id leaves the state exactly as it was. Then, in input order:
/// already seen ids are skipped; once `limit` ids are seen the rest of the
/// batch is dropped; items outside the time range are marked seen without
/// being accepted; everything else is accepted and marked seen.
///
/// # Arguments
///
/// * `entity_id` - The entity the batch belongs to (for errors and logs)
/// * `state` - The entity's scroll state, updated in place
/// * `items` - Raw items in the order the site returned them (newest first)
/// * `adapter` - Extracts ids and timestamps
/// * `limit` - Maximum number of seen ids for the entity
/// * `range` - Time window; items outside it are never accepted
///
/// # Returns
///
/// * `Ok(Vec<Value>)` - The accepted items, in input order
/// * `Err(TidemarkError::MissingId)` - An item had no id; the state is unchanged
pub fn apply(
    entity_id: &str,
    state: &mut ScrollState,
    items: Vec<Value>,
    adapter: &dyn SiteAdapter,
    limit: usize,
    range: &TimeRange,
) -> Result<Vec<Value>, TidemarkError> {
    let mut parsed: Vec<(String, Option<DateTime<Utc>>, Value)> = Vec::with_capacity(items.len());
    for item in items {
        let id = adapter
            .extract_id(&item)
            .ok_or_else(|| TidemarkError::MissingId {
                entity_id: entity_id.to_string(),
            })?;
        let timestamp = adapter.extract_timestamp(&item);
        parsed.push((id, timestamp, item));
    }

    let outside = |timestamp: &Option<DateTime<Utc>>| match timestamp {
        Some(ts) => range.is_set() && !range.contains(*ts),
        None => false,
    };

    let all_outside = range.is_set()
        && !parsed.is_empty()
        && parsed.iter().all(|(_, timestamp, _)| outside(timestamp));

    let mut accepted = Vec::new();
    for (id, timestamp, item) in parsed {
        if state.is_seen(&id) {
            continue;
        }

        if state.seen_count() >= limit {
            break;
        }

        state.mark_seen(&id);
        if outside(&timestamp) {
            continue;
        }

        accepted.push(item);
    }

    if all_outside {
        state.reached_boundary = true;
    }

    state.all_duplicates_last_batch = accepted.is_empty();
    if state.all_duplicates_last_batch {
        state.duplicate_streak += 1;
    } else {
        state.duplicate_streak = 0;
    }

    Ok(accepted)
}
