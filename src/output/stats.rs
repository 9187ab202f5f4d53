//! Statistics generation from the run database
//!
//! This module provides functionality for summarizing one crawl run from the
//! storage layer and printing it for the `--stats` mode.

use crate::credentials::Credential;
use crate::queue::WorkStatus;
use crate::state::StopReason;
use crate::storage::{RunRecord, Storage};
use crate::TidemarkError;
use std::collections::HashMap;

/// Crawl run statistics summary
#[derive(Debug, Clone)]
pub struct RunStatistics {
    /// The run these statistics describe
    pub run: RunRecord,

    /// Number of entities with a checkpoint
    pub entities: usize,

    /// Sum of seen ids across all entities
    pub seen_ids: u64,

    /// Entities that will not be loaded again
    pub finished_entities: usize,

    /// Count of entities by the reason their pagination stopped
    pub stop_reasons: HashMap<StopReason, u64>,

    /// Count of work items by status
    pub items_by_status: HashMap<WorkStatus, u64>,

    /// Failed work items as (url, error) pairs
    pub failures: Vec<(String, String)>,

    /// Persisted credential counters
    pub credentials: Vec<Credential>,
}

/// Loads statistics for one run from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `run_id` - The run to summarize
///
/// # Returns
///
/// * `Ok(RunStatistics)` - Successfully loaded statistics
/// * `Err(TidemarkError)` - The run doesn't exist or a query failed
pub fn load_statistics(storage: &dyn Storage, run_id: i64) -> Result<RunStatistics, TidemarkError> {
    let run = storage.get_run(run_id)?;
    let states = storage.load_scroll_states(run_id)?;

    let mut stop_reasons = HashMap::new();
    for reason in states.values().filter_map(|s| s.stop_reason) {
        *stop_reasons.entry(reason).or_insert(0) += 1;
    }

    let mut items_by_status = HashMap::new();
    for status in [
        WorkStatus::Pending,
        WorkStatus::InProgress,
        WorkStatus::Handled,
        WorkStatus::Failed,
    ] {
        let count = storage.count_work_items(run_id, status)?;
        if count > 0 {
            items_by_status.insert(status, count);
        }
    }

    Ok(RunStatistics {
        run,
        entities: states.len(),
        seen_ids: states.values().map(|s| s.seen_count() as u64).sum(),
        finished_entities: states.values().filter(|s| s.is_finished()).count(),
        stop_reasons,
        items_by_status,
        failures: storage.get_failed_work_items(run_id)?,
        credentials: storage.load_credentials(run_id)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Run {} Statistics ===\n", stats.run.id);

    println!("Run:");
    println!("  Status: {}", stats.run.status.to_db_string());
    println!("  Started: {}", stats.run.started_at);
    if let Some(finished) = &stats.run.finished_at {
        println!("  Finished: {}", finished);
    }
    println!();

    println!("Entities:");
    println!("  Checkpointed: {}", stats.entities);
    println!("  Finished: {}", stats.finished_entities);
    println!("  Seen ids: {}", stats.seen_ids);

    let mut reasons: Vec<_> = stats.stop_reasons.iter().collect();
    reasons.sort_by(|a, b| b.1.cmp(a.1));
    for (reason, count) in reasons {
        println!("  Stopped ({}): {}", reason, count);
    }
    println!();

    println!("Work Items:");
    let total: u64 = stats.items_by_status.values().sum();
    let mut statuses: Vec<_> = stats.items_by_status.iter().collect();
    statuses.sort_by(|a, b| b.1.cmp(a.1));
    for (status, count) in statuses {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {:?}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.failures.is_empty() {
        println!("Failures ({}):", stats.failures.len());
        for (url, error) in &stats.failures {
            println!("  - {}: {}", url, error);
        }
        println!();
    }

    if !stats.credentials.is_empty() {
        println!("Logins:");
        for credential in &stats.credentials {
            println!(
                "  #{}: {} uses, {} errors",
                credential.index, credential.uses, credential.errors
            );
        }
    }
}
