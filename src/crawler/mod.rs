//! Crawler module for paginated extraction
//!
//! This module contains the core crawling logic, including:
//! - The page driver and site adapter seams
//! - Per-batch dedup and time-range filtering
//! - Rate-limit backoff
//! - The pagination loop for one entity
//! - Scheduling work items over login identities
//! - Resolving a search query into seed targets
//! - Overall run coordination

mod adapter;
mod backoff;
mod coordinator;
mod driver;
mod filter;
mod paginator;
mod scheduler;
mod search;

pub use adapter::{AdapterRegistry, Batch, Classification, JsonAdapter, SiteAdapter};
pub use backoff::{Backoff, BackoffOutcome, RecordingSleeper, Sleeper, TokioSleeper};
pub use coordinator::Coordinator;
pub use driver::{
    AdvanceMode, AdvanceOutcome, CloseMode, ContextHandle, Fixture, OpenedPage, PageDriver,
    ReplayDriver,
};
pub use filter::apply as filter_batch;
pub use paginator::{NoPacing, PacingPolicy, PaginationSettings, Paginator, RandomPacing};
pub use scheduler::{ItemStatus, RunSummary, Scheduler, SchedulerSettings};
pub use search::SearchExpander;

use crate::config::Config;
use crate::TidemarkError;

/// Runs a complete crawl on recorded fixtures
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the database and create or resume a run
/// 2. Load credentials, checkpoints and the work queue
/// 3. Enqueue the configured seeds, or the search that finds them
/// 4. Paginate every target and write the results
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the config file
/// * `fresh` - Start a new run even if an unfinished one exists
///
/// # Returns
///
/// * `Ok(RunSummary)` - Crawl finished or was interrupted
/// * `Err(TidemarkError)` - Crawl failed
pub async fn crawl(
    config: Config,
    config_hash: &str,
    fresh: bool,
) -> Result<RunSummary, TidemarkError> {
    let coordinator = Coordinator::new(config, config_hash, fresh)?;
    coordinator.run_replay().await
}
