//! Crawler coordinator - run lifecycle and wiring
//!
//! This module ties the engine together:
//! - Creating a run or resuming an unfinished one
//! - Restoring checkpoints, credential counters and the work queue
//! - Seeding the queue from the configured targets or search query
//! - Wiring the pagination engine and scheduler to a page driver and sink
//! - Persisting state and recording how the run ended

use crate::config::Config;
use crate::credentials::{load_credentials_file, CredentialPool};
use crate::crawler::adapter::AdapterRegistry;
use crate::crawler::backoff::{Backoff, Sleeper, TokioSleeper};
use crate::crawler::driver::{PageDriver, ReplayDriver};
use crate::crawler::paginator::{PaginationSettings, Paginator, RandomPacing};
use crate::crawler::scheduler::{RunSummary, Scheduler, SchedulerSettings};
use crate::crawler::search::SearchExpander;
use crate::output::{JsonLinesSink, OutputPipeline};
use crate::queue::{StorageQueue, WorkItem, WorkQueue};
use crate::state::{Checkpoints, TimeRange};
use crate::storage::{CheckpointStore, RunStatus, SharedStorage, SqliteStorage, Storage};
use crate::url::page_type_hint;
use crate::{ConfigError, TidemarkError};
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
    queue: Arc<StorageQueue>,
    checkpoints: Arc<Checkpoints>,
    credentials: Arc<CredentialPool>,
    time_range: TimeRange,
    run_id: i64,
    resumed: bool,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator on the configured database
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the config file, recorded with the run
    /// * `fresh` - Start a new run even if an unfinished one exists
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run, with seeds enqueued
    /// * `Err(TidemarkError)` - Storage, credential or seed setup failed
    pub fn new(config: Config, config_hash: &str, fresh: bool) -> Result<Self, TidemarkError> {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
        Self::with_storage(config, config_hash, fresh, storage)
    }

    /// Creates a coordinator on an already opened database
    pub fn with_storage(
        config: Config,
        config_hash: &str,
        fresh: bool,
        storage: SqliteStorage,
    ) -> Result<Self, TidemarkError> {
        let storage = SharedStorage::new(storage);
        let (run_id, resumed) = open_run(&storage, config_hash, fresh)?;

        let time_range = config.resolve_time_range(Utc::now())?;
        if time_range.is_set() {
            tracing::info!(
                "Time range: {} .. {}",
                time_range
                    .min()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                time_range
                    .max()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            );
        }

        let raw_credentials = match &config.credentials.file {
            Some(path) => load_credentials_file(Path::new(path))?,
            None => Value::Null,
        };
        let credentials = CredentialPool::load(
            &raw_credentials,
            config.credentials.max_error_count,
            config.crawler.require_credentials,
        )?;

        let queue = StorageQueue::new(storage.clone(), run_id);
        let checkpoints = if resumed {
            credentials.restore(&storage.lock().load_credentials(run_id)?);
            queue.reclaim()?;
            Checkpoints::from_map(storage.load(run_id)?)
        } else {
            Checkpoints::new()
        };

        tracing::info!(
            "{} login identities ({} usable), {} entity checkpoints",
            credentials.count(),
            credentials.usable_count(),
            checkpoints.len()
        );

        let coordinator = Self {
            config: Arc::new(config),
            storage,
            queue: Arc::new(queue),
            checkpoints: Arc::new(checkpoints),
            credentials: Arc::new(credentials),
            time_range,
            run_id,
            resumed,
            cancel: CancellationToken::new(),
        };
        coordinator.enqueue_seeds()?;
        Ok(coordinator)
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Whether this coordinator continues an earlier run
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Cancelling this token stops the run at the next batch boundary
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn checkpoints(&self) -> &Arc<Checkpoints> {
        &self.checkpoints
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// The configured search, unless explicit seeds take precedence
    fn search(&self) -> Option<SearchExpander> {
        match &self.config.search {
            Some(_) if !self.config.seeds.is_empty() => None,
            Some(search) => Some(SearchExpander::new(search.clone())),
            None => None,
        }
    }

    /// Enqueues every configured seed; seeds already known to the run are skipped
    ///
    /// Without seeds, the configured search is enqueued instead.
    fn enqueue_seeds(&self) -> Result<usize, TidemarkError> {
        if self.config.search.is_some() && !self.config.seeds.is_empty() {
            tracing::warn!("Search is disabled when seeds are configured");
        }
        if let Some(search) = self.search() {
            let added = usize::from(self.queue.enqueue(search.work_item())?);
            tracing::info!(
                "Queued search for \"{}\", {} work items pending",
                search.query(),
                self.queue.pending_count()?
            );
            return Ok(added);
        }

        let mut added = 0;
        for seed in &self.config.seeds {
            let mut item = WorkItem::new(seed.url.clone());
            if let Some(hint) = seed.page_type.or_else(|| page_type_hint(&seed.url)) {
                item = item.with_hint(hint);
            }
            if let Some(label) = &seed.label {
                item = item.with_label(label.clone());
            }

            if self.queue.enqueue(item)? {
                added += 1;
            }
        }

        tracing::info!(
            "Seeded {} of {} targets, {} work items pending",
            added,
            self.config.seeds.len(),
            self.queue.pending_count()?
        );
        Ok(added)
    }

    /// Runs the crawl on recorded fixtures, writing results to the configured file
    pub async fn run_replay(&self) -> Result<RunSummary, TidemarkError> {
        let driver = ReplayDriver::load_dir(Path::new(&self.config.replay.fixtures_dir))?;
        tracing::info!(
            "Replaying {} recorded pages from {}",
            driver.fixture_count(),
            self.config.replay.fixtures_dir
        );

        let sink = JsonLinesSink::open(Path::new(&self.config.output.results_path)).await?;
        let mut pipeline = OutputPipeline::new(Arc::new(sink))
            .with_hook_timeout(Duration::from_millis(self.config.scroll.hook_timeout_ms));
        if let Some(fields) = &self.config.output.pick_fields {
            pipeline = pipeline.with_pick_fields(fields.clone());
        }

        self.run(
            Arc::new(driver),
            AdapterRegistry::from_config(&self.config.adapters),
            pipeline,
            Arc::new(TokioSleeper),
        )
        .await
    }

    /// Runs the crawl until the queue drains, the run is cancelled or a fatal error occurs
    ///
    /// Checkpoints and credential counters are persisted and the run status
    /// recorded however the run ends.
    ///
    /// # Arguments
    ///
    /// * `driver` - Opens and advances pages
    /// * `adapters` - Site knowledge per page type
    /// * `pipeline` - Output hooks and the result sink
    /// * `sleeper` - Used for backoff, stall and pacing delays
    pub async fn run(
        &self,
        driver: Arc<dyn PageDriver>,
        adapters: AdapterRegistry,
        pipeline: OutputPipeline,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<RunSummary, TidemarkError> {
        if adapters.is_empty() {
            return Err(ConfigError::Validation("no site adapters configured".to_string()).into());
        }

        tracing::info!("Starting crawl run {}", self.run_id);
        let start_time = std::time::Instant::now();

        let sink = pipeline.sink().clone();
        let settings = PaginationSettings::from_config(&self.config, self.time_range);
        let backoff = Arc::new(Backoff::from_config(&self.config.backoff, sleeper.clone()));

        let mut paginator = Paginator::new(
            driver.clone(),
            self.checkpoints.clone(),
            Arc::new(self.storage.clone()),
            self.run_id,
            Arc::new(pipeline),
            self.queue.clone(),
            backoff,
            sleeper,
            settings,
            self.cancel.clone(),
        );
        if self.config.scroll.pacing {
            paginator = paginator.with_pacing(Arc::new(RandomPacing::new(Duration::from_millis(
                self.config.scroll.scroll_wait_ms,
            ))));
        }

        let mut scheduler = Scheduler::new(
            self.queue.clone(),
            driver,
            Arc::new(adapters),
            self.credentials.clone(),
            Arc::new(paginator),
            sink,
            SchedulerSettings::from_config(&self.config.crawler),
            self.cancel.clone(),
        );
        if let Some(search) = self.search() {
            scheduler = scheduler.with_search(search);
        }
        let scheduler = Arc::new(scheduler);

        let result = scheduler.run().await;

        let status = match &result {
            Ok(summary) if self.cancel.is_cancelled() || summary.interrupted > 0 => {
                RunStatus::Interrupted
            }
            Ok(_) => RunStatus::Completed,
            Err(TidemarkError::Aborted) => RunStatus::Interrupted,
            Err(_) => RunStatus::Failed,
        };

        self.persist()?;
        self.storage.lock().finish_run(self.run_id, status)?;

        tracing::info!(
            "Run {} ended as {} after {:?}",
            self.run_id,
            status.to_db_string(),
            start_time.elapsed()
        );

        result
    }

    /// Saves every entity checkpoint and the credential counters
    fn persist(&self) -> Result<(), TidemarkError> {
        self.storage.save(self.run_id, &self.checkpoints.snapshot())?;
        self.storage
            .lock()
            .save_credentials(self.run_id, &self.credentials.snapshot())?;
        Ok(())
    }
}

/// Resumes the latest unfinished run or creates a new one
///
/// # Returns
///
/// The run id and whether it was resumed
fn open_run(
    storage: &SharedStorage,
    config_hash: &str,
    fresh: bool,
) -> Result<(i64, bool), TidemarkError> {
    let mut storage = storage.lock();

    if !fresh {
        if let Some(latest) = storage.get_latest_run()? {
            if matches!(latest.status, RunStatus::Running | RunStatus::Interrupted) {
                if latest.config_hash != config_hash {
                    tracing::warn!(
                        "Configuration changed since run {} started, resuming anyway",
                        latest.id
                    );
                }
                tracing::info!("Resuming unfinished run {}", latest.id);
                storage.update_run_status(latest.id, RunStatus::Running)?;
                return Ok((latest.id, true));
            }
        }
    }

    let run_id = storage.create_run(config_hash)?;
    tracing::info!("Created run {}", run_id);
    Ok((run_id, false))
}
