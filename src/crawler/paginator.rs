//! Pagination engine
//!
//! Drives one entity's page through `load page -> filter -> emit -> checkpoint`
//! until a stop condition fires. The checkpoint is written after every batch, so
//! a restarted run resumes from the last batch whose items were emitted.

use crate::config::Config;
use crate::crawler::adapter::{Classification, SiteAdapter};
use crate::crawler::backoff::{Backoff, BackoffOutcome, Sleeper};
use crate::crawler::driver::{AdvanceMode, AdvanceOutcome, ContextHandle, PageDriver};
use crate::crawler::filter;
use crate::output::{HookContext, OutputPipeline};
use crate::queue::{WorkItem, WorkQueue};
use crate::state::{Checkpoints, ScrollState, StopReason, TimeRange};
use crate::storage::CheckpointStore;
use crate::TidemarkError;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tunables of the pagination loop
#[derive(Debug, Clone)]
pub struct PaginationSettings {
    /// Maximum seen ids per entity
    pub limit: usize,
    pub time_range: TimeRange,
    /// Timeout for one driver advance
    pub advance_timeout: Duration,
    /// Consecutive attempts without progress before the page counts as stalled
    pub stall_attempts: u32,
    /// Base delay between stalled attempts; attempt N waits N times this
    pub retry_delay: Duration,
    /// Consecutive duplicate-only batches before giving up; None never gives up
    pub max_duplicate_batches: Option<u32>,
    /// Handed to output hooks
    pub custom_data: Arc<Value>,
}

impl PaginationSettings {
    pub fn from_config(config: &Config, time_range: TimeRange) -> Self {
        Self {
            limit: config.results_limit(),
            time_range,
            advance_timeout: Duration::from_secs(config.scroll.advance_timeout_secs),
            stall_attempts: config.scroll.stall_attempts,
            retry_delay: Duration::from_millis(config.scroll.retry_delay_ms),
            max_duplicate_batches: config.scroll.max_duplicate_batches,
            custom_data: Arc::new(config.output.custom_data.clone()),
        }
    }
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            limit: usize::MAX,
            time_range: TimeRange::unbounded(),
            advance_timeout: Duration::from_secs(30),
            stall_attempts: 4,
            retry_delay: Duration::from_millis(3500),
            max_duplicate_batches: Some(10),
            custom_data: Arc::new(Value::Null),
        }
    }
}

/// Delay inserted between page loads
pub trait PacingPolicy: Send + Sync {
    /// The pause before the next load, given the seen counts before and after the last batch
    fn delay_after(&self, previous_count: usize, count: usize) -> Option<Duration>;
}

/// No pauses at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl PacingPolicy for NoPacing {
    fn delay_after(&self, _previous_count: usize, _count: usize) -> Option<Duration> {
        None
    }
}

/// Short random pauses, with an occasional long one on large entities
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPacing {
    /// Added to the long pause
    pub scroll_wait: Duration,
}

impl RandomPacing {
    pub fn new(scroll_wait: Duration) -> Self {
        Self { scroll_wait }
    }
}

impl PacingPolicy for RandomPacing {
    fn delay_after(&self, previous_count: usize, count: usize) -> Option<Duration> {
        let mut rng = rand::thread_rng();
        if previous_count > 1000 && count % 100 < 12 {
            Some(self.scroll_wait + Duration::from_millis(rng.gen_range(1000..11000)))
        } else {
            Some(Duration::from_millis(rng.gen_range(200..600)))
        }
    }
}

/// Runs pagination loops for the scheduler
pub struct Paginator {
    driver: Arc<dyn PageDriver>,
    checkpoints: Arc<Checkpoints>,
    store: Arc<dyn CheckpointStore>,
    run_id: i64,
    pipeline: Arc<OutputPipeline>,
    queue: Arc<dyn WorkQueue>,
    backoff: Arc<Backoff>,
    sleeper: Arc<dyn Sleeper>,
    pacing: Arc<dyn PacingPolicy>,
    settings: PaginationSettings,
    cancel: CancellationToken,
}

impl Paginator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Arc<dyn PageDriver>,
        checkpoints: Arc<Checkpoints>,
        store: Arc<dyn CheckpointStore>,
        run_id: i64,
        pipeline: Arc<OutputPipeline>,
        queue: Arc<dyn WorkQueue>,
        backoff: Arc<Backoff>,
        sleeper: Arc<dyn Sleeper>,
        settings: PaginationSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            checkpoints,
            store,
            run_id,
            pipeline,
            queue,
            backoff,
            sleeper,
            pacing: Arc::new(NoPacing),
            settings,
            cancel,
        }
    }

    pub fn with_pacing(mut self, pacing: Arc<dyn PacingPolicy>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Paginates an entity until a stop condition fires
    ///
    /// # Arguments
    ///
    /// * `handle` - The open context showing the entity's page
    /// * `adapter` - The adapter that classified the page
    /// * `entity` - The classified entity
    /// * `item` - The work item that led here
    ///
    /// # Returns
    ///
    /// * `Ok(StopReason)` - Why the loop ended
    /// * `Err(TidemarkError::PageStalled)` - The driver made no progress
    /// * `Err(TidemarkError)` - Driver, adapter, sink or checkpoint failure
    pub async fn paginate(
        &self,
        handle: ContextHandle,
        adapter: &dyn SiteAdapter,
        entity: &Classification,
        item: &WorkItem,
    ) -> Result<StopReason, TidemarkError> {
        let label = entity.log_label();
        let mut state = self.checkpoints.get(&entity.entity_id);

        if state.is_finished() {
            tracing::info!(
                "{}: already finished with {} items, skipping",
                label,
                state.seen_count()
            );
            return Ok(state.stop_reason.unwrap_or(StopReason::Exhausted));
        }
        state.stop_reason = None;

        if state.seen_count() > 0 {
            tracing::info!(
                "{}: resuming after {} seen items",
                label,
                state.seen_count()
            );
        }

        let ctx = self.hook_context(entity, item);
        let mut mode = AdvanceMode::Initial;

        loop {
            if self.cancel.is_cancelled() {
                return self.stop(&label, &entity.entity_id, state, StopReason::Cancelled);
            }

            let previous_count = state.seen_count();

            let response = match self
                .load_next_page(handle, mode, &entity.entity_id, &label)
                .await
            {
                Ok(Some(response)) => response,
                Ok(None) => {
                    return self.stop(&label, &entity.entity_id, state, StopReason::RateLimited)
                }
                Err(TidemarkError::Aborted) => {
                    return self.stop(&label, &entity.entity_id, state, StopReason::Cancelled)
                }
                Err(e) => return Err(e),
            };
            mode = AdvanceMode::Next;

            let batch = adapter.extract_batch(&response)?;
            let loaded = batch.items.len();
            let accepted = filter::apply(
                &entity.entity_id,
                &mut state,
                batch.items,
                adapter,
                self.settings.limit,
                &self.settings.time_range,
            )?;
            state.has_next_page = batch.has_next_page;

            self.deliver(adapter, &accepted, &ctx).await?;

            tracing::debug!(
                "{}: {} items loaded, {} accepted, {} seen",
                label,
                loaded,
                accepted.len(),
                state.seen_count()
            );

            match self.stop_condition(&state) {
                Some(reason) => return self.stop(&label, &entity.entity_id, state, reason),
                None => self.commit(&entity.entity_id, &state)?,
            }

            if state.all_duplicates_last_batch {
                tracing::debug!(
                    "{}: only duplicates in this batch ({} in a row), continuing",
                    label,
                    state.duplicate_streak
                );
            }

            if let Some(delay) = self.pacing.delay_after(previous_count, state.seen_count()) {
                self.sleeper.sleep(delay).await;
            }
        }
    }

    /// Collects the items embedded in a page that doesn't paginate
    pub async fn collect_page(
        &self,
        adapter: &dyn SiteAdapter,
        entity: &Classification,
        page_state: &Value,
        item: &WorkItem,
    ) -> Result<StopReason, TidemarkError> {
        let label = entity.log_label();
        let mut state = self.checkpoints.get(&entity.entity_id);

        let batch = adapter.extract_batch(page_state)?;
        let accepted = filter::apply(
            &entity.entity_id,
            &mut state,
            batch.items,
            adapter,
            self.settings.limit,
            &self.settings.time_range,
        )?;
        state.has_next_page = false;

        let ctx = self.hook_context(entity, item);
        self.deliver(adapter, &accepted, &ctx).await?;

        self.stop(&label, &entity.entity_id, state, StopReason::Exhausted)
    }

    /// Emits the record describing the page itself, once per entity
    pub async fn collect_details(
        &self,
        adapter: &dyn SiteAdapter,
        entity: &Classification,
        page_state: &Value,
        item: &WorkItem,
    ) -> Result<StopReason, TidemarkError> {
        let label = entity.log_label();
        let mut state = self.checkpoints.get(&entity.entity_id);

        let details = adapter.extract_details(page_state).ok_or_else(|| {
            TidemarkError::Driver(format!("{}: page state holds no details", label))
        })?;

        if state.mark_seen(&entity.entity_id) {
            let ctx = self.hook_context(entity, item);
            self.pipeline.emit(&details, &ctx).await?;
        } else {
            tracing::debug!("{}: details already emitted", label);
        }
        state.has_next_page = false;

        self.stop(&label, &entity.entity_id, state, StopReason::Exhausted)
    }

    /// Loads one response from an open context, under the same backoff and
    /// stall handling as pagination
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Value))` - The response
    /// * `Ok(None)` - Backoff gave up on a rate limit
    /// * `Err(TidemarkError::Aborted)` - The run was cancelled while backing off
    pub async fn load_single(
        &self,
        handle: ContextHandle,
        key: &str,
        label: &str,
    ) -> Result<Option<Value>, TidemarkError> {
        self.load_next_page(handle, AdvanceMode::Initial, key, label)
            .await
    }

    fn stop_condition(&self, state: &ScrollState) -> Option<StopReason> {
        if state.seen_count() >= self.settings.limit {
            Some(StopReason::Limit)
        } else if !state.has_next_page {
            Some(StopReason::Exhausted)
        } else if state.reached_boundary {
            Some(StopReason::Boundary)
        } else if self
            .settings
            .max_duplicate_batches
            .map(|max| state.duplicate_streak >= max)
            .unwrap_or(false)
        {
            Some(StopReason::Duplicates)
        } else {
            None
        }
    }

    fn stop(
        &self,
        label: &str,
        entity_id: &str,
        mut state: ScrollState,
        reason: StopReason,
    ) -> Result<StopReason, TidemarkError> {
        state.stop_reason = Some(reason);
        self.commit(entity_id, &state)?;

        match reason {
            StopReason::Limit => tracing::info!(
                "{}: reached the limit of {} results, stopping",
                label,
                self.settings.limit
            ),
            StopReason::Boundary => {
                tracing::info!("{}: reached the end of the time range", label)
            }
            StopReason::Duplicates => tracing::warn!(
                "{}: {} duplicate-only batches in a row, giving up",
                label,
                state.duplicate_streak
            ),
            StopReason::RateLimited => {
                tracing::warn!("{}: stopped early, rate limit never cleared", label)
            }
            StopReason::Cancelled => tracing::info!("{}: cancelled", label),
            StopReason::Exhausted => tracing::info!(
                "{}: no more pages, {} items collected",
                label,
                state.seen_count()
            ),
        }

        Ok(reason)
    }

    fn commit(&self, entity_id: &str, state: &ScrollState) -> Result<(), TidemarkError> {
        self.checkpoints.put(entity_id, state.clone());
        self.store.save_entity(self.run_id, entity_id, state)?;
        Ok(())
    }

    /// Emits accepted items, or queues their detail pages
    async fn deliver(
        &self,
        adapter: &dyn SiteAdapter,
        accepted: &[Value],
        ctx: &HookContext,
    ) -> Result<(), TidemarkError> {
        for item in accepted {
            match adapter.detail_target(item) {
                Some(child) => {
                    if self.queue.enqueue(child)? {
                        tracing::trace!("{}: queued detail page", ctx.log_label());
                    }
                }
                None => {
                    self.pipeline.emit(item, ctx).await?;
                }
            }
        }
        Ok(())
    }

    /// Loads the next page, retrying while the driver makes no progress
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Value))` - A raw response
    /// * `Ok(None)` - Backoff gave up on a rate limit
    /// * `Err(TidemarkError::PageStalled)` - No progress within the stall budget
    async fn load_next_page(
        &self,
        handle: ContextHandle,
        mode: AdvanceMode,
        entity_id: &str,
        label: &str,
    ) -> Result<Option<Value>, TidemarkError> {
        let mut stalled = 0;

        loop {
            let outcome = self
                .backoff
                .run(label, &self.cancel, || self.advance_once(handle, mode))
                .await?;

            match outcome {
                BackoffOutcome::Completed(Some(response)) => return Ok(Some(response)),
                BackoffOutcome::GaveUp { .. } => return Ok(None),
                BackoffOutcome::Completed(None) => {
                    stalled += 1;
                    if stalled >= self.settings.stall_attempts {
                        tracing::warn!("{}: no response after {} attempts", label, stalled);
                        return Err(TidemarkError::PageStalled {
                            entity_id: entity_id.to_string(),
                            attempts: stalled,
                        });
                    }

                    let delay = self.settings.retry_delay * stalled;
                    tracing::debug!(
                        "{}: no response, retrying in {}ms ({}/{})",
                        label,
                        delay.as_millis(),
                        stalled,
                        self.settings.stall_attempts
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    /// One advance under the timeout; None means no progress
    async fn advance_once(
        &self,
        handle: ContextHandle,
        mode: AdvanceMode,
    ) -> Result<Option<Value>, TidemarkError> {
        let advance = self.driver.advance(handle, mode);
        match tokio::time::timeout(self.settings.advance_timeout, advance).await {
            Err(_) => Ok(None),
            Ok(Ok(AdvanceOutcome::Batch(response))) => Ok(Some(response)),
            Ok(Ok(AdvanceOutcome::Timeout | AdvanceOutcome::NoResponse)) => Ok(None),
            Ok(Ok(AdvanceOutcome::RateLimited)) => Err(TidemarkError::RateLimited),
            Ok(Err(e)) => Err(e),
        }
    }

    fn hook_context(&self, entity: &Classification, item: &WorkItem) -> HookContext {
        HookContext {
            entity_id: entity.entity_id.clone(),
            page_type: entity.page_type,
            url: item.url.clone(),
            custom_data: self.settings.custom_data.clone(),
        }
    }
}
