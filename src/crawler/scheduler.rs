//! Execution scheduler
//!
//! This module handles:
//! - Bounding parallel execution contexts by concurrency and login identities
//! - Binding a login identity to each context and reporting its outcome
//! - Retrying failed work items and writing failure records
//! - Serializing work items that resolve to the same entity
//! - Gathering the configured collection of each page, or resolving searches

use crate::config::CrawlerConfig;
use crate::credentials::{CredentialPool, Session};
use crate::crawler::adapter::AdapterRegistry;
use crate::crawler::driver::{CloseMode, OpenedPage, PageDriver};
use crate::crawler::paginator::Paginator;
use crate::crawler::search::SearchExpander;
use crate::output::{FailureRecord, Sink};
use crate::queue::{QueuedItem, WorkItem, WorkQueue};
use crate::state::{Collection, PageType, ResultsType, StopReason};
use crate::TidemarkError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Scheduler tunables
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Upper bound on parallel execution contexts
    pub concurrency: usize,
    /// Attempts per work item
    pub max_request_retries: u32,
    /// Upper bound on one attempt's page work
    pub item_timeout: Duration,
    /// Whether a work item may only run under a login identity
    pub require_credentials: bool,
    /// Which collection of each page is gathered
    pub results_type: ResultsType,
}

impl SchedulerSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            concurrency: config.max_concurrency as usize,
            max_request_retries: config.max_request_retries,
            item_timeout: Duration::from_secs(config.item_timeout_secs),
            require_credentials: config.require_credentials,
            results_type: config.results_type,
        }
    }
}

/// How a work item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Handled,
    /// Out of retries; a failure record was written
    Failed,
    /// Stopped by cancellation; delivered again on resume
    Interrupted,
}

/// Work item counts of one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub handled: usize,
    pub failed: usize,
    pub interrupted: usize,
}

/// Runs queued work items on a bounded pool of execution contexts
pub struct Scheduler {
    queue: Arc<dyn WorkQueue>,
    driver: Arc<dyn PageDriver>,
    adapters: Arc<AdapterRegistry>,
    credentials: Arc<CredentialPool>,
    paginator: Arc<Paginator>,
    sink: Arc<dyn Sink>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
    search: Option<SearchExpander>,
    entity_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        driver: Arc<dyn PageDriver>,
        adapters: Arc<AdapterRegistry>,
        credentials: Arc<CredentialPool>,
        paginator: Arc<Paginator>,
        sink: Arc<dyn Sink>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            driver,
            adapters,
            credentials,
            paginator,
            sink,
            settings,
            cancel,
            search: None,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves search work items with the given expander
    pub fn with_search(mut self, search: SearchExpander) -> Self {
        self.search = Some(search);
        self
    }

    /// Number of execution contexts that may run at once
    pub fn pool_size(&self) -> usize {
        let size = if self.settings.require_credentials {
            self.settings.concurrency.min(self.credentials.count())
        } else {
            self.settings.concurrency
        };
        size.max(1)
    }

    /// Runs until the queue is drained, the run is cancelled, or a fatal error occurs
    ///
    /// Work items spawned while running (detail pages) are picked up as soon
    /// as they are enqueued, alongside the item that spawned them.
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Counts of handled, failed and interrupted items
    /// * `Err(TidemarkError)` - A fatal error aborted the run
    pub async fn run(self: Arc<Self>) -> Result<RunSummary, TidemarkError> {
        let pool_size = self.pool_size();
        tracing::info!("Running up to {} work items in parallel", pool_size);

        let semaphore = Arc::new(Semaphore::new(pool_size));
        let mut tasks: JoinSet<Result<ItemStatus, TidemarkError>> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut fatal = None;

        while !self.cancel.is_cancelled() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| TidemarkError::Aborted)?;

            match self.queue.dequeue() {
                Ok(Some(queued)) => {
                    let scheduler = self.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        scheduler.process(queued).await
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if tasks.is_empty() {
                        break;
                    }

                    // Running items may still enqueue detail pages; start
                    // those as soon as they arrive
                    tokio::select! {
                        Some(joined) = tasks.join_next() => {
                            if let Some(e) = self.record(joined, &mut summary) {
                                fatal = Some(e);
                            }
                        }
                        _ = self.queue.notifier().notified() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    fatal = Some(e);
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Some(e) = self.record(joined, &mut summary) {
                    fatal = Some(e);
                }
            }

            if let Some(e) = &fatal {
                tracing::error!("Aborting run: {}", e);
                self.cancel.cancel();
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = self.record(joined, &mut summary) {
                fatal.get_or_insert(e);
            }
        }

        tracing::info!(
            "Scheduler finished: {} handled, {} failed, {} interrupted",
            summary.handled,
            summary.failed,
            summary.interrupted
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Counts a finished task, returning its error if it was fatal
    fn record(
        &self,
        joined: Result<Result<ItemStatus, TidemarkError>, JoinError>,
        summary: &mut RunSummary,
    ) -> Option<TidemarkError> {
        match joined {
            Ok(Ok(ItemStatus::Handled)) => summary.handled += 1,
            Ok(Ok(ItemStatus::Failed)) => summary.failed += 1,
            Ok(Ok(ItemStatus::Interrupted)) => summary.interrupted += 1,
            Ok(Err(e)) if e.is_fatal() => return Some(e),
            Ok(Err(e)) => {
                tracing::error!("Work item could not be settled: {}", e);
                summary.failed += 1;
            }
            Err(e) => {
                tracing::error!("Work item task panicked: {}", e);
                summary.failed += 1;
            }
        }
        None
    }

    /// Runs one work item through its retries
    async fn process(&self, queued: QueuedItem) -> Result<ItemStatus, TidemarkError> {
        let item = &queued.item;
        let max_attempts = self.settings.max_request_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!("{}: attempt {}/{}", item.display_label(), attempt, max_attempts);

            match self.attempt(item).await {
                Ok(ItemStatus::Interrupted) => return Ok(ItemStatus::Interrupted),
                Ok(status) => {
                    self.queue.mark_handled(&queued.key)?;
                    return Ok(status);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_retryable() && self.cancel.is_cancelled() => {
                    tracing::info!("{}: interrupted after error: {}", item.display_label(), e);
                    return Ok(ItemStatus::Interrupted);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        "{}: attempt {}/{} failed, retrying: {}",
                        item.display_label(),
                        attempt,
                        max_attempts,
                        e
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "{}: failed {} times, not retrying any more: {}",
                        item.display_label(),
                        attempt,
                        e
                    );

                    let failure = FailureRecord {
                        url: item.url.clone(),
                        label: item.label.clone(),
                        error: e.to_string(),
                        attempts: attempt,
                    };
                    self.sink.emit_failure(&failure).await?;
                    self.queue.mark_failed(&queued.key, &failure.error)?;
                    return Ok(ItemStatus::Failed);
                }
            }
        }
    }

    /// One attempt: bind a login, open a context, do the page work, close
    async fn attempt(&self, item: &WorkItem) -> Result<ItemStatus, TidemarkError> {
        let mut session = Session::new();
        let credential = self.credentials.acquire(&mut session);
        if credential.is_none() && self.settings.require_credentials {
            return Err(TidemarkError::NoCredentials);
        }

        let opened = match self.driver.open_context(item, credential.as_ref()).await {
            Ok(opened) => opened,
            Err(e) => {
                let failed: Result<ItemStatus, TidemarkError> = Err(e);
                self.settle(&session, &failed);
                return failed;
            }
        };

        let result = match tokio::time::timeout(
            self.settings.item_timeout,
            self.run_page(item, &opened),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TidemarkError::ItemTimeout {
                secs: self.settings.item_timeout.as_secs(),
            }),
        };

        let mode = self.settle(&session, &result);
        self.driver.close(opened.handle, mode).await;
        result
    }

    /// Reports the attempt's outcome to the credential pool
    ///
    /// # Returns
    ///
    /// How the attempt's context should be closed
    fn settle(&self, session: &Session, result: &Result<ItemStatus, TidemarkError>) -> CloseMode {
        match result {
            Ok(_) => {
                self.credentials.report_success(session);
                CloseMode::Release
            }
            Err(TidemarkError::SessionInvalid(_)) => {
                self.credentials.report_failure(session);
                if self.credentials.is_usable(session) {
                    CloseMode::Release
                } else {
                    tracing::warn!(
                        "Login {:?} is no longer usable, retiring its context",
                        session.login_index()
                    );
                    CloseMode::Retire
                }
            }
            Err(_) => CloseMode::Release,
        }
    }

    /// Classifies the opened page and collects its items
    async fn run_page(
        &self,
        item: &WorkItem,
        opened: &OpenedPage,
    ) -> Result<ItemStatus, TidemarkError> {
        if item.page_type_hint == Some(PageType::Search) {
            return self.run_search(item, opened).await;
        }

        let (adapter, entity) = self
            .adapters
            .classify(&opened.state, item.page_type_hint)
            .ok_or_else(|| {
                TidemarkError::Driver(format!("unrecognized page at {}", item.url))
            })?;

        let collection = self
            .settings
            .results_type
            .collection(entity.page_type)
            .ok_or_else(|| {
                TidemarkError::TargetUnavailable(format!(
                    "{} pages have no {} to collect: {}",
                    entity.page_type, self.settings.results_type, item.url
                ))
            })?;

        tracing::info!("{}: opened {}", entity.log_label(), item.url);

        let lock = self.entity_lock(&entity.entity_id);
        let _guard = lock.lock().await;

        let reason = match collection {
            Collection::Paginated => {
                self.paginator
                    .paginate(opened.handle, adapter.as_ref(), &entity, item)
                    .await?
            }
            Collection::Embedded => {
                self.paginator
                    .collect_page(adapter.as_ref(), &entity, &opened.state, item)
                    .await?
            }
            Collection::Details => {
                self.paginator
                    .collect_details(adapter.as_ref(), &entity, &opened.state, item)
                    .await?
            }
        };

        Ok(match reason {
            StopReason::Cancelled => ItemStatus::Interrupted,
            _ => ItemStatus::Handled,
        })
    }

    /// Loads a search page and queues the targets it lists
    async fn run_search(
        &self,
        item: &WorkItem,
        opened: &OpenedPage,
    ) -> Result<ItemStatus, TidemarkError> {
        let search = self.search.as_ref().ok_or_else(|| {
            TidemarkError::TargetUnavailable(format!("no search configured for {}", item.url))
        })?;
        let label = PageType::Search.log_label(search.query());

        let response = match self
            .paginator
            .load_single(opened.handle, &item.url, &label)
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return Err(TidemarkError::RateLimited),
            Err(TidemarkError::Aborted) => return Ok(ItemStatus::Interrupted),
            Err(e) => return Err(e),
        };

        let mut queued = 0;
        for target in search.targets(&response)? {
            if self.queue.enqueue(target)? {
                queued += 1;
            }
        }
        tracing::info!("{}: queued {} new targets", label, queued);

        Ok(ItemStatus::Handled)
    }

    fn entity_lock(&self, entity_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .entity_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(entity_id.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterEntry;
    use crate::crawler::adapter::JsonAdapter;
    use crate::crawler::backoff::{Backoff, RecordingSleeper};
    use crate::crawler::driver::{Fixture, ReplayDriver};
    use crate::crawler::paginator::PaginationSettings;
    use crate::output::{MemorySink, OutputPipeline};
    use crate::queue::{MemoryQueue, WorkStatus};
    use crate::state::{Checkpoints, PageType};
    use crate::storage::{SharedStorage, SqliteStorage, Storage};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays fixtures with a delay on every advance, tracking how many
    /// contexts are open at once
    struct SlowDriver {
        inner: ReplayDriver,
        delay: Duration,
        open: AtomicUsize,
        max_open: AtomicUsize,
    }

    #[async_trait]
    impl PageDriver for SlowDriver {
        async fn open_context(
            &self,
            target: &WorkItem,
            credential: Option<&crate::credentials::Credential>,
        ) -> Result<OpenedPage, TidemarkError> {
            let opened = self.inner.open_context(target, credential).await?;
            let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(open, Ordering::SeqCst);
            Ok(opened)
        }

        async fn advance(
            &self,
            handle: crate::crawler::driver::ContextHandle,
            mode: crate::crawler::driver::AdvanceMode,
        ) -> Result<crate::crawler::driver::AdvanceOutcome, TidemarkError> {
            tokio::time::sleep(self.delay).await;
            self.inner.advance(handle, mode).await
        }

        async fn close(&self, handle: crate::crawler::driver::ContextHandle, mode: CloseMode) {
            self.open.fetch_sub(1, Ordering::SeqCst);
            self.inner.close(handle, mode).await;
        }
    }

    struct Harness {
        scheduler: Arc<Scheduler>,
        driver: Arc<ReplayDriver>,
        sink: Arc<MemorySink>,
        queue: Arc<MemoryQueue>,
        credentials: Arc<CredentialPool>,
    }

    fn profile_adapter() -> AdapterEntry {
        AdapterEntry {
            page_type: PageType::Profile,
            detect_pointer: "/user".to_string(),
            entity_pointer: "/user/name".to_string(),
            label_pointer: None,
            items_pointer: "/items".to_string(),
            has_next_pointer: Some("/more".to_string()),
            id_field: "id".to_string(),
            timestamp_field: None,
            detail_url_template: None,
            details_pointer: None,
        }
    }

    fn profile(url: &str, name: &str, responses: Vec<Value>) -> Fixture {
        Fixture::new(url, json!({"user": {"name": name}}), responses)
    }

    fn page(ids: &[&str], more: bool) -> Value {
        let items: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        json!({ "items": items, "more": more })
    }

    fn assemble(
        driver: Arc<dyn PageDriver>,
        adapters: &[AdapterEntry],
        credentials: Arc<CredentialPool>,
        settings: SchedulerSettings,
        search: Option<SearchExpander>,
    ) -> (Arc<Scheduler>, Arc<MemorySink>, Arc<MemoryQueue>) {
        let sink = Arc::new(MemorySink::new());
        let queue = Arc::new(MemoryQueue::new());
        let storage = SharedStorage::new(SqliteStorage::new_in_memory().unwrap());
        let run_id = storage.lock().create_run("hash").unwrap();
        let sleeper = Arc::new(RecordingSleeper::new());
        let cancel = CancellationToken::new();

        let paginator = Paginator::new(
            driver.clone(),
            Arc::new(Checkpoints::new()),
            Arc::new(storage),
            run_id,
            Arc::new(OutputPipeline::new(sink.clone())),
            queue.clone(),
            Arc::new(Backoff::new(Duration::from_secs(1), 2, sleeper.clone())),
            sleeper,
            PaginationSettings {
                stall_attempts: 2,
                ..Default::default()
            },
            cancel.clone(),
        );

        let mut scheduler = Scheduler::new(
            queue.clone(),
            driver,
            Arc::new(AdapterRegistry::from_config(adapters)),
            credentials,
            Arc::new(paginator),
            sink.clone(),
            settings,
            cancel,
        );
        if let Some(search) = search {
            scheduler = scheduler.with_search(search);
        }

        (Arc::new(scheduler), sink, queue)
    }

    fn harness(
        fixtures: Vec<Fixture>,
        credentials: CredentialPool,
        settings: SchedulerSettings,
    ) -> Harness {
        let mut driver = ReplayDriver::new();
        for fixture in fixtures {
            driver = driver.with_fixture(fixture).unwrap();
        }
        let driver = Arc::new(driver);
        let credentials = Arc::new(credentials);
        let (scheduler, sink, queue) = assemble(
            driver.clone(),
            &[profile_adapter()],
            credentials.clone(),
            settings,
            None,
        );

        Harness {
            scheduler,
            driver,
            sink,
            queue,
            credentials,
        }
    }

    fn settings(require_credentials: bool) -> SchedulerSettings {
        SchedulerSettings {
            concurrency: 4,
            max_request_retries: 3,
            item_timeout: Duration::from_secs(60),
            require_credentials,
            results_type: ResultsType::Posts,
        }
    }

    fn enqueue(h: &Harness, url: &str) -> String {
        h.queue.enqueue(WorkItem::new(url).with_label(url)).unwrap();
        crate::queue::dedup_key(url).unwrap()
    }

    #[tokio::test]
    async fn test_runs_all_items() {
        let h = harness(
            vec![
                profile("https://site.example/a/", "a", vec![page(&["a1", "a2"], false)]),
                profile("https://site.example/b/", "b", vec![page(&["b1"], false)]),
            ],
            CredentialPool::empty(3),
            settings(false),
        );
        let a = enqueue(&h, "https://site.example/a/");
        let b = enqueue(&h, "https://site.example/b/");

        let summary = h.scheduler.clone().run().await.unwrap();

        assert_eq!(summary.handled, 2);
        assert_eq!(h.sink.records().len(), 3);
        assert_eq!(h.queue.status(&a), Some(WorkStatus::Handled));
        assert_eq!(h.queue.status(&b), Some(WorkStatus::Handled));
    }

    #[tokio::test]
    async fn test_stalled_item_retried_then_recorded() {
        let h = harness(
            vec![profile("https://site.example/a/", "a", vec![])],
            CredentialPool::empty(3),
            settings(false),
        );
        let key = enqueue(&h, "https://site.example/a/");

        let summary = h.scheduler.clone().run().await.unwrap();

        assert_eq!(summary.failed, 1);
        let failures = h.sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].url, "https://site.example/a/");
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(h.queue.status(&key), Some(WorkStatus::Failed));
    }

    #[tokio::test]
    async fn test_unavailable_target_not_retried() {
        let h = harness(Vec::new(), CredentialPool::empty(3), settings(false));
        enqueue(&h, "https://site.example/missing/");

        let summary = h.scheduler.clone().run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(h.sink.failures()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_success_reported_to_login() {
        let pool = CredentialPool::load(&json!([[{"c": 1}]]), 3, true).unwrap();
        let h = harness(
            vec![profile("https://site.example/a/", "a", vec![page(&["1"], false)])],
            pool,
            settings(true),
        );
        enqueue(&h, "https://site.example/a/");

        h.scheduler.clone().run().await.unwrap();

        let snapshot = h.credentials.snapshot();
        assert_eq!(snapshot[0].uses, 1);
        assert_eq!(snapshot[0].errors, 0);
    }

    #[tokio::test]
    async fn test_invalid_session_retires_then_aborts() {
        let pool = CredentialPool::load(&json!([[{"c": 1}]]), 2, true).unwrap();
        let h = harness(
            vec![profile(
                "https://site.example/a/",
                "a",
                vec![json!({"session_invalid": true})],
            )],
            pool,
            settings(true),
        );
        enqueue(&h, "https://site.example/a/");

        let result = h.scheduler.clone().run().await;

        assert!(matches!(result, Err(TidemarkError::NoCredentials)));
        assert_eq!(h.credentials.usable_count(), 0);
        assert_eq!(h.driver.retired(), 1);
    }

    #[test]
    fn test_pool_size_bounded_by_logins() {
        let pool = CredentialPool::load(&json!([[{"c": 1}], [{"c": 2}]]), 3, true).unwrap();
        let h = harness(Vec::new(), pool, settings(true));
        assert_eq!(h.scheduler.pool_size(), 2);

        let h = harness(Vec::new(), CredentialPool::empty(3), settings(false));
        assert_eq!(h.scheduler.pool_size(), 4);
    }

    #[tokio::test]
    async fn test_same_entity_items_serialized() {
        // Two URLs resolve to the same entity; the second sees the first's checkpoint
        let h = harness(
            vec![
                profile("https://site.example/a/", "same", vec![page(&["1", "2"], false)]),
                profile("https://site.example/a-alias/", "same", vec![page(&["1", "2"], false)]),
            ],
            CredentialPool::empty(3),
            settings(false),
        );
        enqueue(&h, "https://site.example/a/");
        enqueue(&h, "https://site.example/a-alias/");

        let summary = h.scheduler.clone().run().await.unwrap();

        assert_eq!(summary.handled, 2);
        assert_eq!(h.sink.records().len(), 2);
    }

    #[tokio::test]
    async fn test_detail_pages_start_while_listing_runs() {
        let hashtag = AdapterEntry {
            page_type: PageType::Hashtag,
            detect_pointer: "/tag".to_string(),
            entity_pointer: "/tag/name".to_string(),
            detail_url_template: Some("https://site.example/p/{id}/".to_string()),
            ..profile_adapter()
        };
        let post = AdapterEntry {
            page_type: PageType::Post,
            detect_pointer: "/post".to_string(),
            entity_pointer: "/post/id".to_string(),
            ..profile_adapter()
        };

        let mut inner = ReplayDriver::new()
            .with_fixture(Fixture::new(
                "https://site.example/explore/tags/rust/",
                json!({"tag": {"name": "rust"}}),
                vec![
                    page(&["1"], true),
                    page(&["2"], true),
                    page(&["3"], true),
                    page(&["4"], false),
                ],
            ))
            .unwrap();
        for id in ["1", "2", "3", "4"] {
            inner = inner
                .with_fixture(Fixture::new(
                    format!("https://site.example/p/{}/", id),
                    json!({"post": {"id": id}}),
                    Vec::new(),
                ))
                .unwrap();
        }
        let driver = Arc::new(SlowDriver {
            inner,
            delay: Duration::from_millis(30),
            open: AtomicUsize::new(0),
            max_open: AtomicUsize::new(0),
        });

        let (scheduler, sink, queue) = assemble(
            driver.clone(),
            &[hashtag, post],
            Arc::new(CredentialPool::empty(3)),
            settings(false),
            None,
        );
        queue
            .enqueue(WorkItem::new("https://site.example/explore/tags/rust/"))
            .unwrap();

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.handled, 5);
        assert_eq!(sink.records().len(), 4);
        // Detail pages opened next to the listing, not after it
        assert!(driver.max_open.load(Ordering::SeqCst) >= 2);
        assert_eq!(driver.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_queues_found_targets() {
        let search = SearchExpander::new(crate::config::SearchConfig {
            query: "space".to_string(),
            search_type: crate::state::SearchType::User,
            limit: 2,
            url_template: "https://site.example/web/search/?query={query}".to_string(),
            results_pointer: "/users".to_string(),
            result_url_template: "https://site.example/{/user/username}/".to_string(),
        });
        let driver = ReplayDriver::new()
            .with_fixture(Fixture::new(
                "https://site.example/web/search/?query=space",
                Value::Null,
                vec![
                    json!({"rate_limited": true}),
                    json!({"users": [
                        {"user": {"username": "nasa"}},
                        {"user": {"username": "esa"}},
                        {"user": {"username": "jaxa"}}
                    ]}),
                ],
            ))
            .unwrap()
            .with_fixture(profile("https://site.example/nasa/", "nasa", vec![page(&["n1"], false)]))
            .unwrap()
            .with_fixture(profile("https://site.example/esa/", "esa", vec![page(&["e1"], false)]))
            .unwrap();
        let item = search.work_item();

        let (scheduler, sink, queue) = assemble(
            Arc::new(driver),
            &[profile_adapter()],
            Arc::new(CredentialPool::empty(3)),
            settings(false),
            Some(search),
        );
        queue.enqueue(item).unwrap();

        let summary = scheduler.run().await.unwrap();

        // The search itself plus the two targets it kept
        assert_eq!(summary.handled, 3);
        assert_eq!(summary.failed, 0);
        let mut ids: Vec<String> = sink
            .records()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["e1", "n1"]);
    }

    #[tokio::test]
    async fn test_page_without_results_type_not_retried() {
        let mut comments = settings(false);
        comments.results_type = ResultsType::Comments;
        let driver = ReplayDriver::new()
            .with_fixture(profile("https://site.example/a/", "a", vec![page(&["1"], false)]))
            .unwrap();
        let (scheduler, sink, queue) = assemble(
            Arc::new(driver),
            &[profile_adapter()],
            Arc::new(CredentialPool::empty(3)),
            comments,
            None,
        );
        queue.enqueue(WorkItem::new("https://site.example/a/")).unwrap();

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(sink.records().is_empty());
        assert_eq!(sink.failures()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_queue() {
        let h = harness(
            vec![profile("https://site.example/a/", "a", vec![page(&["1"], false)])],
            CredentialPool::empty(3),
            settings(false),
        );
        let key = enqueue(&h, "https://site.example/a/");
        h.scheduler.cancel.cancel();

        let summary = h.scheduler.clone().run().await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(h.queue.status(&key), Some(WorkStatus::Pending));
    }
}
