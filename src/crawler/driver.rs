//! Page driver seam and the fixture replay driver
//!
//! A page driver owns execution contexts (browser tabs in production). The
//! engine only ever opens a context for a work item, asks it for the next batch
//! of raw data, and closes it.

use crate::credentials::Credential;
use crate::queue::{dedup_key, WorkItem};
use crate::TidemarkError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Opaque identifier of an open execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// A freshly opened page
#[derive(Debug, Clone)]
pub struct OpenedPage {
    pub handle: ContextHandle,
    /// Raw page state, handed to the site adapters for classification
    pub state: Value,
}

/// Which batch an advance call asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    /// Data that arrived with the page load itself
    Initial,
    /// The next page, triggered by scrolling or a "load more" control
    Next,
}

/// Result of one advance call
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// A raw response to be parsed by the site adapter
    Batch(Value),
    /// The driver gave up waiting for a response
    Timeout,
    /// The page did not request anything new
    NoResponse,
    /// The site refused the request with a rate-limit signal
    RateLimited,
}

/// How a context is disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Return the context for reuse
    Release,
    /// Destroy the context; its login identity is no longer usable
    Retire,
}

/// Execution contexts for a session-gated site
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Opens a context on the target, logged in with `credential` when given
    ///
    /// # Returns
    ///
    /// * `Ok(OpenedPage)` - The context and its raw page state
    /// * `Err(TidemarkError::SessionInvalid)` - The site rejected the login
    /// * `Err(TidemarkError::TargetUnavailable)` - The target doesn't exist or is private
    async fn open_context(
        &self,
        target: &WorkItem,
        credential: Option<&Credential>,
    ) -> Result<OpenedPage, TidemarkError>;

    /// Requests the next batch of raw data from an open context
    async fn advance(
        &self,
        handle: ContextHandle,
        mode: AdvanceMode,
    ) -> Result<AdvanceOutcome, TidemarkError>;

    /// Closes a context
    async fn close(&self, handle: ContextHandle, mode: CloseMode);
}

/// A recorded page session
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub url: String,

    #[serde(default)]
    pub state: Value,

    /// Responses replayed in order by successive advance calls
    #[serde(default)]
    pub responses: Vec<Value>,
}

impl Fixture {
    pub fn new(url: impl Into<String>, state: Value, responses: Vec<Value>) -> Self {
        Self {
            url: url.into(),
            state,
            responses,
        }
    }
}

/// Page driver replaying recorded sessions from fixtures
///
/// Every `open_context` starts the fixture's responses from the beginning.
/// A response is either a batch or one of the marker objects
/// `{"rate_limited": true}`, `{"timeout": true}`, `{"no_response": true}`,
/// `{"session_invalid": true}`, `{"not_found": true}`. The same
/// `session_invalid` / `not_found` markers in the page state fail the open.
/// Once the responses run out every advance reports no response.
#[derive(Debug, Default)]
pub struct ReplayDriver {
    fixtures: HashMap<String, Fixture>,
    open: Mutex<HashMap<u64, VecDeque<Value>>>,
    next_handle: AtomicU64,
    advances: AtomicUsize,
    retired: AtomicUsize,
}

impl ReplayDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fixture under its normalized URL
    pub fn with_fixture(mut self, fixture: Fixture) -> Result<Self, TidemarkError> {
        let key = dedup_key(&fixture.url)?;
        self.fixtures.insert(key, fixture);
        Ok(self)
    }

    /// Loads every `*.json` file of a directory as a fixture
    pub fn load_dir(dir: &Path) -> Result<Self, TidemarkError> {
        let mut driver = Self::new();

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let fixture: Fixture = serde_json::from_str(&content)?;
            tracing::debug!("Loaded fixture {} for {}", path.display(), fixture.url);
            driver = driver.with_fixture(fixture)?;
        }

        tracing::info!("Loaded {} replay fixtures", driver.fixtures.len());
        Ok(driver)
    }

    pub fn fixture_count(&self) -> usize {
        self.fixtures.len()
    }

    /// Number of advance calls served so far
    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    /// Number of contexts closed with [`CloseMode::Retire`]
    pub fn retired(&self) -> usize {
        self.retired.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, VecDeque<Value>>> {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn has_marker(value: &Value, marker: &str) -> bool {
    value.get(marker).and_then(Value::as_bool) == Some(true)
}

#[async_trait]
impl PageDriver for ReplayDriver {
    async fn open_context(
        &self,
        target: &WorkItem,
        credential: Option<&Credential>,
    ) -> Result<OpenedPage, TidemarkError> {
        let key = dedup_key(&target.url)?;
        let fixture = self.fixtures.get(&key).ok_or_else(|| {
            TidemarkError::TargetUnavailable(format!("no fixture recorded for {}", target.url))
        })?;

        if has_marker(&fixture.state, "session_invalid") {
            return Err(TidemarkError::SessionInvalid(format!(
                "login wall at {}",
                target.url
            )));
        }
        if has_marker(&fixture.state, "not_found") {
            return Err(TidemarkError::TargetUnavailable(format!(
                "page not found: {}",
                target.url
            )));
        }

        let handle = ContextHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.lock()
            .insert(handle.0, fixture.responses.iter().cloned().collect());

        tracing::trace!(
            "Opened context {} on {} (login: {:?})",
            handle.0,
            target.url,
            credential.map(|c| c.index)
        );

        Ok(OpenedPage {
            handle,
            state: fixture.state.clone(),
        })
    }

    async fn advance(
        &self,
        handle: ContextHandle,
        _mode: AdvanceMode,
    ) -> Result<AdvanceOutcome, TidemarkError> {
        self.advances.fetch_add(1, Ordering::SeqCst);

        let next = self
            .lock()
            .get_mut(&handle.0)
            .ok_or_else(|| TidemarkError::Driver(format!("context {} is not open", handle.0)))?
            .pop_front();

        let Some(response) = next else {
            return Ok(AdvanceOutcome::NoResponse);
        };

        if has_marker(&response, "rate_limited") {
            Ok(AdvanceOutcome::RateLimited)
        } else if has_marker(&response, "timeout") {
            Ok(AdvanceOutcome::Timeout)
        } else if has_marker(&response, "no_response") {
            Ok(AdvanceOutcome::NoResponse)
        } else if has_marker(&response, "session_invalid") {
            Err(TidemarkError::SessionInvalid(
                "session expired while paginating".to_string(),
            ))
        } else if has_marker(&response, "not_found") {
            Err(TidemarkError::TargetUnavailable(
                "page removed while paginating".to_string(),
            ))
        } else {
            Ok(AdvanceOutcome::Batch(response))
        }
    }

    async fn close(&self, handle: ContextHandle, mode: CloseMode) {
        self.lock().remove(&handle.0);
        if mode == CloseMode::Retire {
            self.retired.fetch_add(1, Ordering::SeqCst);
        }
        tracing::trace!("Closed context {} ({:?})", handle.0, mode);
    }
}
