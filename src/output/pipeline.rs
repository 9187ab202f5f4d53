//! Output pipeline: map, filter and project items on their way to the sink
//!
//! Hooks are plain function values injected by the host. They see the raw item
//! and a [`HookContext`]; nothing else about the engine is reachable from them.
//! A hook that errors, panics or overruns its time budget costs only the record
//! it was handling.

use crate::output::{Sink, SinkError};
use crate::state::PageType;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maps one raw item to zero or more records
///
/// An array result fans out, `null` suppresses, anything else is one record.
pub type MapHook = Arc<dyn Fn(&Value, &HookContext) -> Result<Value, HookError> + Send + Sync>;

/// Decides whether a mapped record is written; sees `(raw, mapped)`
pub type FilterHook =
    Arc<dyn Fn(&Value, &Value, &HookContext) -> Result<bool, HookError> + Send + Sync>;

/// Errors raised by output hooks
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("hook panicked")]
    Panicked,

    #[error("hook timed out after {0}ms")]
    Timeout(u64),
}

/// Helpers handed to every hook invocation
#[derive(Debug, Clone)]
pub struct HookContext {
    pub entity_id: String,
    pub page_type: PageType,
    /// URL of the work item that produced the record
    pub url: String,
    /// Free-form data from the `custom-data` config table
    pub custom_data: Arc<Value>,
}

impl HookContext {
    pub fn log_label(&self) -> String {
        self.page_type.log_label(&self.entity_id)
    }
}

/// Map, filter, projection and sink for extracted items
pub struct OutputPipeline {
    sink: Arc<dyn Sink>,
    map: Option<MapHook>,
    filter: Option<FilterHook>,
    pick_fields: Option<Vec<String>>,
    hook_timeout: Duration,
}

impl OutputPipeline {
    /// Creates a pipeline with identity map and no filter
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            map: None,
            filter: None,
            pick_fields: None,
            hook_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_map(mut self, hook: MapHook) -> Self {
        self.map = Some(hook);
        self
    }

    pub fn with_filter(mut self, hook: FilterHook) -> Self {
        self.filter = Some(hook);
        self
    }

    /// Keeps only the named top-level fields of each object record
    pub fn with_pick_fields(mut self, fields: Vec<String>) -> Self {
        self.pick_fields = Some(fields);
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// Runs one raw item through the pipeline
    ///
    /// # Arguments
    ///
    /// * `raw` - The item as extracted from the page
    /// * `ctx` - Helpers passed to the hooks
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of records written (0 when dropped)
    /// * `Err(SinkError)` - The sink itself failed
    pub async fn emit(&self, raw: &Value, ctx: &HookContext) -> Result<usize, SinkError> {
        let mapped = match &self.map {
            Some(map) => {
                let map = map.clone();
                let input = raw.clone();
                let hook_ctx = ctx.clone();
                match self.run_hook(move || map(&input, &hook_ctx)).await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(
                            "{}: map hook failed, dropping record {}: {}",
                            ctx.log_label(),
                            raw,
                            e
                        );
                        return Ok(0);
                    }
                }
            }
            None => raw.clone(),
        };

        let records = match mapped {
            Value::Null => Vec::new(),
            Value::Array(values) => values,
            other => vec![other],
        };

        let mut written = 0;
        for record in records {
            if record.is_null() {
                continue;
            }

            if !self.passes_filter(raw, &record, ctx).await {
                continue;
            }

            let record = match &self.pick_fields {
                Some(fields) => project(record, fields),
                None => record,
            };

            self.sink.emit(record).await?;
            written += 1;
        }

        Ok(written)
    }

    async fn passes_filter(&self, raw: &Value, record: &Value, ctx: &HookContext) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };

        let filter = filter.clone();
        let raw_input = raw.clone();
        let mapped_input = record.clone();
        let hook_ctx = ctx.clone();

        match self
            .run_hook(move || filter(&raw_input, &mapped_input, &hook_ctx))
            .await
        {
            Ok(keep) => keep,
            Err(e) => {
                tracing::warn!(
                    "{}: filter hook failed, dropping record {}: {}",
                    ctx.log_label(),
                    record,
                    e
                );
                false
            }
        }
    }

    /// Runs a hook on the blocking pool under the configured time budget
    ///
    /// A timed-out hook keeps running in the background; its result is discarded.
    async fn run_hook<T, F>(&self, hook: F) -> Result<T, HookError>
    where
        F: FnOnce() -> Result<T, HookError> + Send + 'static,
        T: Send + 'static,
    {
        let budget = self.hook_timeout;
        match tokio::time::timeout(budget, tokio::task::spawn_blocking(hook)).await {
            Err(_) => Err(HookError::Timeout(budget.as_millis() as u64)),
            Ok(Err(join_error)) if join_error.is_panic() => Err(HookError::Panicked),
            Ok(Err(join_error)) => Err(HookError::Failed(join_error.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

fn project(record: Value, fields: &[String]) -> Value {
    match record {
        Value::Object(mut object) => {
            let mut picked = Map::new();
            for field in fields {
                if let Some(value) = object.remove(field) {
                    picked.insert(field.clone(), value);
                }
            }
            Value::Object(picked)
        }
        other => other,
    }
}
