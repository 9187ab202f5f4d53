//! Append-only record sinks

use crate::output::SinkError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Destination for emitted records
///
/// Implementations must accept concurrent calls from every execution context.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Appends one output record
    async fn emit(&self, record: Value) -> Result<(), SinkError>;

    /// Appends the failure record of a work item that ran out of retries
    async fn emit_failure(&self, failure: &FailureRecord) -> Result<(), SinkError>;
}

/// A work item that failed permanently
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub url: String,
    pub label: Option<String>,
    pub error: String,
    pub attempts: u32,
}

impl FailureRecord {
    /// The record as written to the results file
    ///
    /// Keys carry a `#` prefix so failures can't collide with item fields.
    pub fn to_value(&self) -> Value {
        json!({
            "#error": self.error,
            "#url": self.url,
            "#label": self.label,
            "#attempts": self.attempts,
        })
    }
}

/// Sink writing one JSON object per line to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, value: &Value) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn emit(&self, record: Value) -> Result<(), SinkError> {
        self.write_line(&record).await
    }

    async fn emit_failure(&self, failure: &FailureRecord) -> Result<(), SinkError> {
        self.write_line(&failure.to_value()).await
    }
}

/// Sink keeping everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Value>>,
    failures: Mutex<Vec<FailureRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the records emitted so far, in emission order
    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn emit(&self, record: Value) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }

    async fn emit_failure(&self, failure: &FailureRecord) -> Result<(), SinkError> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(failure.clone());
        Ok(())
    }
}
