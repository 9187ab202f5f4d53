//! Output module for crawl results
//!
//! This module handles:
//! - Mapping, filtering and projecting extracted items before they are written
//! - Appending records and structured failure records to a sink
//! - Summarizing run statistics from the database

mod pipeline;
mod sink;
pub mod stats;

pub use pipeline::{FilterHook, HookContext, HookError, MapHook, OutputPipeline};
pub use sink::{FailureRecord, JsonLinesSink, MemorySink, Sink};
pub use stats::{load_statistics, print_statistics, RunStatistics};

use thiserror::Error;

/// Errors raised while writing to a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}
