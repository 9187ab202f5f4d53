//! Tidemark: an incremental, resumable crawl orchestration engine
//!
//! This crate drives paginated extraction from a session-gated social site.
//! It decides what to fetch next, bounds concurrency by the available login
//! identities, deduplicates and bounds output per entity, survives rate
//! limiting, and checkpoints progress so a restarted run does not reprocess
//! work. Browser automation and site markup live behind the [`crawler::PageDriver`]
//! and [`crawler::SiteAdapter`] traits.

pub mod config;
pub mod crawler;
pub mod credentials;
pub mod output;
pub mod queue;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Tidemark operations
#[derive(Debug, Error)]
pub enum TidemarkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No usable login credentials")]
    NoCredentials,

    #[error("Rate limited")]
    RateLimited,

    #[error("No page progress for {entity_id} after {attempts} attempts")]
    PageStalled { entity_id: String, attempts: u32 },

    #[error("Missing item id in batch for {entity_id}")]
    MissingId { entity_id: String },

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Challenge page encountered: {0}")]
    Challenge(String),

    #[error("Page driver error: {0}")]
    Driver(String),

    #[error("Work item timed out after {secs}s")]
    ItemTimeout { secs: u64 },

    #[error("Run aborted")]
    Aborted,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("Sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TidemarkError {
    /// Returns true if a work item failing with this error should be retried
    /// from a fresh execution context
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PageStalled { .. }
                | Self::SessionInvalid(_)
                | Self::Challenge(_)
                | Self::Driver(_)
                | Self::ItemTimeout { .. }
                | Self::RateLimited
        )
    }

    /// Returns true if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::NoCredentials | Self::Aborted | Self::Database(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid time range bound: {0}")]
    InvalidTimeRange(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Tidemark operations
pub type Result<T> = std::result::Result<T, TidemarkError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialPool, Session};
pub use state::{PageType, ScrollState, StopReason, TimeRange};
pub use url::normalize_url;
