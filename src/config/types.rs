use crate::state::{PageType, ResultsType, SearchType, TimeRange};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Main configuration structure for Tidemark
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(rename = "time-range", default)]
    pub time_range: TimeRangeConfig,
    pub output: OutputConfig,
    #[serde(rename = "seed", default)]
    pub seeds: Vec<SeedEntry>,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    #[serde(rename = "adapter", default)]
    pub adapters: Vec<AdapterEntry>,
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl Config {
    /// Resolves the configured time window relative to `now`
    pub fn resolve_time_range(&self, now: DateTime<Utc>) -> Result<TimeRange, ConfigError> {
        TimeRange::parse(
            self.time_range.min.as_deref(),
            self.time_range.max.as_deref(),
            now,
        )
    }

    /// The per-entity result limit; unbounded when not configured
    pub fn results_limit(&self) -> usize {
        self.crawler.results_limit.unwrap_or(usize::MAX)
    }
}

/// Execution scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of work items run in parallel
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: u32,

    /// Attempts per work item before it is recorded as failed
    #[serde(rename = "max-request-retries", default = "default_max_request_retries")]
    pub max_request_retries: u32,

    /// Upper bound on one work item's total run time (seconds)
    #[serde(rename = "item-timeout-secs", default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,

    /// Maximum items collected per entity
    #[serde(rename = "results-limit", default)]
    pub results_limit: Option<usize>,

    /// Whether every work item must run under a login identity
    #[serde(rename = "require-credentials", default)]
    pub require_credentials: bool,

    /// Which collection of each page is gathered
    #[serde(rename = "results-type", default)]
    pub results_type: ResultsType,
}

/// Pagination engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScrollConfig {
    /// Timeout for one page-driver advance (seconds)
    #[serde(rename = "advance-timeout-secs", default = "default_advance_timeout_secs")]
    pub advance_timeout_secs: u64,

    /// Consecutive attempts without driver progress before the page is stalled
    #[serde(rename = "stall-attempts", default = "default_stall_attempts")]
    pub stall_attempts: u32,

    /// Base delay between stalled attempts; grows linearly (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Consecutive duplicate-only batches tolerated before giving up; unset means unlimited
    #[serde(rename = "max-duplicate-batches", default = "default_max_duplicate_batches")]
    pub max_duplicate_batches: Option<u32>,

    /// Whether to insert randomized delays between page loads
    #[serde(default = "default_true")]
    pub pacing: bool,

    /// Extra pause added to the periodic long delay on large entities (milliseconds)
    #[serde(rename = "scroll-wait-ms", default)]
    pub scroll_wait_ms: u64,

    /// Time budget for one output hook invocation (milliseconds)
    #[serde(rename = "hook-timeout-ms", default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            advance_timeout_secs: default_advance_timeout_secs(),
            stall_attempts: default_stall_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_duplicate_batches: default_max_duplicate_batches(),
            pacing: true,
            scroll_wait_ms: 0,
            hook_timeout_ms: default_hook_timeout_ms(),
        }
    }
}

/// Rate-limit backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Delay unit; attempt N sleeps N times this (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Retries after the first rate-limited attempt
    #[serde(rename = "max-retries", default = "default_backoff_retries")]
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_backoff_retries(),
        }
    }
}

/// Login identity configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// JSON file holding a flat list (one identity) or a list of lists
    #[serde(default)]
    pub file: Option<String>,

    /// Errors at which an identity is retired
    #[serde(rename = "max-error-count", default = "default_max_error_count")]
    pub max_error_count: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            file: None,
            max_error_count: default_max_error_count(),
        }
    }
}

/// Time window bounds, as written in the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeRangeConfig {
    #[serde(default)]
    pub min: Option<String>,
    #[serde(default)]
    pub max: Option<String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the JSON Lines results file
    #[serde(rename = "results-path")]
    pub results_path: String,

    /// Keep only these top-level fields of each record
    #[serde(rename = "pick-fields", default)]
    pub pick_fields: Option<Vec<String>>,

    /// Arbitrary data handed to output hooks
    #[serde(rename = "custom-data", default)]
    pub custom_data: Value,
}

/// A seed target
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub url: String,

    #[serde(rename = "page-type", default)]
    pub page_type: Option<PageType>,

    #[serde(default)]
    pub label: Option<String>,
}

/// A search query resolved into seed targets
///
/// Only used when no `[[seed]]` is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub query: String,

    #[serde(rename = "search-type")]
    pub search_type: SearchType,

    /// Maximum number of search results turned into targets
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Search page URL with `{query}` and optional `{type}` placeholders
    #[serde(rename = "url-template")]
    pub url_template: String,

    /// Pointer to the result array in the search response
    #[serde(rename = "results-pointer")]
    pub results_pointer: String,

    /// Target URL built from each result; `{/pointer}` placeholders are
    /// filled from the result
    #[serde(rename = "result-url-template")]
    pub result_url_template: String,
}

/// A JSON-pointer driven site adapter for one page type
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterEntry {
    #[serde(rename = "page-type")]
    pub page_type: PageType,

    /// Pointer whose presence in the page state selects this adapter
    #[serde(rename = "detect-pointer")]
    pub detect_pointer: String,

    /// Pointer to the entity id in the page state
    #[serde(rename = "entity-pointer")]
    pub entity_pointer: String,

    /// Pointer to a human label in the page state
    #[serde(rename = "label-pointer", default)]
    pub label_pointer: Option<String>,

    /// Pointer to the item array, in both page state and batch responses
    #[serde(rename = "items-pointer")]
    pub items_pointer: String,

    /// Pointer to the has-next-page flag in batch responses
    #[serde(rename = "has-next-pointer", default)]
    pub has_next_pointer: Option<String>,

    /// Item field holding the id
    #[serde(rename = "id-field", default = "default_id_field")]
    pub id_field: String,

    /// Item field holding the timestamp (unix seconds or RFC 3339)
    #[serde(rename = "timestamp-field", default)]
    pub timestamp_field: Option<String>,

    /// Detail page URL with an `{id}` placeholder; enables detail expansion
    #[serde(rename = "detail-url-template", default)]
    pub detail_url_template: Option<String>,

    /// Pointer to the page's own details record; defaults to the detect pointer
    #[serde(rename = "details-pointer", default)]
    pub details_pointer: Option<String>,
}

/// Replay page driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(rename = "fixtures-dir", default = "default_fixtures_dir")]
    pub fixtures_dir: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: default_fixtures_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_request_retries() -> u32 {
    3
}

fn default_item_timeout_secs() -> u64 {
    5 * 60 * 60
}

fn default_advance_timeout_secs() -> u64 {
    30
}

fn default_stall_attempts() -> u32 {
    4
}

fn default_retry_delay_ms() -> u64 {
    3500
}

fn default_max_duplicate_batches() -> Option<u32> {
    Some(10)
}

fn default_hook_timeout_ms() -> u64 {
    5000
}

fn default_base_delay_ms() -> u64 {
    10_000
}

fn default_backoff_retries() -> u32 {
    10
}

fn default_max_error_count() -> u32 {
    3
}

fn default_search_limit() -> usize {
    10
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_fixtures_dir() -> String {
    "./fixtures".to_string()
}
