//! State module for tracking crawl progress
//!
//! This module provides the per-entity state the pagination engine works on.
//!
//! # Components
//!
//! - `PageType`: The closed set of page variants an entity can live on
//! - `ResultsType`, `Collection`: Which collection of a page a run gathers
//! - `SearchType`: What a search query resolves into
//! - `StopReason`: Why an entity's pagination loop ended
//! - `ScrollState`: Per-entity progress (seen ids, next-page and boundary flags)
//! - `Checkpoints`: The run's in-memory map of entity id to `ScrollState`
//! - `TimeRange`: The optional window that bounds which items are emitted

mod page_type;
mod scroll_state;
mod time_range;

// Re-export main types
pub use page_type::{Collection, PageType, ResultsType, SearchType, StopReason};
pub use scroll_state::{Checkpoints, ScrollState};
pub use time_range::{parse_bound, TimeRange};
