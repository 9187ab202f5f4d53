//! URL handling module for Tidemark
//!
//! This module provides URL normalization (the work queue's dedup key) and
//! page type hints derived from URL shape.

mod normalize;

use crate::state::PageType;

pub use normalize::normalize_url;

/// Guesses the page type of a target URL from its path
///
/// Returns None for URLs that don't parse or whose path has no recognizable shape.
///
/// # Examples
///
/// ```
/// use tidemark::state::PageType;
/// use tidemark::url::page_type_hint;
///
/// assert_eq!(page_type_hint("https://site.example/p/ABC123/"), Some(PageType::Post));
/// assert_eq!(page_type_hint("garbage"), None);
/// ```
pub fn page_type_hint(url: &str) -> Option<PageType> {
    let parsed = ::url::Url::parse(url).ok()?;
    PageType::hint_from_path(parsed.path())
}
