//! Search resolution
//!
//! A configured search query runs as one work item. Its response lists
//! matching profiles, places or hashtags, which are queued as seed targets.

use crate::config::SearchConfig;
use crate::queue::WorkItem;
use crate::state::PageType;
use crate::TidemarkError;
use serde_json::Value;

/// Turns a search query into a work item and its response into targets
#[derive(Debug, Clone)]
pub struct SearchExpander {
    config: SearchConfig,
}

impl SearchExpander {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn query(&self) -> &str {
        &self.config.query
    }

    /// The work item that loads the search page
    pub fn work_item(&self) -> WorkItem {
        let query: String =
            url::form_urlencoded::byte_serialize(self.config.query.as_bytes()).collect();
        let url = self
            .config
            .url_template
            .replace("{query}", &query)
            .replace("{type}", self.config.search_type.as_str());

        WorkItem::new(url)
            .with_hint(PageType::Search)
            .with_label(self.config.query.clone())
    }

    /// Builds the targets found in a search response, at most `limit` of them
    ///
    /// Results whose URL template cannot be filled are skipped.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<WorkItem>)` - Targets hinted with the searched page type
    /// * `Err(TidemarkError::Driver)` - The response holds no result list
    pub fn targets(&self, response: &Value) -> Result<Vec<WorkItem>, TidemarkError> {
        let results = response
            .pointer(&self.config.results_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                TidemarkError::Driver(format!(
                    "search response has no results at {}",
                    self.config.results_pointer
                ))
            })?;

        let page_type = self.config.search_type.page_type();
        let targets: Vec<WorkItem> = results
            .iter()
            .filter_map(|result| {
                let url = fill_template(&self.config.result_url_template, result);
                if url.is_none() {
                    tracing::debug!("Skipping search result without a target: {}", result);
                }
                url
            })
            .take(self.config.limit)
            .map(|url| WorkItem::new(url).with_hint(page_type))
            .collect();

        tracing::info!(
            "Search \"{}\": {} results, keeping {}",
            self.config.query,
            results.len(),
            targets.len()
        );
        Ok(targets)
    }
}

/// Replaces every `{/pointer}` placeholder with the scalar it points to
///
/// Returns None if a placeholder is unterminated or points at nothing usable.
fn fill_template(template: &str, record: &Value) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{/") {
        out.push_str(&rest[..start]);
        let end = start + rest[start..].find('}')?;
        let value = match record.pointer(&rest[start + 1..end])? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        out.push_str(&value);
        rest = &rest[end + 1..];
    }

    out.push_str(rest);
    Some(out)
}
