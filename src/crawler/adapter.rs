//! Site adapter seam
//!
//! Adapters know the shape of the site's data: how to recognize a page type from
//! raw page state and how to pull items, ids and timestamps out of responses.

use crate::config::AdapterEntry;
use crate::queue::WorkItem;
use crate::state::PageType;
use crate::TidemarkError;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;

/// What a page turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub page_type: PageType,
    pub entity_id: String,
    pub label: Option<String>,
}

impl Classification {
    /// Log prefix for this entity, e.g. `User "nasa"`
    pub fn log_label(&self) -> String {
        self.page_type
            .log_label(self.label.as_deref().unwrap_or(&self.entity_id))
    }
}

/// Items extracted from one raw response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub items: Vec<Value>,
    pub has_next_page: bool,
}

/// Site knowledge for one page type
///
/// Batches are expected newest-first: boundary detection assumes that once a
/// whole batch is older than the time range, every later batch is too.
pub trait SiteAdapter: Send + Sync {
    fn page_type(&self) -> PageType;

    /// Recognizes the page from its raw state
    ///
    /// Returns None if the page is not of this adapter's type.
    fn classify(&self, state: &Value) -> Option<Classification>;

    /// Extracts the items and the has-next-page flag from a raw response
    fn extract_batch(&self, response: &Value) -> Result<Batch, TidemarkError>;

    /// The item's stable id; None is a hard error for the entity
    fn extract_id(&self, item: &Value) -> Option<String>;

    fn extract_timestamp(&self, item: &Value) -> Option<DateTime<Utc>>;

    /// A detail page to crawl in place of emitting the item, if any
    fn detail_target(&self, _item: &Value) -> Option<WorkItem> {
        None
    }

    /// The record describing the page itself, emitted for details results
    fn extract_details(&self, state: &Value) -> Option<Value>;
}

/// The adapters available to a run
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds JSON adapters from the `[[adapter]]` config entries
    pub fn from_config(entries: &[AdapterEntry]) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.register(Arc::new(JsonAdapter::new(entry.clone())));
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Finds the adapter recognizing a page, trying the hinted page type first
    pub fn classify(
        &self,
        state: &Value,
        hint: Option<PageType>,
    ) -> Option<(Arc<dyn SiteAdapter>, Classification)> {
        let hinted = self
            .adapters
            .iter()
            .filter(|a| Some(a.page_type()) == hint);
        let others = self
            .adapters
            .iter()
            .filter(|a| Some(a.page_type()) != hint);

        hinted.chain(others).find_map(|adapter| {
            adapter
                .classify(state)
                .map(|classification| (adapter.clone(), classification))
        })
    }
}

/// Adapter driven by JSON pointers from the config file
#[derive(Debug, Clone)]
pub struct JsonAdapter {
    entry: AdapterEntry,
}

impl JsonAdapter {
    pub fn new(entry: AdapterEntry) -> Self {
        Self { entry }
    }
}

/// Reads a string or integer as an id
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses unix seconds or an RFC 3339 string
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

impl SiteAdapter for JsonAdapter {
    fn page_type(&self) -> PageType {
        self.entry.page_type
    }

    fn classify(&self, state: &Value) -> Option<Classification> {
        state.pointer(&self.entry.detect_pointer)?;
        let entity_id = scalar_to_string(state.pointer(&self.entry.entity_pointer)?)?;
        let label = self
            .entry
            .label_pointer
            .as_ref()
            .and_then(|p| state.pointer(p))
            .and_then(scalar_to_string);

        Some(Classification {
            page_type: self.entry.page_type,
            entity_id,
            label,
        })
    }

    fn extract_batch(&self, response: &Value) -> Result<Batch, TidemarkError> {
        let items = match response.pointer(&self.entry.items_pointer) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) => Vec::new(),
            Some(item @ Value::Object(_)) => vec![item.clone()],
            Some(other) => {
                return Err(TidemarkError::Driver(format!(
                    "expected items at {}, found {}",
                    self.entry.items_pointer, other
                )))
            }
            None => {
                return Err(TidemarkError::Driver(format!(
                    "response has no items at {}",
                    self.entry.items_pointer
                )))
            }
        };

        let has_next_page = match &self.entry.has_next_pointer {
            Some(pointer) => response
                .pointer(pointer)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            None => false,
        };

        Ok(Batch {
            items,
            has_next_page,
        })
    }

    fn extract_id(&self, item: &Value) -> Option<String> {
        item.get(&self.entry.id_field).and_then(scalar_to_string)
    }

    fn extract_timestamp(&self, item: &Value) -> Option<DateTime<Utc>> {
        let field = self.entry.timestamp_field.as_ref()?;
        parse_timestamp(item.get(field)?)
    }

    fn extract_details(&self, state: &Value) -> Option<Value> {
        let pointer = self
            .entry
            .details_pointer
            .as_ref()
            .unwrap_or(&self.entry.detect_pointer);
        match state.pointer(pointer)? {
            details @ Value::Object(_) => Some(details.clone()),
            _ => None,
        }
    }

    fn detail_target(&self, item: &Value) -> Option<WorkItem> {
        let template = self.entry.detail_url_template.as_ref()?;
        let id = self.extract_id(item)?;
        Some(
            WorkItem::new(template.replace("{id}", &id))
                .with_hint(PageType::Post)
                .with_label(id),
        )
    }
}
