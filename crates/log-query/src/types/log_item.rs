//! The canonical log entry and its ordering.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use super::selector::{ReturnFields, UniqueId};

/// Prefix addressing a tag in filter keys and aggregation fields.
pub const TAG_PREFIX: &str = "tags.";

/// One log entry as yielded by any backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    /// Source id, typically the container id.
    pub id: String,
    /// Source kind, e.g. `container` or `job`.
    pub source: String,
    /// `stdout` or `stderr`.
    pub stream: String,
    /// RFC 3339 rendering of `unix_nano`.
    pub timestamp: String,
    /// Timestamp in nanoseconds.
    pub unix_nano: i64,
    /// Raw line content.
    pub content: String,
    /// Per-entry tags.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Position within the source.
    pub offset: i64,
    /// Highlight fragments by field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<HashMap<String, Vec<String>>>,
    /// Backend composite id, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

impl LogItem {
    /// Creates an item, rendering the timestamp string from `unix_nano`.
    pub fn new(id: impl Into<String>, unix_nano: i64, offset: i64, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: format_timestamp(unix_nano),
            unix_nano,
            offset,
            content: content.into(),
            ..Default::default()
        }
    }

    /// Sets the source kind.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the stream.
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Looks up a field by filter key.
    pub fn field(&self, key: &str) -> Option<&str> {
        if let Some(tag) = key.strip_prefix(TAG_PREFIX) {
            return self.tags.get(tag).map(String::as_str);
        }
        match key {
            "id" => Some(&self.id),
            "source" => Some(&self.source),
            "stream" => Some(&self.stream),
            "content" => Some(&self.content),
            "timestamp" => Some(&self.timestamp),
            _ => self.tags.get(key).map(String::as_str),
        }
    }

    /// The pagination cursor pointing at this item.
    pub fn cursor(&self) -> UniqueId {
        UniqueId::new(self.unix_nano, self.id.clone(), self.offset)
    }

    /// Applies a return-field projection.
    pub fn project(mut self, fields: ReturnFields) -> Self {
        match fields {
            ReturnFields::All => {}
            ReturnFields::ExcludeTags => {
                self.tags.clear();
            }
            ReturnFields::OnlyIdContent => {
                self.tags.clear();
                self.source.clear();
                self.stream.clear();
                self.highlight = None;
            }
        }
        self
    }
}

/// Renders nanoseconds as RFC 3339 with nanosecond precision.
pub fn format_timestamp(unix_nano: i64) -> String {
    DateTime::from_timestamp_nanos(unix_nano).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Total order over items by `(timestamp, offset)`.
///
/// Offsets are compared only when both share a sign class. At an equal
/// timestamp an item with a negative offset always sorts after an item with
/// a non-negative offset.
pub fn compare_items(a: &LogItem, b: &LogItem) -> Ordering {
    compare_position(a.unix_nano, a.offset, b.unix_nano, b.offset)
}

/// [`compare_items`] on bare positions.
pub fn compare_position(a_ts: i64, a_offset: i64, b_ts: i64, b_offset: i64) -> Ordering {
    match a_ts.cmp(&b_ts) {
        Ordering::Equal => {}
        other => return other,
    }
    match (a_offset < 0, b_offset < 0) {
        (false, false) | (true, true) => a_offset.cmp(&b_offset),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}
