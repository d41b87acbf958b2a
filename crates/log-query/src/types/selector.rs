//! Selector and filter model.
//!
//! A [`Selector`] describes what one query fetches: a half-open nanosecond
//! time range, conjunctive filters, query meta, a pagination cursor and free
//! form options. Selectors are built once per request and cloned whenever a
//! narrowed variant is needed; they are never mutated after being handed to
//! a backend.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParameterError, QueryResult};

use super::log_item::LogItem;

/// Option key carrying the signed requested count.
pub const SELECTOR_KEY_COUNT: &str = "count";
/// Option key carrying the live flag.
pub const IS_LIVE: &str = "live";
/// Option key requesting the full fallback chain.
pub const IS_FALLBACK: &str = "is_fallback";
/// Option key marking the first query of a live session.
pub const IS_FIRST_QUERY: &str = "is_first_query";
/// Option key carrying the container id.
pub const ID: &str = "id";
/// Option key carrying the cluster name.
pub const CLUSTER_NAME: &str = "cluster_name";
/// Option key carrying the pod namespace.
pub const POD_NAMESPACE: &str = "pod_namespace";
/// Option key carrying the pod name.
pub const POD_NAME: &str = "pod_name";
/// Option key carrying the container name.
pub const CONTAINER_NAME: &str = "container_name";

/// Scheme used for expression queries.
pub const SCHEME_ADVANCED: &str = "advanced";
/// Scheme used for container log lookups.
pub const SCHEME_CONTAINER: &str = "container";
/// Scheme used for request id lookups.
pub const SCHEME_TRACE: &str = "trace";

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Exact match.
    Eq,
    /// Regular expression match.
    Regexp,
    /// Substring match.
    Contains,
    /// Backend native expression, evaluated by the backend only.
    Expression,
}

/// A single predicate. Multiple filters in a selector are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field name. Tag fields use the `tags.` prefix.
    pub key: String,
    /// Operator.
    pub op: Operator,
    /// Operand.
    pub value: Value,
}

impl Filter {
    /// Creates a filter.
    pub fn new(key: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Creates an equality filter.
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, Operator::Eq, value)
    }

    /// Creates a substring filter.
    pub fn contains(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, Operator::Contains, value)
    }

    /// Returns the operand as a string, rendering non-string JSON values.
    pub fn value_str(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Evaluates the filter against an item on the client side.
    ///
    /// Expression filters cannot be evaluated here and always match; the
    /// backend that understands the expression is responsible for them.
    pub fn matches(&self, item: &LogItem) -> QueryResult<bool> {
        if self.op == Operator::Expression {
            return Ok(true);
        }
        let Some(field) = item.field(&self.key) else {
            return Ok(false);
        };
        let operand = self.value_str();
        Ok(match self.op {
            Operator::Eq => field == operand,
            Operator::Contains => field.contains(operand.as_str()),
            Operator::Regexp => Regex::new(&operand)?.is_match(field),
            Operator::Expression => true,
        })
    }
}

/// Evaluates all filters against an item.
pub fn matches_all(filters: &[Filter], item: &LogItem) -> QueryResult<bool> {
    for filter in filters {
        if !filter.matches(item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Preferred backend paging style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterateStyle {
    /// Backend default.
    #[default]
    Default,
    /// Keyset paging on sort values.
    SearchAfter,
    /// Server side scroll cursor.
    Scroll,
}

impl IterateStyle {
    /// Maps the wire enum value.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => IterateStyle::SearchAfter,
            2 => IterateStyle::Scroll,
            _ => IterateStyle::Default,
        }
    }
}

/// Fields returned for each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFields {
    /// Everything.
    #[default]
    All,
    /// Everything but the tag map.
    ExcludeTags,
    /// Id, timestamps, offset and content only.
    OnlyIdContent,
}

/// Query meta carried alongside the selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMeta {
    /// Organizations the query is scoped to.
    pub org_names: Vec<String>,
    /// Environment ids the query is scoped to.
    pub msp_env_ids: Vec<String>,
    /// Whether highlight fragments are requested.
    pub highlight: bool,
    /// Preferred page size. Zero means unset.
    pub preferred_buffer_size: usize,
    /// Preferred paging style.
    pub preferred_iterate_style: IterateStyle,
    /// Preferred projection.
    pub preferred_return_fields: ReturnFields,
    /// Skip computing the total count on listings.
    pub skip_total_stat: bool,
}

/// Pagination cursor identifying one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueId {
    /// Timestamp in nanoseconds.
    pub timestamp: i64,
    /// Source id.
    pub id: String,
    /// Offset within the source.
    pub offset: i64,
}

impl UniqueId {
    /// Creates a cursor.
    pub fn new(timestamp: i64, id: impl Into<String>, offset: i64) -> Self {
        Self {
            timestamp,
            id: id.into(),
            offset,
        }
    }

    /// Encodes the cursor to an opaque string.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a cursor from an opaque string.
    pub fn decode(s: &str) -> Result<Self, ParameterError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| ParameterError::invalid("after", format!("invalid cursor: {}", s)))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| ParameterError::invalid("after", format!("invalid cursor: {}", s)))
    }
}

/// Where to resume a paginated query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSkip {
    /// Resume strictly after this item.
    pub after_id: Option<UniqueId>,
    /// Skip this many leading items.
    pub from_offset: usize,
}

/// Immutable description of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Inclusive start in nanoseconds.
    pub start: i64,
    /// Exclusive end in nanoseconds.
    pub end: i64,
    /// Backend hint.
    pub scheme: String,
    /// Conjunctive filters.
    pub filters: Vec<Filter>,
    /// Query meta.
    pub meta: QueryMeta,
    /// Pagination cursor.
    pub skip: ResultSkip,
    /// Free form options.
    pub options: HashMap<String, Value>,
    /// Verbose logging for this query.
    pub debug: bool,
}

impl Selector {
    /// Creates a selector over `[start, end)`.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    /// Returns a copy narrowed to `[start, end)`.
    pub fn with_range(&self, start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            ..self.clone()
        }
    }

    /// Adds a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets an option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets the scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Returns a boolean option, false when absent or not a boolean.
    pub fn option_bool(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns a non-empty string option.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns the signed requested count, if any.
    pub fn requested_count(&self) -> Option<i64> {
        self.options.get(SELECTOR_KEY_COUNT).and_then(Value::as_i64)
    }

    /// Returns the value of the first equality filter on `key`.
    pub fn eq_filter(&self, key: &str) -> Option<String> {
        self.filters
            .iter()
            .find(|f| f.key == key && f.op == Operator::Eq)
            .map(Filter::value_str)
    }

    /// Returns the expression filter, if any.
    pub fn expression(&self) -> Option<String> {
        self.filters
            .iter()
            .find(|f| f.op == Operator::Expression)
            .map(Filter::value_str)
    }

    /// Page size for one backend round trip.
    ///
    /// The absolute requested count wins, then the preferred buffer size,
    /// then `default_size`.
    pub fn page_size(&self, default_size: usize) -> usize {
        if let Some(count) = self.requested_count() {
            if count != 0 {
                return count.unsigned_abs() as usize;
            }
        }
        if self.meta.preferred_buffer_size > 0 {
            return self.meta.preferred_buffer_size;
        }
        default_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> LogItem {
        LogItem::new("container-1", 100, 3, "GET /health 200")
            .with_source("container")
            .with_stream("stdout")
            .with_tag("dice_application_id", "42")
    }

    #[test]
    fn test_filter_matches_fields_and_tags() {
        let item = item();
        assert!(Filter::eq("id", "container-1").matches(&item).unwrap());
        assert!(Filter::eq("stream", "stdout").matches(&item).unwrap());
        assert!(Filter::eq("tags.dice_application_id", "42").matches(&item).unwrap());
        assert!(!Filter::eq("tags.missing", "42").matches(&item).unwrap());
        assert!(Filter::contains("content", "/health").matches(&item).unwrap());
        assert!(!Filter::contains("content", "POST").matches(&item).unwrap());
    }

    #[test]
    fn test_filter_numeric_operand() {
        let item = item();
        assert!(Filter::eq("tags.dice_application_id", json!(42)).matches(&item).unwrap());
    }

    #[test]
    fn test_regexp_filter() {
        let item = item();
        let filter = Filter::new("content", Operator::Regexp, r"^GET .* 2\d\d$");
        assert!(filter.matches(&item).unwrap());

        let bad = Filter::new("content", Operator::Regexp, "(");
        assert!(bad.matches(&item).is_err());
    }

    #[test]
    fn test_expression_filter_always_matches() {
        let filter = Filter::new("_", Operator::Expression, "level:ERROR");
        assert!(filter.matches(&item()).unwrap());
    }

    #[test]
    fn test_page_size_precedence() {
        let mut sel = Selector::new(0, 10);
        assert_eq!(sel.page_size(200), 200);

        sel.meta.preferred_buffer_size = 64;
        assert_eq!(sel.page_size(200), 64);

        let sel = sel.with_option(SELECTOR_KEY_COUNT, -30);
        assert_eq!(sel.page_size(200), 30);
    }

    #[test]
    fn test_with_range_keeps_everything_else() {
        let sel = Selector::new(0, 100)
            .with_scheme(SCHEME_ADVANCED)
            .with_filter(Filter::eq("id", "a"));
        let narrowed = sel.with_range(10, 20);
        assert_eq!(narrowed.start, 10);
        assert_eq!(narrowed.end, 20);
        assert_eq!(narrowed.scheme, SCHEME_ADVANCED);
        assert_eq!(narrowed.filters, sel.filters);
        assert_eq!(sel.start, 0);
    }

    #[test]
    fn test_unique_id_cursor_encoding() {
        let cursor = UniqueId::new(1_700_000_000_000_000_000, "abc", 7);
        let decoded = UniqueId::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert!(UniqueId::decode("not a cursor").is_err());
    }

    #[test]
    fn test_options() {
        let sel = Selector::new(0, 1)
            .with_option(IS_LIVE, true)
            .with_option(POD_NAME, "")
            .with_option(CONTAINER_NAME, "web");
        assert!(sel.option_bool(IS_LIVE));
        assert!(!sel.option_bool(IS_FALLBACK));
        assert_eq!(sel.option_str(POD_NAME), None);
        assert_eq!(sel.option_str(CONTAINER_NAME), Some("web"));
    }
}
