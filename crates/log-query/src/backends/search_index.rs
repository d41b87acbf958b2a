//! Search-index store adapter.
//!
//! Selectors become bool-filter JSON bodies sorted by `timestamp, offset, id`.
//! Three paging styles are supported:
//!
//! | Style | Mechanism |
//! |-------|-----------|
//! | `Default`, `SearchAfter` | `search_after` on the sort values of the last hit |
//! | `Scroll` | server side scroll context, released on close |
//!
//! `from` is only used once, to honor the selector's `from_offset`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::core::{Aggregator, BoxedIterator, Direction, LogStorage, QueryContext};
use crate::error::{BackendError, QueryResult};
use crate::types::{
    Aggregation, AggregationBucket, AggregationDescriptor, AggregationOptions, AggregationResponse,
    AggregationResult, Filter, IterateStyle, LogItem, Operator, Selector, UniqueId,
    format_timestamp,
};

use super::paged::{Page, PageFetcher, PagedIterator};

const SCROLL_KEEP_ALIVE: &str = "1m";

/// A search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Index patterns.
    pub indices: Vec<String>,
    /// Query body.
    pub body: Value,
    /// Opens a scroll context with this keep-alive.
    pub scroll: Option<String>,
}

/// One hit of a search response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Document source.
    pub source: Value,
    /// Sort values, used for `search_after`.
    pub sort: Vec<Value>,
    /// Highlight fragments.
    pub highlight: Option<HashMap<String, Vec<String>>>,
}

/// A search response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Hits in sort order.
    pub hits: Vec<SearchHit>,
    /// Total matching documents.
    pub total: i64,
    /// Scroll context, when one was requested.
    pub scroll_id: Option<String>,
    /// Raw aggregation section.
    pub aggregations: Option<Value>,
}

/// Connection to a search-index store.
#[async_trait]
pub trait SearchIndexClient: Send + Sync {
    /// Runs a search.
    async fn search(&self, req: &SearchRequest) -> QueryResult<SearchResponse>;

    /// Continues a scroll.
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> QueryResult<SearchResponse>;

    /// Releases a scroll context.
    async fn clear_scroll(&self, scroll_id: &str) -> QueryResult<()>;
}

#[derive(Debug, Deserialize)]
struct Document {
    id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    stream: String,
    timestamp: i64,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Decodes a hit into an item.
pub fn decode_hit(hit: SearchHit) -> QueryResult<LogItem> {
    let doc: Document = serde_json::from_value(hit.source)?;
    Ok(LogItem {
        timestamp: format_timestamp(doc.timestamp),
        id: doc.id,
        source: doc.source,
        stream: doc.stream,
        unix_nano: doc.timestamp,
        content: doc.content,
        tags: doc.tags,
        offset: doc.offset,
        highlight: hit.highlight,
        unique_id: (!hit.id.is_empty()).then_some(hit.id),
    })
}

fn render_filter(filter: &Filter) -> Value {
    let value = filter.value_str();
    match filter.op {
        Operator::Eq => json!({"term": {filter.key.clone(): value}}),
        Operator::Contains => json!({"match_phrase": {filter.key.clone(): value}}),
        Operator::Regexp => json!({"regexp": {filter.key.clone(): value}}),
        Operator::Expression => json!({
            "query_string": {"query": value, "default_field": "content", "default_operator": "AND"}
        }),
    }
}

/// Renders the query section of a selector.
pub fn render_query(sel: &Selector) -> Value {
    let mut filters = vec![json!({"range": {"timestamp": {"gte": sel.start, "lt": sel.end}}})];
    if !sel.meta.org_names.is_empty() {
        filters.push(json!({"terms": {"org_name": sel.meta.org_names}}));
    }
    filters.extend(sel.filters.iter().map(render_filter));
    json!({"bool": {"filter": filters}})
}

/// Renders a page body.
pub fn render_search_body(
    sel: &Selector,
    size: usize,
    from: usize,
    search_after: Option<&[Value]>,
    direction: Direction,
) -> Value {
    let order = match direction {
        Direction::Forward => "asc",
        Direction::Backward => "desc",
    };
    let mut body = Map::new();
    body.insert("query".to_string(), render_query(sel));
    body.insert(
        "sort".to_string(),
        json!([
            {"timestamp": {"order": order}},
            {"offset": {"order": order}},
            {"id": {"order": order}}
        ]),
    );
    body.insert("size".to_string(), json!(size));
    if from > 0 {
        body.insert("from".to_string(), json!(from));
    }
    if let Some(after) = search_after {
        body.insert("search_after".to_string(), Value::Array(after.to_vec()));
    }
    if sel.meta.highlight {
        body.insert(
            "highlight".to_string(),
            json!({"fields": {"content": {"fragment_size": 0}}}),
        );
    }
    Value::Object(body)
}

fn render_aggs(sel: &Selector, descriptors: &[AggregationDescriptor]) -> Value {
    let mut aggs = Map::new();
    for desc in descriptors {
        let agg = match &desc.options {
            AggregationOptions::Histogram(opts) => json!({
                "histogram": {
                    "field": desc.field,
                    "interval": opts.interval(sel.end - sel.start),
                    "min_doc_count": 0
                }
            }),
            AggregationOptions::Terms(opts) => {
                let mut terms = Map::new();
                terms.insert("field".to_string(), json!(desc.field));
                if opts.size > 0 {
                    terms.insert("size".to_string(), json!(opts.size));
                }
                if let Some(missing) = &opts.missing {
                    terms.insert("missing".to_string(), missing.clone());
                }
                json!({"terms": terms})
            }
        };
        aggs.insert(desc.name.clone(), agg);
    }
    Value::Object(aggs)
}

/// Reads `{"name": {"buckets": [{"key": .., "doc_count": ..}]}}`.
pub fn parse_aggregations(
    raw: Option<&Value>,
    descriptors: &[AggregationDescriptor],
) -> QueryResult<HashMap<String, AggregationResult>> {
    let mut out = HashMap::with_capacity(descriptors.len());
    for desc in descriptors {
        let mut buckets = Vec::new();
        let entries = raw
            .and_then(|r| r.get(&desc.name))
            .and_then(|a| a.get("buckets"))
            .and_then(Value::as_array);
        for entry in entries.into_iter().flatten() {
            let key = entry.get("key").cloned().ok_or_else(|| BackendError::Decode {
                message: format!("bucket of {} has no key", desc.name),
            })?;
            let count = entry.get("doc_count").and_then(Value::as_i64).unwrap_or(0);
            buckets.push(AggregationBucket::new(key, count));
        }
        out.insert(desc.name.clone(), AggregationResult { buckets });
    }
    Ok(out)
}

struct SearchIndexFetcher {
    client: Arc<dyn SearchIndexClient>,
    indices: Vec<String>,
    sel: Selector,
    page_size: usize,
    style: IterateStyle,
    search_after: Option<Vec<Value>>,
    from: usize,
    scroll_id: Option<String>,
    started: bool,
}

impl SearchIndexFetcher {
    fn initial_after(sel: &Selector) -> Option<Vec<Value>> {
        sel.skip
            .after_id
            .as_ref()
            .map(|UniqueId { timestamp, id, offset }| vec![json!(timestamp), json!(offset), json!(id)])
    }

    async fn drop_scroll(&mut self) -> QueryResult<()> {
        if let Some(id) = self.scroll_id.take() {
            self.client.clear_scroll(&id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for SearchIndexFetcher {
    fn name(&self) -> &str {
        "search_index"
    }

    fn reset(&mut self, _direction: Direction) {
        self.search_after = Self::initial_after(&self.sel);
        self.from = self.sel.skip.from_offset;
        self.started = false;
        if let Some(id) = self.scroll_id.take() {
            // the context expires on its own after the keep-alive
            debug!(scroll_id = %id, "Abandoning scroll on rewind");
        }
    }

    async fn fetch(&mut self, direction: Direction) -> QueryResult<Page> {
        let resp = match (&self.style, &self.scroll_id) {
            (IterateStyle::Scroll, Some(id)) => self.client.scroll(id, SCROLL_KEEP_ALIVE).await?,
            _ => {
                let body = render_search_body(
                    &self.sel,
                    self.page_size,
                    self.from,
                    self.search_after.as_deref(),
                    direction,
                );
                if self.sel.debug {
                    debug!(body = %body, "Search page query");
                }
                let scroll = (self.style == IterateStyle::Scroll && !self.started)
                    .then(|| SCROLL_KEEP_ALIVE.to_string());
                self.client
                    .search(&SearchRequest {
                        indices: self.indices.clone(),
                        body,
                        scroll,
                    })
                    .await?
            }
        };
        self.started = true;
        self.from = 0;
        if self.style == IterateStyle::Scroll {
            self.scroll_id = resp.scroll_id.clone();
        }
        if let Some(last) = resp.hits.last() {
            if !last.sort.is_empty() {
                self.search_after = Some(last.sort.clone());
            }
        }
        let items = resp
            .hits
            .into_iter()
            .map(decode_hit)
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(Page::from_items(items, self.page_size))
    }

    fn supports_count(&self) -> bool {
        true
    }

    async fn count(&mut self) -> QueryResult<i64> {
        let resp = self
            .client
            .search(&SearchRequest {
                indices: self.indices.clone(),
                body: json!({"query": render_query(&self.sel), "size": 0, "track_total_hits": true}),
                scroll: None,
            })
            .await?;
        Ok(resp.total)
    }

    async fn release(&mut self) -> QueryResult<()> {
        self.drop_scroll().await
    }
}

/// Storage backed by a search index.
pub struct SearchIndexStorage {
    client: Arc<dyn SearchIndexClient>,
    indices: Vec<String>,
    page_size: usize,
}

impl SearchIndexStorage {
    /// Creates a storage over the given index patterns.
    pub fn new(client: Arc<dyn SearchIndexClient>, indices: Vec<String>) -> Self {
        Self {
            client,
            indices,
            page_size: QueryConfig::default().page_size,
        }
    }

    /// Creates a storage paging with the configured page size.
    pub fn from_config(client: Arc<dyn SearchIndexClient>, indices: Vec<String>, config: &QueryConfig) -> Self {
        Self::new(client, indices).with_page_size(config.page_size)
    }

    /// Sets the default page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl LogStorage for SearchIndexStorage {
    fn name(&self) -> &str {
        "search_index"
    }

    async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        let fetcher = SearchIndexFetcher {
            client: self.client.clone(),
            indices: self.indices.clone(),
            sel: sel.clone(),
            page_size: sel.page_size(self.page_size),
            style: sel.meta.preferred_iterate_style,
            search_after: SearchIndexFetcher::initial_after(sel),
            from: sel.skip.from_offset,
            scroll_id: None,
            started: false,
        };
        Ok(Box::new(PagedIterator::new(
            ctx.cancel.clone(),
            fetcher,
            sel.meta.preferred_return_fields,
        )))
    }

    fn as_aggregator(&self) -> Option<&dyn Aggregator> {
        Some(self)
    }
}

#[async_trait]
impl Aggregator for SearchIndexStorage {
    async fn aggregate(&self, _ctx: &QueryContext, req: &Aggregation) -> QueryResult<AggregationResponse> {
        req.validate()?;
        let Some(sel) = req.selector.as_ref() else {
            return Ok(AggregationResponse::default());
        };
        let body = json!({
            "query": render_query(sel),
            "size": 0,
            "track_total_hits": true,
            "aggs": render_aggs(sel, &req.descriptors),
        });
        let resp = self
            .client
            .search(&SearchRequest {
                indices: self.indices.clone(),
                body,
                scroll: None,
            })
            .await?;
        let aggregations = parse_aggregations(resp.aggregations.as_ref(), &req.descriptors)
            .inspect_err(|e| warn!(error = %e, "Malformed aggregation response"))?;
        Ok(AggregationResponse {
            total: resp.total,
            aggregations,
        })
    }
}
