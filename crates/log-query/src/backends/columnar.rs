//! Columnar analytical store adapter.
//!
//! Selectors are rendered to SQL against a wide log table:
//!
//! ```text
//! SELECT id, source, stream, timestamp, offset, content, tags
//! FROM logs
//! WHERE timestamp >= 1700000000000000000 AND timestamp < 1700000060000000000
//!   AND id = 'abc' AND position(content, 'error') > 0
//! ORDER BY timestamp ASC, offset ASC, id ASC
//! LIMIT 200
//! ```
//!
//! Paging is keyset based on `(timestamp, offset, id)`. Rows come back as JSON
//! objects and are decoded into [`LogItem`]s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::QueryConfig;
use crate::core::{Aggregator, BoxedIterator, Direction, LogStorage, QueryContext};
use crate::error::QueryResult;
use crate::types::{
    Aggregation, AggregationBucket, AggregationDescriptor, AggregationOptions, AggregationResponse,
    AggregationResult, Filter, LogItem, Operator, Selector, TAG_PREFIX, UniqueId, format_timestamp,
};

use super::paged::{Page, PageFetcher, PagedIterator};

/// Connection to a columnar store.
#[async_trait]
pub trait ColumnarClient: Send + Sync {
    /// Runs a row query. Each row is a JSON object.
    async fn query(&self, sql: &str) -> QueryResult<Vec<Value>>;

    /// Runs a `count()` query.
    async fn count(&self, sql: &str) -> QueryResult<i64>;

    /// Runs a bucket query returning `key` and `count` columns.
    async fn buckets(&self, sql: &str) -> QueryResult<Vec<AggregationBucket>>;
}

#[derive(Debug, Deserialize)]
struct Row {
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

impl From<Row> for LogItem {
    fn from(row: Row) -> Self {
        LogItem {
            timestamp: format_timestamp(row.timestamp),
            id: row.id,
            source: row.source,
            stream: row.stream,
            unix_nano: row.timestamp,
            content: row.content,
            tags: row.tags,
            offset: row.offset,
            highlight: None,
            unique_id: None,
        }
    }
}

/// Decodes one result row.
pub fn decode_row(row: Value) -> QueryResult<LogItem> {
    let row: Row = serde_json::from_value(row)?;
    Ok(row.into())
}

/// Quotes a string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn column(key: &str) -> String {
    match key.strip_prefix(TAG_PREFIX) {
        Some(tag) => format!("tags[{}]", quote(tag)),
        None => key.to_string(),
    }
}

fn render_filter(filter: &Filter) -> String {
    let value = filter.value_str();
    match filter.op {
        Operator::Eq => format!("{} = {}", column(&filter.key), quote(&value)),
        Operator::Contains => format!("position({}, {}) > 0", column(&filter.key), quote(&value)),
        Operator::Regexp => format!("match({}, {})", column(&filter.key), quote(&value)),
        Operator::Expression => format!("({})", value),
    }
}

/// Renders the `WHERE` clause of a selector, without paging conditions.
pub fn where_clause(sel: &Selector) -> Vec<String> {
    let mut conds = vec![
        format!("timestamp >= {}", sel.start),
        format!("timestamp < {}", sel.end),
    ];
    if !sel.meta.org_names.is_empty() {
        let orgs: Vec<String> = sel.meta.org_names.iter().map(|o| quote(o)).collect();
        conds.push(format!("org_name IN ({})", orgs.join(", ")));
    }
    conds.extend(sel.filters.iter().map(render_filter));
    conds
}

fn keyset(cursor: &UniqueId, direction: Direction) -> String {
    let op = match direction {
        Direction::Forward => ">",
        Direction::Backward => "<",
    };
    format!(
        "(timestamp {op} {ts} OR (timestamp = {ts} AND (offset {op} {off} OR (offset = {off} AND id {op} {id}))))",
        op = op,
        ts = cursor.timestamp,
        off = cursor.offset,
        id = quote(&cursor.id)
    )
}

/// Renders one page query.
pub fn render_page_query(
    table: &str,
    sel: &Selector,
    cursor: Option<&UniqueId>,
    skip: usize,
    limit: usize,
    direction: Direction,
) -> String {
    let mut conds = where_clause(sel);
    if let Some(cursor) = cursor {
        conds.push(keyset(cursor, direction));
    }
    let order = match direction {
        Direction::Forward => "ASC",
        Direction::Backward => "DESC",
    };
    let mut sql = format!(
        "SELECT id, source, stream, timestamp, offset, content, tags FROM {} WHERE {} ORDER BY timestamp {o}, offset {o}, id {o} LIMIT {}",
        table,
        conds.join(" AND "),
        limit,
        o = order
    );
    if skip > 0 {
        sql.push_str(&format!(" OFFSET {}", skip));
    }
    sql
}

/// Renders the bucket query of one descriptor.
pub fn render_aggregation(table: &str, sel: &Selector, desc: &AggregationDescriptor) -> String {
    let conds = where_clause(sel).join(" AND ");
    match &desc.options {
        AggregationOptions::Histogram(opts) => {
            let interval = opts.interval(sel.end - sel.start);
            format!(
                "SELECT intDiv(timestamp, {i}) * {i} AS key, count() AS count FROM {t} WHERE {c} GROUP BY key ORDER BY key",
                i = interval,
                t = table,
                c = conds
            )
        }
        AggregationOptions::Terms(opts) => {
            let field = match &opts.missing {
                Some(Value::String(missing)) => format!(
                    "if(empty({f}), {m}, {f})",
                    f = column(&desc.field),
                    m = quote(missing)
                ),
                Some(missing) => format!(
                    "if(empty({f}), {m}, {f})",
                    f = column(&desc.field),
                    m = quote(&missing.to_string())
                ),
                None => column(&desc.field),
            };
            let mut sql = format!(
                "SELECT {} AS key, count() AS count FROM {} WHERE {} GROUP BY key ORDER BY count DESC",
                field, table, conds
            );
            if opts.size > 0 {
                sql.push_str(&format!(" LIMIT {}", opts.size));
            }
            sql
        }
    }
}

struct ColumnarFetcher {
    client: Arc<dyn ColumnarClient>,
    table: String,
    sel: Selector,
    page_size: usize,
    cursor: Option<UniqueId>,
    skip: usize,
}

#[async_trait]
impl PageFetcher for ColumnarFetcher {
    fn name(&self) -> &str {
        "columnar"
    }

    fn reset(&mut self, _direction: Direction) {
        self.cursor = self.sel.skip.after_id.clone();
        self.skip = self.sel.skip.from_offset;
    }

    async fn fetch(&mut self, direction: Direction) -> QueryResult<Page> {
        let sql = render_page_query(
            &self.table,
            &self.sel,
            self.cursor.as_ref(),
            self.skip,
            self.page_size,
            direction,
        );
        if self.sel.debug {
            debug!(sql = %sql, "Columnar page query");
        }
        let rows = self.client.query(&sql).await?;
        let items = rows
            .into_iter()
            .map(decode_row)
            .collect::<QueryResult<Vec<_>>>()?;
        self.skip = 0;
        if let Some(last) = items.last() {
            self.cursor = Some(last.cursor());
        }
        Ok(Page::from_items(items, self.page_size))
    }

    fn supports_count(&self) -> bool {
        true
    }

    async fn count(&mut self) -> QueryResult<i64> {
        let sql = format!(
            "SELECT count() FROM {} WHERE {}",
            self.table,
            where_clause(&self.sel).join(" AND ")
        );
        self.client.count(&sql).await
    }
}

/// Storage backed by a columnar store.
pub struct ColumnarStorage {
    client: Arc<dyn ColumnarClient>,
    table: String,
    page_size: usize,
}

impl ColumnarStorage {
    /// Creates a storage reading `table`.
    pub fn new(client: Arc<dyn ColumnarClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            page_size: QueryConfig::default().page_size,
        }
    }

    /// Creates a storage paging with the configured page size.
    pub fn from_config(client: Arc<dyn ColumnarClient>, table: impl Into<String>, config: &QueryConfig) -> Self {
        Self::new(client, table).with_page_size(config.page_size)
    }

    /// Sets the default page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl LogStorage for ColumnarStorage {
    fn name(&self) -> &str {
        "columnar"
    }

    async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        let fetcher = ColumnarFetcher {
            client: self.client.clone(),
            table: self.table.clone(),
            sel: sel.clone(),
            page_size: sel.page_size(self.page_size),
            cursor: sel.skip.after_id.clone(),
            skip: sel.skip.from_offset,
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
impl Aggregator for ColumnarStorage {
    async fn aggregate(&self, _ctx: &QueryContext, req: &Aggregation) -> QueryResult<AggregationResponse> {
        req.validate()?;
        let Some(sel) = req.selector.as_ref() else {
            return Ok(AggregationResponse::default());
        };
        let total = self
            .client
            .count(&format!(
                "SELECT count() FROM {} WHERE {}",
                self.table,
                where_clause(sel).join(" AND ")
            ))
            .await?;
        let mut aggregations = HashMap::with_capacity(req.descriptors.len());
        for desc in &req.descriptors {
            let buckets = self
                .client
                .buckets(&render_aggregation(&self.table, sel, desc))
                .await?;
            aggregations.insert(desc.name.clone(), AggregationResult { buckets });
        }
        Ok(AggregationResponse {
            total,
            aggregations,
        })
    }
}
