//! Wide-column cold store adapter.
//!
//! The cold table is partitioned by `(source, id)` and clustered by
//! `(timestamp, offset)`, so only equality on the partition columns and the
//! time range are pushed into CQL. Every other filter is evaluated on the
//! client. Pages are chained with the driver's opaque paging state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::QueryConfig;
use crate::core::{BoxedIterator, Direction, EmptyIterator, LogStorage, QueryContext};
use crate::error::{ParameterError, QueryResult};
use crate::types::{
    Filter, LogItem, Operator, Selector, UniqueId, compare_position, format_timestamp, matches_all,
};

use super::paged::{Page, PageFetcher, PagedIterator};

const PUSHED_DOWN: [&str; 3] = ["source", "id", "stream"];

/// A prepared statement execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ColdQuery {
    /// CQL with `?` placeholders.
    pub cql: String,
    /// Bound values in placeholder order.
    pub params: Vec<Value>,
    /// Rows per page.
    pub page_size: usize,
    /// Paging state returned by the previous page.
    pub paging_state: Option<Vec<u8>>,
}

/// One page of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColdPage {
    /// Rows as JSON objects.
    pub rows: Vec<Value>,
    /// Paging state for the next page, `None` on the last page.
    pub paging_state: Option<Vec<u8>>,
}

/// Connection to a wide-column store.
#[async_trait]
pub trait ColdStoreClient: Send + Sync {
    /// Executes one page of a statement.
    async fn execute(&self, query: &ColdQuery) -> QueryResult<ColdPage>;
}

#[derive(Debug, Deserialize)]
struct ColdRow {
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
    tags: std::collections::HashMap<String, String>,
}

fn decode(row: Value) -> QueryResult<LogItem> {
    let row: ColdRow = serde_json::from_value(row)?;
    Ok(LogItem {
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
    })
}

fn is_pushed_down(filter: &Filter) -> bool {
    filter.op == Operator::Eq && PUSHED_DOWN.contains(&filter.key.as_str())
}

/// Builds the statement for a selector. The selector must name an `id`.
pub fn build_statement(
    table: &str,
    sel: &Selector,
    direction: Direction,
) -> Result<(String, Vec<Value>), ParameterError> {
    if sel.eq_filter("id").is_none() {
        return Err(ParameterError::missing("id"));
    }
    let mut conds = Vec::new();
    let mut params = Vec::new();
    for filter in sel.filters.iter().filter(|f| is_pushed_down(f)) {
        conds.push(format!("{} = ?", filter.key));
        params.push(json!(filter.value_str()));
    }
    conds.push("timestamp >= ?".to_string());
    params.push(json!(sel.start));
    conds.push("timestamp < ?".to_string());
    params.push(json!(sel.end));
    let order = match direction {
        Direction::Forward => "ASC",
        Direction::Backward => "DESC",
    };
    let cql = format!(
        "SELECT source, id, stream, timestamp, offset, content, tags FROM {} WHERE {} ORDER BY timestamp {}, offset {} ALLOW FILTERING",
        table,
        conds.join(" AND "),
        order,
        order
    );
    Ok((cql, params))
}

struct ColdFetcher {
    client: Arc<dyn ColdStoreClient>,
    table: String,
    sel: Selector,
    residual: Vec<Filter>,
    page_size: usize,
    paging_state: Option<Vec<u8>>,
    started: bool,
    to_skip: usize,
}

impl ColdFetcher {
    /// Whether `item` lies strictly beyond the selector's cursor.
    fn past_cursor(&self, item: &LogItem, direction: Direction) -> bool {
        let Some(UniqueId { timestamp, offset, .. }) = &self.sel.skip.after_id else {
            return true;
        };
        let ord = compare_position(item.unix_nano, item.offset, *timestamp, *offset);
        match direction {
            Direction::Forward => ord.is_gt(),
            Direction::Backward => ord.is_lt(),
        }
    }
}

#[async_trait]
impl PageFetcher for ColdFetcher {
    fn name(&self) -> &str {
        "cold"
    }

    fn reset(&mut self, _direction: Direction) {
        self.paging_state = None;
        self.started = false;
        self.to_skip = self.sel.skip.from_offset;
    }

    async fn fetch(&mut self, direction: Direction) -> QueryResult<Page> {
        if self.started && self.paging_state.is_none() {
            return Ok(Page::default());
        }
        let (cql, params) = build_statement(&self.table, &self.sel, direction)?;
        if self.sel.debug {
            debug!(cql = %cql, "Cold page query");
        }
        let page = self
            .client
            .execute(&ColdQuery {
                cql,
                params,
                page_size: self.page_size,
                paging_state: self.paging_state.take(),
            })
            .await?;
        self.started = true;
        self.paging_state = page.paging_state;

        let mut items = Vec::with_capacity(page.rows.len());
        for row in page.rows {
            let item = decode(row)?;
            if !self.past_cursor(&item, direction) || !matches_all(&self.residual, &item)? {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            items.push(item);
        }
        Ok(Page {
            items,
            more: self.paging_state.is_some(),
        })
    }
}

/// Storage backed by the cold tier.
pub struct ColdStorage {
    client: Arc<dyn ColdStoreClient>,
    table: String,
    page_size: usize,
}

impl ColdStorage {
    /// Creates a storage reading `table`.
    pub fn new(client: Arc<dyn ColdStoreClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            page_size: QueryConfig::default().page_size,
        }
    }

    /// Creates a storage paging with the configured page size.
    pub fn from_config(client: Arc<dyn ColdStoreClient>, table: impl Into<String>, config: &QueryConfig) -> Self {
        Self::new(client, table).with_page_size(config.page_size)
    }

    /// Sets the default page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl LogStorage for ColdStorage {
    fn name(&self) -> &str {
        "cold"
    }

    async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        if sel.eq_filter("id").is_none() {
            debug!("Cold store needs an id filter, returning no lines");
            return Ok(Box::new(EmptyIterator::with_cancel(ctx.cancel.clone())));
        }
        let residual = sel
            .filters
            .iter()
            .filter(|f| !is_pushed_down(f))
            .cloned()
            .collect();
        let fetcher = ColdFetcher {
            client: self.client.clone(),
            table: self.table.clone(),
            sel: sel.clone(),
            residual,
            page_size: sel.page_size(self.page_size),
            paging_state: None,
            started: false,
            to_skip: sel.skip.from_offset,
        };
        Ok(Box::new(PagedIterator::new(
            ctx.cancel.clone(),
            fetcher,
            sel.meta.preferred_return_fields,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogIterator;
    use crate::types::ResultSkip;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeCold {
        pages: Mutex<Vec<ColdPage>>,
        queries: Mutex<Vec<ColdQuery>>,
    }

    #[async_trait]
    impl ColdStoreClient for FakeCold {
        async fn execute(&self, query: &ColdQuery) -> QueryResult<ColdPage> {
            self.queries.lock().push(query.clone());
            let mut pages = self.pages.lock();
            Ok(if pages.is_empty() {
                ColdPage::default()
            } else {
                pages.remove(0)
            })
        }
    }

    fn row(ts: i64, content: &str) -> Value {
        json!({"id": "c1", "source": "container", "stream": "stdout", "timestamp": ts, "offset": 0, "content": content})
    }

    fn selector() -> Selector {
        Selector::new(0, 100)
            .with_filter(Filter::eq("source", "container"))
            .with_filter(Filter::eq("id", "c1"))
    }

    #[test]
    fn test_statement_pushes_partition_filters() {
        let sel = selector().with_filter(Filter::contains("content", "err"));
        let (cql, params) = build_statement("base_log", &sel, Direction::Forward).unwrap();
        assert!(cql.contains("WHERE source = ? AND id = ? AND timestamp >= ? AND timestamp < ?"));
        assert!(!cql.contains("content ="));
        assert_eq!(params, vec![json!("container"), json!("c1"), json!(0), json!(100)]);
    }

    #[test]
    fn test_statement_requires_id() {
        let err = build_statement("base_log", &Selector::new(0, 1), Direction::Forward).unwrap_err();
        assert_eq!(err, ParameterError::missing("id"));
    }

    #[tokio::test]
    async fn test_paging_state_and_residual_filters() {
        let client = Arc::new(FakeCold::default());
        *client.pages.lock() = vec![
            ColdPage {
                rows: vec![row(1, "ok"), row(2, "err: disk")],
                paging_state: Some(vec![1]),
            },
            ColdPage {
                rows: vec![row(3, "fine")],
                paging_state: Some(vec![2]),
            },
            ColdPage {
                rows: vec![row(4, "err: net")],
                paging_state: None,
            },
        ];
        let storage = ColdStorage::new(client.clone(), "base_log").with_page_size(2);
        let sel = selector().with_filter(Filter::contains("content", "err"));
        let mut it = storage.iterator(&QueryContext::new(), &sel).await.unwrap();
        let mut out = Vec::new();
        while it.next().await {
            out.push(it.value().unwrap().unix_nano);
        }
        assert_eq!(out, vec![2, 4]);
        assert!(it.error().is_none());
        let queries = client.queries.lock();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[1].paging_state, Some(vec![1]));
    }

    #[tokio::test]
    async fn test_cursor_and_offset_skip() {
        let client = Arc::new(FakeCold::default());
        *client.pages.lock() = vec![ColdPage {
            rows: vec![row(1, "a"), row(2, "b"), row(3, "c"), row(4, "d")],
            paging_state: None,
        }];
        let storage = ColdStorage::new(client, "base_log");
        let mut sel = selector();
        sel.skip = ResultSkip {
            after_id: Some(UniqueId::new(1, "c1", 0)),
            from_offset: 1,
        };
        let mut it = storage.iterator(&QueryContext::new(), &sel).await.unwrap();
        let mut out = Vec::new();
        while it.next().await {
            out.push(it.value().unwrap().unix_nano);
        }
        assert_eq!(out, vec![3, 4]);
    }

    /// Without an id the scan is empty and the store is never queried.
    #[tokio::test]
    async fn test_missing_id_is_empty() {
        let client = Arc::new(FakeCold::default());
        *client.pages.lock() = vec![ColdPage {
            rows: vec![row(1, "ok")],
            paging_state: None,
        }];
        let storage = ColdStorage::new(client.clone(), "base_log");
        let mut it = storage
            .iterator(&QueryContext::new(), &Selector::new(0, 100))
            .await
            .unwrap();
        assert!(!it.next().await);
        assert!(it.error().is_none());
        assert!(client.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_uses_page_size() {
        let client = Arc::new(FakeCold::default());
        let config = QueryConfig {
            page_size: 7,
            ..Default::default()
        };
        let storage = ColdStorage::from_config(client.clone(), "base_log", &config);
        let mut it = storage.iterator(&QueryContext::new(), &selector()).await.unwrap();
        assert!(!it.next().await);
        assert_eq!(client.queries.lock()[0].page_size, 7);
    }
}
