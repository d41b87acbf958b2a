//! In-memory storage.
//!
//! Keeps items in a vector guarded by a lock. Useful for tests and local
//! development; supports iteration, aggregation and writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{
    Aggregator, BatchWriter, BoxedIterator, Direction, IterState, LogIterator, LogStorage,
    QueryContext, TotalCounter,
};
use crate::error::{QueryError, QueryResult};
use crate::types::{
    Aggregation, AggregationBucket, AggregationOptions, AggregationResponse, AggregationResult,
    LogItem, ReturnFields, Selector, UniqueId, compare_items, compare_position, matches_all,
};

/// Iterator over an ordered vector of items.
pub struct VecIterator {
    items: Vec<LogItem>,
    state: IterState,
    after: Option<UniqueId>,
    skip: usize,
    pos: Option<usize>,
    cursor: usize,
    fail: Option<QueryError>,
}

impl VecIterator {
    /// Creates an iterator over `items`, which must be in ascending order.
    pub fn new(cancel: CancellationToken, items: Vec<LogItem>) -> Self {
        Self {
            items,
            state: IterState::new(cancel),
            after: None,
            skip: 0,
            pos: None,
            cursor: 0,
            fail: None,
        }
    }

    /// Starts strictly beyond `after` in traversal order.
    pub fn with_cursor(mut self, after: Option<UniqueId>, skip: usize) -> Self {
        self.after = after;
        self.skip = skip;
        self
    }

    /// Applies a projection to yielded items.
    pub fn with_fields(mut self, fields: ReturnFields) -> Self {
        if fields != ReturnFields::All {
            self.items = std::mem::take(&mut self.items)
                .into_iter()
                .map(|item| item.project(fields))
                .collect();
        }
        self
    }

    /// Makes the first navigation fail with `err`.
    pub fn failing_with(mut self, err: QueryError) -> Self {
        self.fail = Some(err);
        self
    }

    fn rewind(&mut self, direction: Direction) {
        self.pos = None;
        let beyond = |item: &LogItem, after: &UniqueId| {
            let ord = compare_position(item.unix_nano, item.offset, after.timestamp, after.offset);
            match direction {
                Direction::Forward => ord.is_gt(),
                Direction::Backward => ord.is_lt(),
            }
        };
        let candidates: Vec<usize> = match direction {
            Direction::Forward => (0..self.items.len()).collect(),
            Direction::Backward => (0..self.items.len()).rev().collect(),
        };
        let mut skip = self.skip;
        let mut start = candidates.len();
        for (i, idx) in candidates.iter().enumerate() {
            if let Some(after) = &self.after {
                if !beyond(&self.items[*idx], after) {
                    continue;
                }
            }
            if skip > 0 {
                skip -= 1;
                continue;
            }
            start = i;
            break;
        }
        // `cursor` counts steps in traversal order
        self.cursor = start;
    }

    fn step(&mut self, direction: Direction) -> bool {
        if let Some(err) = self.fail.take() {
            self.pos = None;
            self.state.fail(err);
            return false;
        }
        if self.cursor >= self.items.len() {
            self.pos = None;
            self.state.set_eof();
            return false;
        }
        let idx = match direction {
            Direction::Forward => self.cursor,
            Direction::Backward => self.items.len() - 1 - self.cursor,
        };
        self.cursor += 1;
        self.pos = Some(idx);
        true
    }
}

#[async_trait]
impl LogIterator for VecIterator {
    async fn first(&mut self) -> bool {
        if !self.state.begin_rewind("first", Direction::Forward) {
            return false;
        }
        self.rewind(Direction::Forward);
        self.step(Direction::Forward)
    }

    async fn last(&mut self) -> bool {
        if !self.state.begin_rewind("last", Direction::Backward) {
            return false;
        }
        self.rewind(Direction::Backward);
        self.step(Direction::Backward)
    }

    async fn next(&mut self) -> bool {
        let fresh = self.state.direction().is_none();
        if !self.state.begin("next", Direction::Forward) {
            return false;
        }
        if fresh {
            self.rewind(Direction::Forward);
        }
        self.step(Direction::Forward)
    }

    async fn prev(&mut self) -> bool {
        let fresh = self.state.direction().is_none();
        if !self.state.begin("prev", Direction::Backward) {
            return false;
        }
        if fresh {
            self.rewind(Direction::Backward);
        }
        self.step(Direction::Backward)
    }

    fn value(&self) -> Option<&LogItem> {
        if self.state.is_closed() {
            return None;
        }
        self.pos.and_then(|idx| self.items.get(idx))
    }

    fn error(&self) -> Option<&QueryError> {
        self.state.error()
    }

    async fn close(&mut self) -> QueryResult<()> {
        self.state.mark_closed();
        self.pos = None;
        Ok(())
    }

    fn as_counter(&mut self) -> Option<&mut dyn TotalCounter> {
        Some(self)
    }
}

#[async_trait]
impl TotalCounter for VecIterator {
    async fn total(&mut self) -> QueryResult<i64> {
        Ok(self.items.len() as i64)
    }
}

/// Storage holding items in memory.
#[derive(Clone)]
pub struct MemoryStorage {
    name: String,
    items: Arc<RwLock<Vec<LogItem>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates a storage holding `items`.
    pub fn with_items(name: impl Into<String>, items: Vec<LogItem>) -> Self {
        let storage = Self::new(name);
        storage.insert(items);
        storage
    }

    /// Adds items.
    pub fn insert(&self, items: Vec<LogItem>) {
        let mut guard = self.items.write();
        guard.extend(items);
        guard.sort_by(compare_items);
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn select(&self, sel: &Selector) -> QueryResult<Vec<LogItem>> {
        let guard = self.items.read();
        let mut out = Vec::new();
        for item in guard.iter() {
            if item.unix_nano < sel.start || item.unix_nano >= sel.end {
                continue;
            }
            if matches_all(&sel.filters, item)? {
                out.push(item.clone());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl LogStorage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        let items = self.select(sel)?;
        Ok(Box::new(
            VecIterator::new(ctx.cancel.clone(), items)
                .with_cursor(sel.skip.after_id.clone(), sel.skip.from_offset)
                .with_fields(sel.meta.preferred_return_fields),
        ))
    }

    async fn new_writer(&self, _ctx: &QueryContext) -> QueryResult<Box<dyn BatchWriter>> {
        Ok(Box::new(MemoryWriter {
            target: self.clone(),
            pending: Vec::new(),
        }))
    }

    fn as_aggregator(&self) -> Option<&dyn Aggregator> {
        Some(self)
    }
}

#[async_trait]
impl Aggregator for MemoryStorage {
    async fn aggregate(&self, _ctx: &QueryContext, req: &Aggregation) -> QueryResult<AggregationResponse> {
        req.validate()?;
        let Some(sel) = req.selector.as_ref() else {
            return Ok(AggregationResponse::default());
        };
        let items = self.select(sel)?;
        let mut aggregations = HashMap::with_capacity(req.descriptors.len());
        for desc in &req.descriptors {
            let mut counts: Vec<(Value, i64)> = Vec::new();
            let mut bump = |key: Value| match counts.iter_mut().find(|(k, _)| *k == key) {
                Some((_, c)) => *c += 1,
                None => counts.push((key, 1)),
            };
            match &desc.options {
                AggregationOptions::Histogram(opts) => {
                    let interval = opts.interval(sel.end - sel.start);
                    for item in &items {
                        bump(Value::from(item.unix_nano - item.unix_nano.rem_euclid(interval)));
                    }
                    counts.sort_by_key(|(k, _)| k.as_i64().unwrap_or_default());
                }
                AggregationOptions::Terms(opts) => {
                    for item in &items {
                        match (item.field(&desc.field), &opts.missing) {
                            (Some(v), _) => bump(Value::from(v)),
                            (None, Some(missing)) => bump(missing.clone()),
                            (None, None) => {}
                        }
                    }
                    counts.sort_by(|a, b| b.1.cmp(&a.1));
                    if opts.size > 0 {
                        counts.truncate(opts.size);
                    }
                }
            }
            let buckets = counts
                .into_iter()
                .map(|(key, count)| AggregationBucket::new(key, count))
                .collect();
            aggregations.insert(desc.name.clone(), AggregationResult { buckets });
        }
        Ok(AggregationResponse {
            total: items.len() as i64,
            aggregations,
        })
    }
}

/// Buffered writer into a [`MemoryStorage`].
pub struct MemoryWriter {
    target: MemoryStorage,
    pending: Vec<LogItem>,
}

#[async_trait]
impl BatchWriter for MemoryWriter {
    async fn write(&mut self, items: Vec<LogItem>) -> QueryResult<usize> {
        let n = items.len();
        self.pending.extend(items);
        Ok(n)
    }

    async fn flush(&mut self) -> QueryResult<()> {
        if !self.pending.is_empty() {
            self.target.insert(std::mem::take(&mut self.pending));
        }
        Ok(())
    }

    async fn close(&mut self) -> QueryResult<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregationDescriptor, Filter, HistogramOptions, TermsOptions};

    fn storage() -> MemoryStorage {
        MemoryStorage::with_items(
            "memory",
            vec![
                LogItem::new("a", 30, 0, "three").with_stream("stderr"),
                LogItem::new("a", 10, 0, "one").with_stream("stdout"),
                LogItem::new("a", 20, 0, "two").with_stream("stdout"),
                LogItem::new("b", 20, 1, "two-b").with_stream("stdout"),
            ],
        )
    }

    async fn collect(it: &mut BoxedIterator, backward: bool) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let ok = if backward { it.prev().await } else { it.next().await };
            if !ok {
                break;
            }
            out.push(it.value().unwrap().content.clone());
        }
        out
    }

    #[tokio::test]
    async fn test_iterates_in_order() {
        let storage = storage();
        let mut it = storage
            .iterator(&QueryContext::new(), &Selector::new(0, 100))
            .await
            .unwrap();
        assert_eq!(collect(&mut it, false).await, vec!["one", "two", "two-b", "three"]);

        let mut it = storage
            .iterator(&QueryContext::new(), &Selector::new(0, 30))
            .await
            .unwrap();
        assert_eq!(collect(&mut it, true).await, vec!["two-b", "two", "one"]);
    }

    #[tokio::test]
    async fn test_filters_and_cursor() {
        let storage = storage();
        let mut sel = Selector::new(0, 100).with_filter(Filter::eq("stream", "stdout"));
        sel.skip.after_id = Some(UniqueId::new(10, "a", 0));
        let mut it = storage.iterator(&QueryContext::new(), &sel).await.unwrap();
        assert_eq!(collect(&mut it, false).await, vec!["two", "two-b"]);

        sel.skip.after_id = Some(UniqueId::new(20, "b", 1));
        let mut it = storage.iterator(&QueryContext::new(), &sel).await.unwrap();
        assert_eq!(collect(&mut it, true).await, vec!["two", "one"]);
    }

    #[tokio::test]
    async fn test_from_offset() {
        let storage = storage();
        let mut sel = Selector::new(0, 100);
        sel.skip.from_offset = 2;
        let mut it = storage.iterator(&QueryContext::new(), &sel).await.unwrap();
        assert_eq!(collect(&mut it, false).await, vec!["two-b", "three"]);
    }

    #[tokio::test]
    async fn test_writer_flushes_on_close() {
        let storage = MemoryStorage::new("memory");
        let mut writer = storage.new_writer(&QueryContext::new()).await.unwrap();
        assert_eq!(writer.write(vec![LogItem::new("a", 1, 0, "x")]).await.unwrap(), 1);
        assert!(storage.is_empty());
        writer.close().await.unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate() {
        let storage = storage();
        let req = Aggregation {
            selector: Some(Selector::new(0, 100)),
            descriptors: vec![
                AggregationDescriptor::terms("streams", "stream", TermsOptions::default()),
                AggregationDescriptor::histogram(
                    "hist",
                    "timestamp",
                    HistogramOptions {
                        fixed_interval: 20,
                        ..Default::default()
                    },
                ),
            ],
        };
        let resp = storage.aggregate(&QueryContext::new(), &req).await.unwrap();
        assert_eq!(resp.total, 4);
        let streams = &resp.aggregations["streams"].buckets;
        assert_eq!(streams[0], AggregationBucket::new("stdout", 3));
        assert_eq!(streams[1], AggregationBucket::new("stderr", 1));
        let hist = &resp.aggregations["hist"].buckets;
        assert_eq!(
            hist,
            &vec![AggregationBucket::new(0, 1), AggregationBucket::new(20, 3)]
        );
    }

    #[tokio::test]
    async fn test_vec_iterator_close_after_eof() {
        let mut it = VecIterator::new(CancellationToken::new(), vec![LogItem::new("a", 1, 0, "x")]);
        assert!(it.next().await);
        assert!(!it.next().await);
        assert!(it.error().is_none());
        it.close().await.unwrap();
        assert!(!it.next().await);
        assert!(it.error().is_some_and(QueryError::is_closed));
    }
}
