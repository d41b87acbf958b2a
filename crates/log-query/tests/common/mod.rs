//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use loghub_log_query::backends::MemoryStorage;
use loghub_log_query::error::BackendError;
use loghub_log_query::{
    BoxedIterator, DynStorage, LogItem, LogIterator, LogStorage, QueryContext, QueryResult,
    Selector,
};

pub const SEC: i64 = 1_000_000_000;
pub const HOUR: i64 = 3600 * SEC;
/// Fixed "now" used by service tests.
pub const NOW: i64 = 2_000 * HOUR;

/// A container line at `ts` with `offset`.
pub fn line(id: &str, ts: i64, offset: i64) -> LogItem {
    LogItem::new(id, ts, offset, format!("{}@{}:{}", id, ts, offset))
        .with_source("container")
        .with_stream("stdout")
}

/// An in-memory store holding `items`.
pub fn memory(name: &str, items: Vec<LogItem>) -> DynStorage {
    Arc::new(MemoryStorage::with_items(name, items))
}

/// A store whose iterator creation always fails.
pub struct FailingStorage {
    name: String,
    pub calls: AtomicUsize,
}

impl FailingStorage {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStorage for FailingStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn iterator(&self, _ctx: &QueryContext, _sel: &Selector) -> QueryResult<BoxedIterator> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Unavailable {
            backend_name: self.name.clone(),
            message: "connection refused".to_string(),
        }
        .into())
    }
}

/// Positions yielded by walking `it` forward to the end.
pub async fn drain_forward(it: &mut dyn LogIterator) -> Vec<(i64, i64)> {
    let mut out = Vec::new();
    while it.next().await {
        let item = it.value().expect("value after successful next");
        out.push((item.unix_nano, item.offset));
    }
    out
}

/// Positions yielded by walking `it` backward to the start.
pub async fn drain_backward(it: &mut dyn LogIterator) -> Vec<(i64, i64)> {
    let mut out = Vec::new();
    while it.prev().await {
        let item = it.value().expect("value after successful prev");
        out.push((item.unix_nano, item.offset));
    }
    out
}
