//! Storage traits every backend collaborator implements.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, QueryResult};
use crate::types::{Aggregation, AggregationResponse, LogItem, Selector};

use super::iterator::BoxedIterator;

/// Per-query context: cancellation and the calling organization.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// Fires when the caller gives up on the query.
    pub cancel: CancellationToken,
    /// Organization of the caller, used to scope queries.
    pub org: Option<String>,
}

impl QueryContext {
    /// Creates a context with a fresh token and no organization.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the caller organization.
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    /// Uses an existing cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A context canceled together with this one, cancelable on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            org: self.org.clone(),
        }
    }

    /// Returns true once the caller canceled the query.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A log store that can be iterated.
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Opens an iterator over the items selected by `sel`.
    async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator>;

    /// Opens a batch writer. Read-only stores keep the default.
    async fn new_writer(&self, _ctx: &QueryContext) -> QueryResult<Box<dyn BatchWriter>> {
        Err(BackendError::UnsupportedCapability {
            backend_name: self.name().to_string(),
            capability: "write".to_string(),
        }
        .into())
    }

    /// Aggregation capability, if this store has one.
    fn as_aggregator(&self) -> Option<&dyn Aggregator> {
        None
    }
}

/// Optional capability: bucketed aggregation.
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Computes every descriptor of `req`.
    async fn aggregate(&self, ctx: &QueryContext, req: &Aggregation) -> QueryResult<AggregationResponse>;
}

/// Write handle for a store.
#[async_trait]
pub trait BatchWriter: Send {
    /// Buffers items. Returns how many were accepted.
    async fn write(&mut self, items: Vec<LogItem>) -> QueryResult<usize>;

    /// Flushes buffered items.
    async fn flush(&mut self) -> QueryResult<()>;

    /// Flushes and releases the writer.
    async fn close(&mut self) -> QueryResult<()>;
}

/// Shared, dynamically dispatched storage.
pub type DynStorage = Arc<dyn LogStorage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_context_follows_parent() {
        let parent = QueryContext::new().with_org("acme");
        let child = parent.child();
        assert_eq!(child.org.as_deref(), Some("acme"));
        assert!(!child.is_cancelled());
        parent.cancel.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = QueryContext::new();
        let child = parent.child();
        child.cancel.cancel();
        assert!(!parent.is_cancelled());
    }
}
