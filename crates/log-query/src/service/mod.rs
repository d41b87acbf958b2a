//! Query service: request handling on top of the router.
//!
//! [`LogQueryService`] turns capability-typed requests into selectors,
//! consults the [`BackendRouter`](crate::router::BackendRouter) and drains
//! the resulting iterator. Streaming operations push items into a
//! [`LogSink`].

pub mod download;
pub mod query;
pub mod request;
pub mod selector;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{IteratorError, QueryResult};
use crate::types::LogItem;

pub use download::{DownloadSummary, download_headers};
pub use query::{Clock, LogLines, LogPage, LogQueryService};
pub use request::{
    ByContainerIdRequest, ByContainerMetaRequest, ByExpressionRequest, DownloadRequest,
    ExpressionMeta, ExtraFilter, GetLogByExpressionRequest, GetLogByOrganizationRequest,
    GetLogByRuntimeRequest, GetLogRequest, LogAggregationRequest, Request,
};
pub use selector::{get_limit, is_recent_window, to_selector, try_fill_query_meta};

/// Receiver of streamed items.
#[async_trait]
pub trait LogSink: Send {
    /// Accepts one item. An error stops the stream.
    async fn send(&mut self, item: LogItem) -> QueryResult<()>;
}

#[async_trait]
impl LogSink for Vec<LogItem> {
    async fn send(&mut self, item: LogItem) -> QueryResult<()> {
        self.push(item);
        Ok(())
    }
}

#[async_trait]
impl LogSink for mpsc::Sender<LogItem> {
    async fn send(&mut self, item: LogItem) -> QueryResult<()> {
        mpsc::Sender::send(self, item)
            .await
            .map_err(|_| IteratorError::Closed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (mut tx, rx) = mpsc::channel(1);
        LogSink::send(&mut tx, LogItem::new("a", 1, 0, "x"))
            .await
            .unwrap();
        drop(rx);
        let err = LogSink::send(&mut tx, LogItem::new("a", 2, 0, "y"))
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
