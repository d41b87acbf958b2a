//! Shared paging engine for persisted backends.
//!
//! A [`PageFetcher`] owns the backend cursor and returns one page per call,
//! already ordered in the requested direction. [`PagedIterator`] buffers the
//! page, hands items out one by one, applies the return-field projection and
//! asks for the next page once the buffer runs dry.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{Direction, IterState, LogIterator, TotalCounter};
use crate::error::{BackendError, QueryError, QueryResult};
use crate::types::{LogItem, ReturnFields};

/// One page of items in traversal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items of this page.
    pub items: Vec<LogItem>,
    /// Whether another fetch may return more items. An empty page with
    /// `more` set is followed by another fetch.
    pub more: bool,
}

impl Page {
    /// Builds a page, inferring `more` from a full page.
    pub fn from_items(items: Vec<LogItem>, page_size: usize) -> Self {
        let more = !items.is_empty() && items.len() >= page_size;
        Self { items, more }
    }
}

/// Backend side of a paged iterator.
#[async_trait]
pub trait PageFetcher: Send {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Moves the cursor back to the boundary the direction starts from.
    fn reset(&mut self, direction: Direction);

    /// Fetches the page after the cursor and advances the cursor.
    async fn fetch(&mut self, direction: Direction) -> QueryResult<Page>;

    /// Whether [`PageFetcher::count`] is supported.
    fn supports_count(&self) -> bool {
        false
    }

    /// Counts all items of the query.
    async fn count(&mut self) -> QueryResult<i64> {
        Err(BackendError::UnsupportedCapability {
            backend_name: self.name().to_string(),
            capability: "count".to_string(),
        }
        .into())
    }

    /// Releases server side cursors.
    async fn release(&mut self) -> QueryResult<()> {
        Ok(())
    }
}

/// Iterator driving a [`PageFetcher`].
pub struct PagedIterator<F: PageFetcher> {
    fetcher: F,
    state: IterState,
    buffer: VecDeque<LogItem>,
    current: Option<LogItem>,
    more: bool,
    fields: ReturnFields,
}

impl<F: PageFetcher> PagedIterator<F> {
    /// Creates an iterator over `fetcher`.
    pub fn new(cancel: CancellationToken, fetcher: F, fields: ReturnFields) -> Self {
        Self {
            fetcher,
            state: IterState::new(cancel),
            buffer: VecDeque::new(),
            current: None,
            more: true,
            fields,
        }
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn rewind(&mut self, direction: Direction) {
        self.buffer.clear();
        self.current = None;
        self.more = true;
        self.fetcher.reset(direction);
    }

    async fn advance(&mut self, direction: Direction) -> bool {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.current = Some(item.project(self.fields));
                return true;
            }
            if !self.more {
                self.current = None;
                self.state.set_eof();
                return false;
            }
            match self.fetcher.fetch(direction).await {
                Ok(page) => {
                    self.more = page.more;
                    self.buffer.extend(page.items);
                }
                Err(e) => {
                    tracing::debug!(backend = %self.fetcher.name(), error = %e, "Page fetch failed");
                    self.current = None;
                    self.state.fail(e);
                    return false;
                }
            }
        }
    }
}

#[async_trait]
impl<F: PageFetcher> LogIterator for PagedIterator<F> {
    async fn first(&mut self) -> bool {
        if !self.state.begin_rewind("first", Direction::Forward) {
            return false;
        }
        self.rewind(Direction::Forward);
        self.advance(Direction::Forward).await
    }

    async fn last(&mut self) -> bool {
        if !self.state.begin_rewind("last", Direction::Backward) {
            return false;
        }
        self.rewind(Direction::Backward);
        self.advance(Direction::Backward).await
    }

    async fn next(&mut self) -> bool {
        let fresh = self.state.direction().is_none();
        if !self.state.begin("next", Direction::Forward) {
            return false;
        }
        if fresh {
            self.rewind(Direction::Forward);
        }
        self.advance(Direction::Forward).await
    }

    async fn prev(&mut self) -> bool {
        let fresh = self.state.direction().is_none();
        if !self.state.begin("prev", Direction::Backward) {
            return false;
        }
        if fresh {
            self.rewind(Direction::Backward);
        }
        self.advance(Direction::Backward).await
    }

    fn value(&self) -> Option<&LogItem> {
        self.current.as_ref()
    }

    fn error(&self) -> Option<&QueryError> {
        self.state.error()
    }

    async fn close(&mut self) -> QueryResult<()> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        self.buffer.clear();
        self.current = None;
        self.fetcher.release().await
    }

    fn as_counter(&mut self) -> Option<&mut dyn TotalCounter> {
        if self.fetcher.supports_count() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl<F: PageFetcher> TotalCounter for PagedIterator<F> {
    async fn total(&mut self) -> QueryResult<i64> {
        self.fetcher.count().await
    }
}
