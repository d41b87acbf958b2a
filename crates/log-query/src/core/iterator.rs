//! The bidirectional iterator contract.
//!
//! Every backend adapter and every combinator implements [`LogIterator`].
//! An iterator is a small state machine:
//!
//! ```text
//!            next/first               prev/last
//! Initial ──────────────▶ Forward   Initial ──────────────▶ Backward
//!    │                       │                                  │
//!    └──────── close / cancellation ─────────▶ Closed ◀─────────┘
//! ```
//!
//! - The first `next`/`first` call locks the iterator forward, the first
//!   `prev`/`last` call locks it backward. The opposite direction afterwards
//!   returns `false` and records [`IteratorError::OpNotSupported`].
//! - Exhaustion returns `false` with no error.
//! - After `close` (or once the query's cancellation token fires) every
//!   navigation call returns `false` and `error()` yields
//!   [`IteratorError::Closed`]. `close` is idempotent.
//!
//! Implementations share this bookkeeping through [`IterState`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Direction, IteratorError, QueryError, QueryResult};
use crate::types::LogItem;

/// A boxed iterator, as handed out by storages.
pub type BoxedIterator = Box<dyn LogIterator>;

/// Cursor over one ordered stream of log items.
///
/// Not safe for concurrent use. Owners must call [`LogIterator::close`] on
/// every exit path.
#[async_trait]
pub trait LogIterator: Send {
    /// Positions on the oldest item. Locks the iterator forward.
    async fn first(&mut self) -> bool;

    /// Positions on the newest item. Locks the iterator backward.
    async fn last(&mut self) -> bool;

    /// Advances to the next newer item.
    async fn next(&mut self) -> bool;

    /// Advances to the next older item.
    async fn prev(&mut self) -> bool;

    /// The current item, valid after a navigation call returned `true`.
    fn value(&self) -> Option<&LogItem>;

    /// The error that stopped iteration. `None` at end of stream.
    fn error(&self) -> Option<&QueryError>;

    /// Releases backend resources.
    async fn close(&mut self) -> QueryResult<()>;

    /// Total count capability, if this iterator can report one.
    fn as_counter(&mut self) -> Option<&mut dyn TotalCounter> {
        None
    }
}

/// Optional capability: count of all items matching the iterator's query.
#[async_trait]
pub trait TotalCounter: Send {
    /// Counts matching items, independent of the iteration position.
    async fn total(&mut self) -> QueryResult<i64>;
}

/// Direction lock, close flag and error bookkeeping shared by iterators.
#[derive(Debug, Clone)]
pub struct IterState {
    direction: Option<Direction>,
    closed: bool,
    eof: bool,
    err: Option<QueryError>,
    cancel: CancellationToken,
}

impl IterState {
    /// Creates a state observing `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            direction: None,
            closed: false,
            eof: false,
            err: None,
            cancel,
        }
    }

    /// Entry check for a navigation call.
    ///
    /// Returns `false` when the call must return `false` immediately:
    /// the iterator is closed or canceled, the direction contradicts the
    /// lock, a previous error stopped it, or the stream is exhausted.
    pub fn begin(&mut self, operation: &'static str, direction: Direction) -> bool {
        if self.closed {
            return false;
        }
        if self.cancel.is_cancelled() {
            self.mark_closed();
            return false;
        }
        match self.direction {
            None => self.direction = Some(direction),
            Some(locked) if locked != direction => {
                self.err = Some(
                    IteratorError::OpNotSupported {
                        operation,
                        direction: locked,
                    }
                    .into(),
                );
                return false;
            }
            Some(_) => {}
        }
        self.err.is_none() && !self.eof
    }

    /// Entry check for `first`/`last`, which restart from the boundary.
    pub fn begin_rewind(&mut self, operation: &'static str, direction: Direction) -> bool {
        if self.closed || self.cancel.is_cancelled() {
            return self.begin(operation, direction);
        }
        if matches!(self.direction, Some(locked) if locked != direction) {
            return self.begin(operation, direction);
        }
        self.eof = false;
        if !matches!(self.err, Some(QueryError::Iterator(_))) {
            self.err = None;
        }
        self.begin(operation, direction)
    }

    /// Locked direction, if any.
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Marks the stream exhausted.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Returns true once the stream is exhausted.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Records an error that stops iteration.
    pub fn fail(&mut self, err: impl Into<QueryError>) {
        self.err = Some(err.into());
    }

    /// Marks the iterator closed. Returns `false` if it already was.
    pub fn mark_closed(&mut self) -> bool {
        let first = !self.closed;
        self.closed = true;
        self.err = Some(IteratorError::Closed.into());
        first
    }

    /// Returns true once closed or canceled.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The recorded error.
    pub fn error(&self) -> Option<&QueryError> {
        self.err.as_ref()
    }

    /// The cancellation token observed by this iterator.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// An iterator with no items.
#[derive(Debug)]
pub struct EmptyIterator {
    state: IterState,
}

impl EmptyIterator {
    /// Creates an empty iterator that never observes cancellation.
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    /// Creates an empty iterator bound to `cancel`.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            state: IterState::new(cancel),
        }
    }

    fn step(&mut self, operation: &'static str, direction: Direction) -> bool {
        if self.state.begin(operation, direction) {
            self.state.set_eof();
        }
        false
    }
}

impl Default for EmptyIterator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogIterator for EmptyIterator {
    async fn first(&mut self) -> bool {
        self.step("first", Direction::Forward)
    }

    async fn last(&mut self) -> bool {
        self.step("last", Direction::Backward)
    }

    async fn next(&mut self) -> bool {
        self.step("next", Direction::Forward)
    }

    async fn prev(&mut self) -> bool {
        self.step("prev", Direction::Backward)
    }

    fn value(&self) -> Option<&LogItem> {
        None
    }

    fn error(&self) -> Option<&QueryError> {
        self.state.error()
    }

    async fn close(&mut self) -> QueryResult<()> {
        self.state.mark_closed();
        Ok(())
    }

    fn as_counter(&mut self) -> Option<&mut dyn TotalCounter> {
        Some(self)
    }
}

#[async_trait]
impl TotalCounter for EmptyIterator {
    async fn total(&mut self) -> QueryResult<i64> {
        Ok(0)
    }
}

/// Closes an iterator on an exit path, logging instead of propagating.
pub async fn close_logged(iter: &mut dyn LogIterator) {
    if let Err(e) = iter.close().await {
        warn!(error = %e, "Failed to close iterator");
    }
}
