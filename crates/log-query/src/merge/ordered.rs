//! Concatenation of iterators over adjacent, non-overlapping ranges.
//!
//! Children are given oldest range first. Forward traversal walks them in
//! order, backward traversal walks them in reverse, so the newest slice is
//! consumed first when reading backward.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{BoxedIterator, Direction, IterState, LogIterator, TotalCounter};
use crate::error::{QueryError, QueryResult};
use crate::types::LogItem;

/// Iterator over consecutive children.
pub struct OrderedIterator {
    children: Vec<BoxedIterator>,
    state: IterState,
    pos: Option<usize>,
    fresh: bool,
}

impl OrderedIterator {
    /// Creates a concatenation of `children`, oldest range first.
    pub fn new(cancel: CancellationToken, children: Vec<BoxedIterator>) -> Self {
        Self {
            children,
            state: IterState::new(cancel),
            pos: None,
            fresh: true,
        }
    }

    fn restart(&mut self, direction: Direction) {
        self.pos = match direction {
            Direction::Forward if !self.children.is_empty() => Some(0),
            Direction::Backward => self.children.len().checked_sub(1),
            Direction::Forward => None,
        };
        self.fresh = true;
    }

    async fn advance(&mut self, direction: Direction) -> bool {
        loop {
            let Some(pos) = self.pos else {
                self.state.set_eof();
                return false;
            };
            let child = &mut self.children[pos];
            let ok = match (direction, self.fresh) {
                (Direction::Forward, true) => child.first().await,
                (Direction::Forward, false) => child.next().await,
                (Direction::Backward, true) => child.last().await,
                (Direction::Backward, false) => child.prev().await,
            };
            self.fresh = false;
            if ok {
                return true;
            }
            if let Some(err) = child.error() {
                let err = err.clone();
                self.state.fail(err);
                return false;
            }
            self.fresh = true;
            self.pos = match direction {
                Direction::Forward => Some(pos + 1).filter(|p| *p < self.children.len()),
                Direction::Backward => pos.checked_sub(1),
            };
        }
    }
}

#[async_trait]
impl LogIterator for OrderedIterator {
    async fn first(&mut self) -> bool {
        if !self.state.begin_rewind("first", Direction::Forward) {
            return false;
        }
        self.restart(Direction::Forward);
        self.advance(Direction::Forward).await
    }

    async fn last(&mut self) -> bool {
        if !self.state.begin_rewind("last", Direction::Backward) {
            return false;
        }
        self.restart(Direction::Backward);
        self.advance(Direction::Backward).await
    }

    async fn next(&mut self) -> bool {
        let fresh_lock = self.state.direction().is_none();
        if !self.state.begin("next", Direction::Forward) {
            return false;
        }
        if fresh_lock {
            self.restart(Direction::Forward);
        }
        self.advance(Direction::Forward).await
    }

    async fn prev(&mut self) -> bool {
        let fresh_lock = self.state.direction().is_none();
        if !self.state.begin("prev", Direction::Backward) {
            return false;
        }
        if fresh_lock {
            self.restart(Direction::Backward);
        }
        self.advance(Direction::Backward).await
    }

    fn value(&self) -> Option<&LogItem> {
        if self.state.is_closed() || self.state.is_eof() {
            return None;
        }
        self.pos
            .and_then(|pos| self.children.get(pos))
            .and_then(|child| child.value())
    }

    fn error(&self) -> Option<&QueryError> {
        self.state.error()
    }

    async fn close(&mut self) -> QueryResult<()> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        let mut first_err = None;
        for child in &mut self.children {
            if let Err(e) = child.close().await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn as_counter(&mut self) -> Option<&mut dyn TotalCounter> {
        Some(self)
    }
}

#[async_trait]
impl TotalCounter for OrderedIterator {
    async fn total(&mut self) -> QueryResult<i64> {
        let mut total = 0;
        for child in &mut self.children {
            if let Some(counter) = child.as_counter() {
                total += counter.total().await?;
            }
        }
        Ok(total)
    }
}
