//! K-way ordered merge of iterators.
//!
//! Each child holds at most one buffered head inside a binary heap. A
//! navigation call pops the smallest head (largest when walking backward)
//! and refills only the child it came from on the following call.
//!
//! The head-overlapped variant drops items whose `(timestamp, id, offset)`
//! was already emitted. Duplicates can only share the timestamp of the
//! previous item, so the seen set is reset whenever the timestamp moves.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{BoxedIterator, Direction, IterState, LogIterator, TotalCounter};
use crate::error::{QueryError, QueryResult};
use crate::types::{LogItem, compare_items};

/// Ordering used to merge items.
pub type Comparer = fn(&LogItem, &LogItem) -> Ordering;

struct Head {
    item: LogItem,
    source: usize,
    direction: Direction,
    comparer: Comparer,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // BinaryHeap pops the greatest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_item = match self.direction {
            Direction::Forward => (self.comparer)(&other.item, &self.item),
            Direction::Backward => (self.comparer)(&self.item, &other.item),
        };
        by_item.then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges ordered child iterators into one ordered stream.
pub struct MergedIterator {
    children: Vec<BoxedIterator>,
    heap: BinaryHeap<Head>,
    state: IterState,
    current: Option<LogItem>,
    pending: Option<usize>,
    primed: bool,
    comparer: Comparer,
    dedup: bool,
    seen_timestamp: Option<i64>,
    seen: HashSet<(String, i64)>,
}

impl MergedIterator {
    /// Creates a merge over `children` using the default comparer.
    pub fn new(cancel: CancellationToken, children: Vec<BoxedIterator>) -> Self {
        Self {
            children,
            heap: BinaryHeap::new(),
            state: IterState::new(cancel),
            current: None,
            pending: None,
            primed: false,
            comparer: compare_items,
            dedup: false,
            seen_timestamp: None,
            seen: HashSet::new(),
        }
    }

    /// Creates a merge that drops items repeated across overlapping children.
    pub fn head_overlapped(cancel: CancellationToken, children: Vec<BoxedIterator>) -> Self {
        let mut merged = Self::new(cancel, children);
        merged.dedup = true;
        merged
    }

    /// Uses a custom comparer.
    pub fn with_comparer(mut self, comparer: Comparer) -> Self {
        self.comparer = comparer;
        self
    }

    /// Number of merged children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns true if there is nothing to merge.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Pulls one item from child `source` into the heap.
    ///
    /// Returns false if the child failed; the error is recorded.
    async fn pull(&mut self, source: usize, direction: Direction, rewind: bool) -> bool {
        let child = &mut self.children[source];
        let ok = match (direction, rewind) {
            (Direction::Forward, false) => child.next().await,
            (Direction::Forward, true) => child.first().await,
            (Direction::Backward, false) => child.prev().await,
            (Direction::Backward, true) => child.last().await,
        };
        if ok {
            if let Some(item) = child.value() {
                self.heap.push(Head {
                    item: item.clone(),
                    source,
                    direction,
                    comparer: self.comparer,
                });
            }
            return true;
        }
        if let Some(err) = child.error() {
            debug!(source, error = %err, "Merged child failed");
            let err = err.clone();
            self.state.fail(err);
            return false;
        }
        true
    }

    async fn prime(&mut self, direction: Direction, rewind: bool) -> bool {
        self.heap.clear();
        self.pending = None;
        self.seen.clear();
        self.seen_timestamp = None;
        for source in 0..self.children.len() {
            if !self.pull(source, direction, rewind).await {
                return false;
            }
        }
        self.primed = true;
        true
    }

    async fn advance(&mut self, direction: Direction, rewind: bool) -> bool {
        if rewind || !self.primed {
            if !self.prime(direction, rewind).await {
                self.current = None;
                return false;
            }
        } else if let Some(source) = self.pending.take() {
            if !self.pull(source, direction, false).await {
                self.current = None;
                return false;
            }
        }

        loop {
            let Some(head) = self.heap.pop() else {
                self.current = None;
                self.state.set_eof();
                return false;
            };
            if self.dedup && self.is_duplicate(&head.item) {
                if !self.pull(head.source, direction, false).await {
                    self.current = None;
                    return false;
                }
                continue;
            }
            self.pending = Some(head.source);
            self.current = Some(head.item);
            return true;
        }
    }

    fn is_duplicate(&mut self, item: &LogItem) -> bool {
        if self.seen_timestamp != Some(item.unix_nano) {
            self.seen_timestamp = Some(item.unix_nano);
            self.seen.clear();
        }
        !self.seen.insert((item.id.clone(), item.offset))
    }
}

#[async_trait]
impl LogIterator for MergedIterator {
    async fn first(&mut self) -> bool {
        if !self.state.begin_rewind("first", Direction::Forward) {
            return false;
        }
        self.advance(Direction::Forward, true).await
    }

    async fn last(&mut self) -> bool {
        if !self.state.begin_rewind("last", Direction::Backward) {
            return false;
        }
        self.advance(Direction::Backward, true).await
    }

    async fn next(&mut self) -> bool {
        if !self.state.begin("next", Direction::Forward) {
            return false;
        }
        self.advance(Direction::Forward, false).await
    }

    async fn prev(&mut self) -> bool {
        if !self.state.begin("prev", Direction::Backward) {
            return false;
        }
        self.advance(Direction::Backward, false).await
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
        self.heap.clear();
        self.current = None;
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
impl TotalCounter for MergedIterator {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::VecIterator;
    use crate::error::{BackendError, IteratorError};

    fn items(id: &str, positions: &[(i64, i64)]) -> BoxedIterator {
        let items = positions
            .iter()
            .map(|(ts, off)| LogItem::new(id, *ts, *off, format!("{}-{}-{}", id, ts, off)))
            .collect();
        Box::new(VecIterator::new(CancellationToken::new(), items))
    }

    async fn drain_forward(it: &mut MergedIterator) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        while it.next().await {
            let v = it.value().unwrap();
            out.push((v.unix_nano, v.offset));
        }
        out
    }

    #[tokio::test]
    async fn test_merge_forward_is_ordered() {
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![
                items("a", &[(1, 0), (4, 0), (7, 0)]),
                items("b", &[(2, 0), (4, 1), (9, 0)]),
                items("c", &[(3, 0)]),
            ],
        );
        assert_eq!(
            drain_forward(&mut it).await,
            vec![(1, 0), (2, 0), (3, 0), (4, 0), (4, 1), (7, 0), (9, 0)]
        );
        assert!(it.error().is_none());
        it.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_backward_is_reverse_ordered() {
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![items("a", &[(1, 0), (5, 0)]), items("b", &[(3, 0), (6, 0)])],
        );
        let mut out = Vec::new();
        while it.prev().await {
            out.push(it.value().unwrap().unix_nano);
        }
        assert_eq!(out, vec![6, 5, 3, 1]);
    }

    #[tokio::test]
    async fn test_negative_offset_merged_after_non_negative() {
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![items("live", &[(5, -10)]), items("hot", &[(5, 3)])],
        );
        assert_eq!(drain_forward(&mut it).await, vec![(5, 3), (5, -10)]);
    }

    #[tokio::test]
    async fn test_head_overlapped_drops_duplicates() {
        let mut it = MergedIterator::head_overlapped(
            CancellationToken::new(),
            vec![
                items("a", &[(1, 0), (2, 0), (3, 0)]),
                items("a", &[(3, 0), (4, 0)]),
            ],
        );
        assert_eq!(
            drain_forward(&mut it).await,
            vec![(1, 0), (2, 0), (3, 0), (4, 0)]
        );
    }

    #[tokio::test]
    async fn test_plain_merge_keeps_duplicates() {
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![items("a", &[(3, 0)]), items("a", &[(3, 0)])],
        );
        assert_eq!(drain_forward(&mut it).await.len(), 2);
    }

    #[tokio::test]
    async fn test_direction_lock_and_close() {
        let mut it = MergedIterator::new(CancellationToken::new(), vec![items("a", &[(1, 0)])]);
        assert!(it.next().await);
        assert!(!it.prev().await);
        assert!(matches!(
            it.error(),
            Some(QueryError::Iterator(IteratorError::OpNotSupported { .. }))
        ));
        it.close().await.unwrap();
        assert!(it.close().await.is_ok());
        assert!(!it.next().await);
        assert!(it.error().is_some_and(QueryError::is_closed));
    }

    #[tokio::test]
    async fn test_child_error_propagates() {
        let failing = VecIterator::new(CancellationToken::new(), vec![])
            .failing_with(BackendError::query_failed("es", "boom").into());
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![items("a", &[(1, 0)]), Box::new(failing)],
        );
        assert!(!it.next().await);
        assert!(matches!(it.error(), Some(QueryError::Backend(_))));
    }

    #[tokio::test]
    async fn test_first_restarts() {
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![items("a", &[(1, 0), (2, 0)]), items("b", &[(3, 0)])],
        );
        assert_eq!(drain_forward(&mut it).await.len(), 3);
        assert!(it.first().await);
        assert_eq!(it.value().unwrap().unix_nano, 1);
    }

    #[tokio::test]
    async fn test_total_sums_children() {
        let mut it = MergedIterator::new(
            CancellationToken::new(),
            vec![items("a", &[(1, 0), (2, 0)]), items("b", &[(3, 0)])],
        );
        let total = it.as_counter().unwrap().total().await.unwrap();
        assert_eq!(total, 3);
    }
}
