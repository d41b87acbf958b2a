//! Integration tests for the iterator contract and the merge combinators.

mod common;

use common::*;
use loghub_log_query::backends::{INITIAL_OFFSET, VecIterator};
use loghub_log_query::error::{IteratorError, QueryError};
use loghub_log_query::merge::{MergedIterator, OrderedIterator};
use loghub_log_query::split::split_selector;
use loghub_log_query::types::compare_items;
use loghub_log_query::{BoxedIterator, LogIterator, LogItem, Selector};
use tokio_util::sync::CancellationToken;

fn source(id: &str, positions: &[(i64, i64)]) -> BoxedIterator {
    let items = positions
        .iter()
        .map(|(ts, off)| line(id, *ts, *off))
        .collect();
    Box::new(VecIterator::new(CancellationToken::new(), items))
}

fn is_sorted(items: &[LogItem]) -> bool {
    items
        .windows(2)
        .all(|w| compare_items(&w[0], &w[1]).is_le())
}

// ============================================================================
// Ordering Tests
// ============================================================================

/// Merging sorted sources yields a globally sorted stream.
#[tokio::test]
async fn test_merge_is_globally_ordered() {
    let children = vec![
        source("a", &[(1, 0), (4, 0), (4, 2), (9, 0)]),
        source("b", &[(2, 0), (4, 1), (8, 0)]),
        source("c", &[(3, 0), (5, 0), (6, 0), (7, 0), (10, 0)]),
    ];
    let mut merged = MergedIterator::new(CancellationToken::new(), children);
    let mut items = Vec::new();
    while merged.next().await {
        items.push(merged.value().unwrap().clone());
    }
    assert_eq!(items.len(), 12);
    assert!(is_sorted(&items));
    assert!(merged.error().is_none());
}

/// Backward merge yields the reverse order.
#[tokio::test]
async fn test_merge_backward() {
    let children = vec![source("a", &[(1, 0), (3, 0)]), source("b", &[(2, 0), (4, 0)])];
    let mut merged = MergedIterator::new(CancellationToken::new(), children);
    assert_eq!(
        drain_backward(&mut merged).await,
        vec![(4, 0), (3, 0), (2, 0), (1, 0)]
    );
}

/// Live lines with a negative offset sort after persisted lines of the same
/// timestamp, whatever their magnitude.
#[tokio::test]
async fn test_negative_offset_sorts_last() {
    let children = vec![
        source("live", &[(5, INITIAL_OFFSET), (5, INITIAL_OFFSET + 1)]),
        source("stored", &[(5, 0), (5, 7), (6, 0)]),
    ];
    let mut merged = MergedIterator::new(CancellationToken::new(), children);
    assert_eq!(
        drain_forward(&mut merged).await,
        vec![
            (5, 0),
            (5, 7),
            (5, INITIAL_OFFSET),
            (5, INITIAL_OFFSET + 1),
            (6, 0)
        ]
    );
}

/// Equal positions keep the order of the sources.
#[tokio::test]
async fn test_ties_prefer_earlier_source() {
    let children = vec![source("first", &[(1, 0)]), source("second", &[(1, 0)])];
    let mut merged = MergedIterator::new(CancellationToken::new(), children);
    assert!(merged.next().await);
    assert_eq!(merged.value().unwrap().id, "first");
    assert!(merged.next().await);
    assert_eq!(merged.value().unwrap().id, "second");
}

// ============================================================================
// Head-Overlapped Tests
// ============================================================================

/// Items repeated by overlapping sources are emitted once.
#[tokio::test]
async fn test_head_overlapped_dedups_repeats() {
    let children = vec![
        source("c1", &[(1, 0), (2, 0), (3, 0)]),
        source("c1", &[(2, 0), (3, 0), (4, 0)]),
    ];
    let mut merged = MergedIterator::head_overlapped(CancellationToken::new(), children);
    assert_eq!(
        drain_forward(&mut merged).await,
        vec![(1, 0), (2, 0), (3, 0), (4, 0)]
    );
}

/// Different ids at the same position are not duplicates.
#[tokio::test]
async fn test_head_overlapped_keeps_distinct_ids() {
    let children = vec![source("c1", &[(1, 0)]), source("c2", &[(1, 0)])];
    let mut merged = MergedIterator::head_overlapped(CancellationToken::new(), children);
    assert_eq!(drain_forward(&mut merged).await.len(), 2);
}

// ============================================================================
// Iterator Contract Tests
// ============================================================================

/// Closing after EOF turns the silent end into a closed error.
#[tokio::test]
async fn test_closed_after_eof() {
    let mut merged = MergedIterator::new(CancellationToken::new(), vec![source("a", &[(1, 0)])]);
    assert!(merged.next().await);
    assert!(!merged.next().await);
    assert!(merged.error().is_none());

    merged.close().await.unwrap();
    assert!(!merged.next().await);
    assert!(matches!(
        merged.error(),
        Some(QueryError::Iterator(IteratorError::Closed))
    ));
    // closing twice is harmless
    assert!(merged.close().await.is_ok());
}

/// Reversing direction is rejected.
#[tokio::test]
async fn test_direction_lock() {
    let mut merged = MergedIterator::new(
        CancellationToken::new(),
        vec![source("a", &[(1, 0), (2, 0)])],
    );
    assert!(merged.next().await);
    assert!(!merged.prev().await);
    assert!(matches!(
        merged.error(),
        Some(QueryError::Iterator(IteratorError::OpNotSupported { .. }))
    ));
}

/// Cancellation is observed at the next navigation call.
#[tokio::test]
async fn test_cancellation_closes_merge() {
    let token = CancellationToken::new();
    let mut merged = MergedIterator::new(token.clone(), vec![source("a", &[(1, 0), (2, 0)])]);
    assert!(merged.next().await);
    token.cancel();
    assert!(!merged.next().await);
    assert!(merged.error().is_some_and(QueryError::is_closed));
}

/// A failing child stops the merge with its error.
#[tokio::test]
async fn test_child_error_propagates() {
    let failing: BoxedIterator = Box::new(
        VecIterator::new(CancellationToken::new(), vec![line("b", 1, 0)]).failing_with(
            loghub_log_query::error::BackendError::query_failed("b", "timeout").into(),
        ),
    );
    let mut merged = MergedIterator::new(
        CancellationToken::new(),
        vec![source("a", &[(1, 0)]), failing],
    );
    assert!(!merged.next().await);
    assert!(matches!(merged.error(), Some(QueryError::Backend(_))));
    assert!(merged.close().await.is_ok());
}

/// The merged total sums its children.
#[tokio::test]
async fn test_merged_total() {
    let mut merged = MergedIterator::new(
        CancellationToken::new(),
        vec![source("a", &[(1, 0), (2, 0)]), source("b", &[(3, 0)])],
    );
    let total = merged.as_counter().unwrap().total().await.unwrap();
    assert_eq!(total, 3);
}

// ============================================================================
// Ordered Slice Tests
// ============================================================================

/// Concatenating split slices walks the whole range in order.
#[tokio::test]
async fn test_ordered_over_split_slices() {
    let all: Vec<LogItem> = (0..24).map(|h| line("c1", h * HOUR, 0)).collect();
    let sel = Selector::new(0, 24 * HOUR);
    let slices = split_selector(&sel, HOUR, 2.0, 4);
    assert_eq!(slices.len(), 4);

    let children = slices
        .iter()
        .map(|s| {
            let items = all
                .iter()
                .filter(|i| i.unix_nano >= s.start && i.unix_nano < s.end)
                .cloned()
                .collect();
            Box::new(VecIterator::new(CancellationToken::new(), items)) as BoxedIterator
        })
        .collect();
    let mut ordered = OrderedIterator::new(CancellationToken::new(), children);
    let forward = drain_forward(&mut ordered).await;
    assert_eq!(forward.len(), 24);
    assert_eq!(forward.first(), Some(&(0, 0)));
    assert_eq!(forward.last(), Some(&(23 * HOUR, 0)));
    assert!(forward.windows(2).all(|w| w[0] < w[1]));
}
