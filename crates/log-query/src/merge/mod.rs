//! Combinators over several iterators or aggregators.
//!
//! - [`MergedIterator`] - k-way ordered merge, optionally de-duplicating
//! - [`OrderedIterator`] - concatenation of adjacent time slices
//! - [`MergedAggregator`] - fan-out aggregation with merged buckets

pub mod aggregator;
pub mod merged;
pub mod ordered;

pub use aggregator::{MergedAggregator, merge_responses};
pub use merged::{Comparer, MergedIterator};
pub use ordered::OrderedIterator;
