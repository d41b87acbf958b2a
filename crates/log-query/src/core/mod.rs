//! Core traits: the iterator contract and the storage capabilities.
//!
//! - [`LogIterator`] - bidirectional cursor every backend yields
//! - [`TotalCounter`] - optional total-count capability of an iterator
//! - [`LogStorage`] - opens iterators for a [`Selector`](crate::types::Selector)
//! - [`Aggregator`] - optional aggregation capability of a storage
//! - [`ForwardIterator`] / [`BackwardIterator`] - direction-typed views

pub mod iterator;
pub mod storage;
pub mod typed;

pub use crate::error::Direction;
pub use iterator::{BoxedIterator, EmptyIterator, IterState, LogIterator, TotalCounter, close_logged};
pub use storage::{Aggregator, BatchWriter, DynStorage, LogStorage, QueryContext};
pub use typed::{BackwardIterator, Directed, ForwardIterator};
