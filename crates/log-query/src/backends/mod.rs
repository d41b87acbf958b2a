//! Backend adapters.
//!
//! Each adapter translates a storage tier's native paging into the
//! [`LogIterator`](crate::core::LogIterator) contract.
//!
//! | Adapter | Tier | Paging |
//! |---------|------|--------|
//! | [`columnar`] | columnar analytical store | keyset on `(timestamp, offset)` |
//! | [`search_index`] | search index | `search_after` or scroll |
//! | [`cold`] | wide-column cold store | driver paging state |
//! | [`live_tail`] | running containers | time windows |
//! | [`memory`] | in-process | vector index |
//!
//! The persisted adapters share the [`paged`] engine. Network clients sit
//! behind small traits (`ColumnarClient`, `SearchIndexClient`,
//! `ColdStoreClient`, `LiveLogSource`) so that any driver can be plugged in.

pub mod cold;
pub mod columnar;
pub mod live_tail;
pub mod memory;
pub mod paged;
pub mod search_index;

pub use cold::{ColdPage, ColdQuery, ColdStorage, ColdStoreClient};
pub use columnar::{ColumnarClient, ColumnarStorage};
pub use live_tail::{ContainerTarget, INITIAL_OFFSET, LiveLogSource, LiveTailIterator, LiveTailStorage};
pub use memory::{MemoryStorage, MemoryWriter, VecIterator};
pub use paged::{Page, PageFetcher, PagedIterator};
pub use search_index::{SearchHit, SearchIndexClient, SearchIndexStorage, SearchRequest, SearchResponse};
