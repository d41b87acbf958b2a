//! LogHub Log Query Core
//!
//! This crate presents one logical, time-ordered log stream backed by several
//! physically distinct storage tiers: a columnar analytical store, a search
//! index, a wide-column cold store and the live output of running
//! containers.
//!
//! # Features
//!
//! - **Bidirectional iterators**: every backend yields a cursor that can be
//!   walked forward or backward, with a direction lock and cancellation
//! - **Ordered merge**: k-way merge of backend streams with a stable
//!   tie-break and de-duplication of overlapping windows
//! - **Routing with degradation**: a failing backend is logged and skipped
//! - **Adaptive splitting**: wide ranges are scanned newest first in
//!   geometrically growing slices
//! - **Aggregation merge**: histogram and terms buckets combined across
//!   backends
//!
//! # Architecture
//!
//! - [`types`] - Selector, filter, log item and aggregation model
//! - [`error`] - Error types for all operations
//! - [`core`] - Iterator contract and storage traits
//! - [`backends`] - Adapters for every storage tier
//! - [`merge`] - Merged and ordered iterators, merged aggregator
//! - [`split`] - Time-range splitter
//! - [`router`] - Backend selection and fallback chain
//! - [`service`] - Request handling, streaming and downloads
//! - [`config`] - Configuration and logging setup
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use loghub_log_query::backends::MemoryStorage;
//! use loghub_log_query::service::{GetLogRequest, LogQueryService};
//! use loghub_log_query::{BackendRouter, QueryConfig, QueryContext};
//! use loghub_log_query::types::LogItem;
//!
//! # async fn run() -> loghub_log_query::QueryResult<()> {
//! let columnar = MemoryStorage::with_items(
//!     "columnar",
//!     vec![LogItem::new("container-1", 1_700_000_000_000_000_000, 0, "started")],
//! );
//! let router = BackendRouter::new().with_columnar(Arc::new(columnar));
//! let service = LogQueryService::new(QueryConfig::default(), router);
//!
//! let resp = service
//!     .get_log(
//!         &QueryContext::new(),
//!         &GetLogRequest {
//!             id: "container-1".to_string(),
//!             count: -50,
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! for line in resp.lines {
//!     println!("{} {}", line.timestamp, line.content);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod merge;
pub mod router;
pub mod service;
pub mod split;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{QueryConfig, init_logging};
pub use error::{QueryError, QueryResult};
pub use router::BackendRouter;
pub use service::{LogQueryService, LogSink};
pub use split::TimeSplitter;
pub use types::{Filter, LogItem, Operator, Selector, UniqueId};

// Re-export core traits
pub use core::{
    Aggregator, BackwardIterator, BoxedIterator, DynStorage, ForwardIterator, LogIterator,
    LogStorage, QueryContext, TotalCounter,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
