//! Backend routing and the fallback chain.
//!
//! The router decides which tiers a selector is sent to and stitches the
//! resulting iterators into one stream.
//!
//! # Routing Rules
//!
//! - `advanced` scheme → columnar and search index, merged
//! - live flag → live tail only; missing container identifiers give an
//!   empty stream
//! - `is_fallback` option → columnar, search index, cold and live tail, in
//!   that priority order
//! - Default → columnar and search index, plus the cold tier when the
//!   selector starts before the cold boundary
//!
//! A candidate whose iterator cannot be created is logged and skipped. Only
//! when every candidate fails is an error returned.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backends::ContainerTarget;
use crate::config::{QueryConfig, nanos};
use crate::core::{BoxedIterator, DynStorage, EmptyIterator, QueryContext};
use crate::error::{AggregationError, BackendError, QueryError, QueryResult};
use crate::merge::{MergedAggregator, MergedIterator};
use crate::types::{IS_FALLBACK, IS_LIVE, SCHEME_ADVANCED, Selector};

/// Storage tier a backend serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Columnar analytical store.
    Columnar,
    /// Search index.
    SearchIndex,
    /// Wide-column cold store.
    Cold,
    /// Live container tail.
    Live,
}

impl Tier {
    /// Returns the tier name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Columnar => "columnar",
            Tier::SearchIndex => "search_index",
            Tier::Cold => "cold",
            Tier::Live => "live",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of routing a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Nothing to read. Not an error.
    Empty,
    /// Tiers to consult, in priority order.
    Tiers(Vec<Tier>),
}

/// Chooses backends for a selector and merges their iterators.
#[derive(Clone, Default)]
pub struct BackendRouter {
    columnar: Option<DynStorage>,
    search_index: Option<DynStorage>,
    cold: Option<DynStorage>,
    live: Option<DynStorage>,
    cold_boundary: i64,
}

impl fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |s: &Option<DynStorage>| s.as_ref().map(|s| s.name().to_string());
        f.debug_struct("BackendRouter")
            .field("columnar", &name(&self.columnar))
            .field("search_index", &name(&self.search_index))
            .field("cold", &name(&self.cold))
            .field("live", &name(&self.live))
            .field("cold_boundary", &self.cold_boundary)
            .finish()
    }
}

impl BackendRouter {
    /// Creates a router with no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the columnar store.
    pub fn with_columnar(mut self, storage: DynStorage) -> Self {
        self.columnar = Some(storage);
        self
    }

    /// Sets the search index.
    pub fn with_search_index(mut self, storage: DynStorage) -> Self {
        self.search_index = Some(storage);
        self
    }

    /// Sets the cold store.
    pub fn with_cold(mut self, storage: DynStorage) -> Self {
        self.cold = Some(storage);
        self
    }

    /// Sets the live tail source.
    pub fn with_live(mut self, storage: DynStorage) -> Self {
        self.live = Some(storage);
        self
    }

    /// Sets the timestamp before which data lives in the cold tier only.
    pub fn with_cold_boundary(mut self, boundary: i64) -> Self {
        self.cold_boundary = boundary;
        self
    }

    /// Sets the cold boundary to `now - retention`.
    pub fn with_hot_retention(self, now: i64, retention: Duration) -> Self {
        self.with_cold_boundary(now.saturating_sub(nanos(retention)).max(0))
    }

    /// Applies the retention settings of `config`.
    pub fn configured(self, config: &QueryConfig, now: i64) -> Self {
        self.with_hot_retention(now, config.hot_retention)
    }

    /// The cold boundary in nanoseconds.
    pub fn cold_boundary(&self) -> i64 {
        self.cold_boundary
    }

    /// The storage serving `tier`, if configured.
    pub fn storage(&self, tier: Tier) -> Option<&DynStorage> {
        match tier {
            Tier::Columnar => self.columnar.as_ref(),
            Tier::SearchIndex => self.search_index.as_ref(),
            Tier::Cold => self.cold.as_ref(),
            Tier::Live => self.live.as_ref(),
        }
    }

    /// Decides which tiers `sel` is sent to. Unconfigured tiers are dropped.
    pub fn route(&self, sel: &Selector) -> Route {
        let wanted: Vec<Tier> = if sel.scheme == SCHEME_ADVANCED {
            vec![Tier::Columnar, Tier::SearchIndex]
        } else if sel.option_bool(IS_LIVE) {
            if ContainerTarget::from_selector(sel).is_none() {
                return Route::Empty;
            }
            vec![Tier::Live]
        } else if sel.option_bool(IS_FALLBACK) {
            vec![Tier::Columnar, Tier::SearchIndex, Tier::Cold, Tier::Live]
        } else if sel.start < self.cold_boundary {
            vec![Tier::Columnar, Tier::SearchIndex, Tier::Cold]
        } else {
            vec![Tier::Columnar, Tier::SearchIndex]
        };

        let tiers: Vec<Tier> = wanted
            .into_iter()
            .filter(|t| self.storage(*t).is_some())
            .collect();
        if tiers.is_empty() {
            Route::Empty
        } else {
            Route::Tiers(tiers)
        }
    }

    /// Opens one stream over every backend routed for `sel`.
    pub async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        let candidates = match self.route(sel) {
            Route::Empty => {
                if sel.debug {
                    debug!(start = sel.start, end = sel.end, "No backend routed");
                }
                return Ok(Box::new(EmptyIterator::with_cancel(ctx.cancel.clone())));
            }
            Route::Tiers(tiers) => tiers
                .into_iter()
                .filter_map(|t| self.storage(t).cloned())
                .collect::<Vec<_>>(),
        };
        open_candidates(ctx, sel, &candidates).await
    }

    /// Opens the live tail alone.
    ///
    /// Returns `None` when no live source is configured or the selector
    /// lacks the container identifiers.
    pub async fn live_iterator(
        &self,
        ctx: &QueryContext,
        sel: &Selector,
    ) -> QueryResult<Option<BoxedIterator>> {
        let Some(live) = &self.live else {
            return Ok(None);
        };
        if ContainerTarget::from_selector(sel).is_none() {
            return Ok(None);
        }
        live.iterator(ctx, sel).await.map(Some)
    }

    /// Aggregator over the hot tiers that can aggregate.
    pub fn aggregator(&self) -> Result<MergedAggregator, AggregationError> {
        let storages = [&self.columnar, &self.search_index]
            .into_iter()
            .flatten()
            .filter(|s| s.as_aggregator().is_some())
            .cloned()
            .collect();
        MergedAggregator::new(storages)
    }
}

/// Opens `sel` on every candidate and merges what could be opened.
///
/// Failing candidates are logged and skipped. With no candidates the result
/// is an empty iterator; when all candidates fail the last error is
/// returned inside [`BackendError::AllFailed`].
pub async fn open_candidates(
    ctx: &QueryContext,
    sel: &Selector,
    candidates: &[DynStorage],
) -> QueryResult<BoxedIterator> {
    if candidates.is_empty() {
        return Ok(Box::new(EmptyIterator::with_cancel(ctx.cancel.clone())));
    }

    let mut opened = Vec::with_capacity(candidates.len());
    let mut last_error: Option<QueryError> = None;
    for storage in candidates {
        match storage.iterator(ctx, sel).await {
            Ok(iter) => {
                debug!(backend = %storage.name(), "Opened backend iterator");
                opened.push(iter);
            }
            Err(e) => {
                warn!(backend = %storage.name(), error = %e, "Backend unavailable, continuing without it");
                last_error = Some(e);
            }
        }
    }

    match (opened.len(), last_error) {
        (0, Some(e)) => Err(BackendError::AllFailed {
            attempted: candidates.len(),
            last_error: Box::new(e),
        }
        .into()),
        (0, None) => Ok(Box::new(EmptyIterator::with_cancel(ctx.cancel.clone()))),
        (1, _) => Ok(opened.remove(0)),
        _ => Ok(Box::new(MergedIterator::head_overlapped(
            ctx.cancel.clone(),
            opened,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStorage;
    use crate::core::LogIterator;
    use crate::types::{CONTAINER_NAME, LogItem, POD_NAME, POD_NAMESPACE};
    use std::sync::Arc;

    fn store(name: &str, ts: &[i64]) -> DynStorage {
        Arc::new(MemoryStorage::with_items(
            name,
            ts.iter()
                .map(|t| LogItem::new(name, *t, 0, format!("{}@{}", name, t)))
                .collect(),
        ))
    }

    fn router() -> BackendRouter {
        BackendRouter::new()
            .with_columnar(store("columnar", &[1]))
            .with_search_index(store("search", &[2]))
            .with_cold(store("cold", &[3]))
            .with_live(store("live", &[4]))
            .with_cold_boundary(100)
    }

    #[test]
    fn test_route_rules() {
        let router = router();
        let hot = Selector::new(200, 300);
        assert_eq!(
            router.route(&hot),
            Route::Tiers(vec![Tier::Columnar, Tier::SearchIndex])
        );

        let old = Selector::new(50, 300);
        assert_eq!(
            router.route(&old),
            Route::Tiers(vec![Tier::Columnar, Tier::SearchIndex, Tier::Cold])
        );

        let advanced = Selector::new(0, 300).with_scheme(SCHEME_ADVANCED);
        assert_eq!(
            router.route(&advanced),
            Route::Tiers(vec![Tier::Columnar, Tier::SearchIndex])
        );

        let fallback = Selector::new(200, 300).with_option(IS_FALLBACK, true);
        assert_eq!(
            router.route(&fallback),
            Route::Tiers(vec![Tier::Columnar, Tier::SearchIndex, Tier::Cold, Tier::Live])
        );
    }

    #[test]
    fn test_live_route_needs_identifiers() {
        let router = router();
        let missing = Selector::new(0, 10)
            .with_option(IS_LIVE, true)
            .with_option(POD_NAME, "web-0");
        assert_eq!(router.route(&missing), Route::Empty);

        let complete = missing
            .with_option(POD_NAMESPACE, "default")
            .with_option(CONTAINER_NAME, "web");
        assert_eq!(router.route(&complete), Route::Tiers(vec![Tier::Live]));
    }

    #[test]
    fn test_unconfigured_tiers_dropped() {
        let router = BackendRouter::new().with_search_index(store("search", &[]));
        assert_eq!(
            router.route(&Selector::new(0, 10)),
            Route::Tiers(vec![Tier::SearchIndex])
        );
        assert_eq!(BackendRouter::new().route(&Selector::new(0, 10)), Route::Empty);
    }

    #[test]
    fn test_hot_retention_boundary() {
        let router = BackendRouter::new().with_hot_retention(10_000_000_000, Duration::from_secs(4));
        assert_eq!(router.cold_boundary(), 6_000_000_000);
        let clamped = BackendRouter::new().with_hot_retention(5, Duration::from_secs(1));
        assert_eq!(clamped.cold_boundary(), 0);
    }

    #[tokio::test]
    async fn test_fallback_merges_in_order() {
        let router = router();
        let sel = Selector::new(0, 300).with_option(IS_FALLBACK, true);
        let mut it = router.iterator(&QueryContext::new(), &sel).await.unwrap();
        let mut out = Vec::new();
        while it.next().await {
            out.push(it.value().unwrap().unix_nano);
        }
        assert_eq!(out, vec![1, 2, 3, 4]);
        it.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty() {
        let mut it = BackendRouter::new()
            .iterator(&QueryContext::new(), &Selector::new(0, 10))
            .await
            .unwrap();
        assert!(!it.next().await);
        assert!(it.error().is_none());
    }

    #[tokio::test]
    async fn test_cold_without_id_is_skipped() {
        use crate::backends::{ColdPage, ColdQuery, ColdStorage, ColdStoreClient};
        use async_trait::async_trait;

        struct NoRows;

        #[async_trait]
        impl ColdStoreClient for NoRows {
            async fn execute(&self, _query: &ColdQuery) -> QueryResult<ColdPage> {
                Ok(ColdPage::default())
            }
        }

        let router = BackendRouter::new()
            .with_columnar(store("columnar", &[1, 2]))
            .with_cold(Arc::new(ColdStorage::new(Arc::new(NoRows), "base_log")))
            .with_cold_boundary(100);
        let sel = Selector::new(0, 300);
        let mut it = router.iterator(&QueryContext::new(), &sel).await.unwrap();
        assert!(it.next().await);
        assert_eq!(it.value().unwrap().unix_nano, 1);
        assert!(it.next().await);
        assert!(!it.next().await);
        assert!(it.error().is_none());
    }

    #[test]
    fn test_aggregator_uses_hot_tiers() {
        let router = router();
        assert!(router.aggregator().is_ok());
        assert_eq!(
            BackendRouter::new().aggregator().unwrap_err(),
            AggregationError::NoAggregator
        );
    }
}
