//! The log query service.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::config::QueryConfig;
use crate::core::{Aggregator, BoxedIterator, Directed, QueryContext, close_logged};
use crate::error::{AggregationError, BackendError, ParameterError, QueryResult};
use crate::merge::OrderedIterator;
use crate::router::BackendRouter;
use crate::split::TimeSplitter;
use crate::types::{
    Aggregation, AggregationResponse, CLUSTER_NAME, CONTAINER_NAME, Filter, ID, IS_FIRST_QUERY,
    LogItem, POD_NAME, POD_NAMESPACE, ReturnFields, Selector, compare_items,
};

use super::LogSink;
use super::request::{
    GetLogByExpressionRequest, GetLogByOrganizationRequest, GetLogByRuntimeRequest, GetLogRequest,
    LogAggregationRequest, Request,
};
use super::selector::{get_limit, is_recent_window, to_selector, try_fill_query_meta};

/// Source of the current time in nanoseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Lines of a lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogLines {
    /// Items in result order.
    pub lines: Vec<LogItem>,
    /// Whether the lines came from the live source.
    pub is_fallback: bool,
}

/// One page of an expression search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    /// Items in traversal order.
    pub lines: Vec<LogItem>,
    /// Items matching the query, zero when not computed.
    pub total: i64,
}

/// Serves log lookups, searches, aggregations and streams.
pub struct LogQueryService {
    config: QueryConfig,
    router: BackendRouter,
    splitter: TimeSplitter,
    download_slots: Option<Arc<Semaphore>>,
    clock: Clock,
}

impl fmt::Debug for LogQueryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogQueryService")
            .field("router", &self.router)
            .field("splitter", &self.splitter)
            .field("download_slots", &self.available_download_slots())
            .finish()
    }
}

fn system_now() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

impl LogQueryService {
    /// Creates a service.
    ///
    /// A `download_concurrency` of zero leaves downloads unthrottled.
    pub fn new(config: QueryConfig, router: BackendRouter) -> Self {
        let download_slots = match config.download_concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            splitter: TimeSplitter::from_config(&config),
            config,
            router,
            download_slots,
            clock: Arc::new(system_now),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// The router.
    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    /// Free download slots, `None` when unthrottled.
    pub fn available_download_slots(&self) -> Option<usize> {
        self.download_slots.as_ref().map(|s| s.available_permits())
    }

    pub(crate) fn now(&self) -> i64 {
        (self.clock)()
    }

    /// The router used for reads. Without an explicit cold boundary, the
    /// boundary trails the clock by the configured hot retention.
    pub fn routing(&self) -> BackendRouter {
        if self.router.cold_boundary() > 0 {
            return self.router.clone();
        }
        self.router.clone().configured(&self.config, self.now())
    }

    /// Looks up a container, job or trace.
    ///
    /// A `job` source is first read from the live source of its pipeline
    /// namespace; persisted data is only used when that yields nothing.
    #[instrument(skip(self, ctx, req), fields(id = %req.id, source = %req.source))]
    pub async fn get_log(&self, ctx: &QueryContext, req: &GetLogRequest) -> QueryResult<LogLines> {
        if req.source == "job" {
            match self
                .get_log_by_realtime(ctx, &GetLogByRuntimeRequest::for_job(req))
                .await
            {
                Err(e) => error!(id = %req.id, error = %e, "Failed to get live log of job"),
                Ok(resp) if !resp.lines.is_empty() => {
                    return Ok(LogLines {
                        lines: resp.lines,
                        is_fallback: true,
                    });
                }
                Ok(_) => {}
            }
        }
        let (lines, _) = self
            .query_log_items(
                ctx,
                req,
                |sel| {
                    sel.meta.preferred_return_fields = ReturnFields::OnlyIdContent;
                    try_fill_query_meta(sel, ctx, &[]);
                },
                true,
                false,
            )
            .await?;
        Ok(LogLines {
            lines,
            is_fallback: false,
        })
    }

    /// Looks up a runtime's container, falling back to the live source.
    #[instrument(skip(self, ctx, req), fields(application_id = %req.application_id))]
    pub async fn get_log_by_runtime(
        &self,
        ctx: &QueryContext,
        req: &GetLogByRuntimeRequest,
    ) -> QueryResult<LogLines> {
        if req.application_id.is_empty() {
            return Err(ParameterError::missing("application_id").into());
        }
        let result = self
            .query_log_items(
                ctx,
                req,
                |sel| {
                    sel.filters
                        .push(Filter::eq("tags.dice_application_id", req.application_id.as_str()));
                    sel.meta.preferred_return_fields = ReturnFields::OnlyIdContent;
                    try_fill_query_meta(sel, ctx, &[]);
                },
                true,
                false,
            )
            .await;
        match result {
            Err(e) => {
                warn!(error = %e, "Runtime log query failed, using live source");
                self.get_log_by_realtime(ctx, req).await
            }
            Ok((lines, _)) if lines.is_empty() && self.use_fallback(req) => {
                info!("Runtime log query is empty, using live source");
                self.get_log_by_realtime(ctx, req).await
            }
            Ok((lines, _)) => Ok(LogLines {
                lines,
                is_fallback: false,
            }),
        }
    }

    fn use_fallback(&self, req: &GetLogByRuntimeRequest) -> bool {
        req.is_first_query || is_recent_window(req.start, req.end, self.now(), &self.config)
    }

    /// Reads a container from the live source only.
    ///
    /// `is_fallback` is set when the live source produced lines.
    #[instrument(skip(self, ctx, req), fields(pod = %req.pod_name, container = %req.container_name))]
    pub async fn get_log_by_realtime(
        &self,
        ctx: &QueryContext,
        req: &GetLogByRuntimeRequest,
    ) -> QueryResult<LogLines> {
        let mut sel = to_selector(req, &self.config, self.now())?;
        try_fill_query_meta(&mut sel, ctx, &[]);
        sel.options
            .insert(IS_FIRST_QUERY.to_string(), Value::Bool(req.is_first_query));
        for (key, value) in [
            (ID, &req.id),
            (CONTAINER_NAME, &req.container_name),
            (POD_NAME, &req.pod_name),
            (POD_NAMESPACE, &req.pod_namespace),
            (CLUSTER_NAME, &req.cluster_name),
        ] {
            if !value.is_empty() {
                sel.options
                    .insert(key.to_string(), Value::String(value.clone()));
            }
        }
        self.log_selector(req, &sel);

        let Some(it) = self.router.live_iterator(ctx, &sel).await? else {
            return Ok(LogLines::default());
        };
        let (mut it, lines) =
            collect_items(it, req.count < 0, get_limit(req.count, &self.config), true).await;
        close_logged(it.as_mut()).await;
        let lines = lines?;
        Ok(LogLines {
            is_fallback: !lines.is_empty(),
            lines,
        })
    }

    /// Looks up a container within a cluster.
    #[instrument(skip(self, ctx, req), fields(cluster = %req.cluster_name))]
    pub async fn get_log_by_organization(
        &self,
        ctx: &QueryContext,
        req: &GetLogByOrganizationRequest,
    ) -> QueryResult<LogLines> {
        if req.cluster_name.is_empty() {
            return Err(ParameterError::missing("cluster_name").into());
        }
        let (lines, _) = self
            .query_log_items(
                ctx,
                req,
                |sel| {
                    sel.meta.preferred_return_fields = ReturnFields::OnlyIdContent;
                    try_fill_query_meta(sel, ctx, &[]);
                },
                true,
                false,
            )
            .await?;
        Ok(LogLines {
            lines,
            is_fallback: false,
        })
    }

    /// Searches by expression.
    ///
    /// The total is computed unless the request meta skips it. Without a
    /// total the range is scanned in slices, newest data first.
    #[instrument(skip(self, ctx, req), fields(expression = %req.query_expression))]
    pub async fn get_log_by_expression(
        &self,
        ctx: &QueryContext,
        req: &GetLogByExpressionRequest,
    ) -> QueryResult<LogPage> {
        let with_total = !req.query_meta.as_ref().is_some_and(|m| m.skip_total_stat);
        let (lines, total) = self
            .query_log_items(
                ctx,
                req,
                |sel| {
                    sel.meta.preferred_return_fields = ReturnFields::All;
                    try_fill_query_meta(sel, ctx, &[]);
                },
                false,
                with_total,
            )
            .await?;
        Ok(LogPage { lines, total })
    }

    /// Aggregates an expression query over the hot tiers.
    #[instrument(skip(self, ctx, req), fields(aggregations = req.aggregations.len()))]
    pub async fn log_aggregation(
        &self,
        ctx: &QueryContext,
        req: &LogAggregationRequest,
    ) -> QueryResult<AggregationResponse> {
        let Some(query) = &req.query else {
            return Err(AggregationError::MissingQuery.into());
        };
        if req.aggregations.is_empty() {
            return Err(AggregationError::EmptyDescriptors.into());
        }
        let aggregator = self.router.aggregator()?;
        let selector = to_selector(query, &self.config, self.now())?;
        self.log_selector(query, &selector);
        let aggregation = Aggregation {
            selector: Some(selector),
            descriptors: req.aggregations.clone(),
        };
        aggregator.aggregate(ctx, &aggregation).await
    }

    /// Streams every item of an expression query into `sink`.
    ///
    /// Occupies a download slot while running. Returns the number of items
    /// sent.
    #[instrument(skip(self, ctx, req, sink), fields(expression = %req.query_expression))]
    pub async fn scan_logs_by_expression<S: LogSink + ?Sized>(
        &self,
        ctx: &QueryContext,
        req: &GetLogByExpressionRequest,
        sink: &mut S,
    ) -> QueryResult<u64> {
        let mut req = req.clone();
        if req.count == 0 {
            req.count = self.config.download_default_count;
        }
        let _slot = self.acquire_download_slot()?;
        let sel = to_selector(&req, &self.config, self.now())?;
        self.log_selector(&req, &sel);
        self.walk(ctx, &sel, req.count < 0, sink).await
    }

    /// Takes a download slot without waiting.
    pub(crate) fn acquire_download_slot(&self) -> QueryResult<Option<OwnedSemaphorePermit>> {
        let Some(slots) = &self.download_slots else {
            return Ok(None);
        };
        match slots.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => Err(ParameterError::invalid(
                "download",
                "current download reached, please wait for a while",
            )
            .into()),
        }
    }

    /// Sends every item of `sel` to `sink`.
    pub(crate) async fn walk<S: LogSink + ?Sized>(
        &self,
        ctx: &QueryContext,
        sel: &Selector,
        backward: bool,
        sink: &mut S,
    ) -> QueryResult<u64> {
        let it = self.routing().iterator(ctx, sel).await?;
        let mut directed = Directed::new(it, backward);
        let mut sent = 0u64;
        let mut result = Ok(());
        while directed.advance().await {
            let Some(item) = directed.value() else {
                continue;
            };
            if let Err(e) = sink.send(item.clone()).await {
                result = Err(e);
                break;
            }
            sent += 1;
        }
        if result.is_ok() {
            if let Some(e) = directed.error() {
                result = Err(e.clone());
            }
        }
        close_logged(directed.inner_mut()).await;
        debug!(sent, "Walk finished");
        result.map(|_| sent)
    }

    fn log_selector(&self, req: &dyn Request, sel: &Selector) {
        if req.get_debug() || sel.debug {
            info!(request = ?req, selector = ?sel, "Log query");
        }
    }

    async fn query_log_items<F>(
        &self,
        ctx: &QueryContext,
        req: &dyn Request,
        adjust: F,
        ascending: bool,
        with_total: bool,
    ) -> QueryResult<(Vec<LogItem>, i64)>
    where
        F: FnOnce(&mut Selector) + Send,
    {
        let mut sel = to_selector(req, &self.config, self.now())?;
        adjust(&mut sel);
        self.log_selector(req, &sel);

        let it = if with_total {
            self.routing().iterator(ctx, &sel).await?
        } else {
            self.split_iterator(ctx, &sel).await?
        };
        let (mut it, items) = collect_items(
            it,
            req.get_count() < 0,
            get_limit(req.get_count(), &self.config),
            ascending,
        )
        .await;

        let result = match items {
            Err(e) => Err(e),
            Ok(items) if !with_total => Ok((items, 0)),
            Ok(items) => match it.as_counter() {
                Some(counter) => counter.total().await.map(|total| (items, total)),
                None => Err(BackendError::UnsupportedCapability {
                    backend_name: "router".to_string(),
                    capability: "count".to_string(),
                }
                .into()),
            },
        };
        close_logged(it.as_mut()).await;
        result
    }

    /// One stream over the slices of `sel`, oldest slice first.
    ///
    /// A selector skipping leading items is not split, since every slice
    /// would skip them again.
    async fn split_iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        let router = self.routing();
        if sel.skip.from_offset > 0 {
            return router.iterator(ctx, sel).await;
        }
        let slices = self.splitter.split(sel);
        let mut children: Vec<BoxedIterator> = Vec::with_capacity(slices.len());
        for slice in &slices {
            match router.iterator(ctx, slice).await {
                Ok(it) => children.push(it),
                Err(e) => {
                    for child in &mut children {
                        close_logged(child.as_mut()).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(Box::new(OrderedIterator::new(ctx.cancel.clone(), children)))
    }
}

/// Drains at most `limit` items in the chosen direction.
///
/// Backward results are put back in ascending order when `ascending` is
/// set. The iterator is handed back for counting and closing.
async fn collect_items(
    it: BoxedIterator,
    backward: bool,
    limit: usize,
    ascending: bool,
) -> (BoxedIterator, QueryResult<Vec<LogItem>>) {
    let mut directed = Directed::new(it, backward);
    let mut items = Vec::new();
    if limit > 0 {
        while directed.advance().await {
            if let Some(item) = directed.value() {
                items.push(item.clone());
            }
            if items.len() >= limit {
                break;
            }
        }
    }
    let result = match directed.error() {
        Some(e) => Err(e.clone()),
        None => {
            if backward && ascending {
                items.sort_by(compare_items);
            }
            Ok(items)
        }
    };
    (directed.into_inner(), result)
}
