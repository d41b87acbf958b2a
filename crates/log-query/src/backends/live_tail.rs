//! Live container log adapter.
//!
//! Reads stdout of a running container straight from the orchestrator. There
//! is no persisted cursor: every fetch asks the source for one window of
//! `window` nanoseconds. Forward traversal moves the window from the
//! selector start toward its end, backward traversal from the end toward the
//! start. A window without usable lines is skipped, not retried.
//!
//! Lines arrive as `<RFC 3339 timestamp> <content>` in source order, which is
//! kept as is. Lines sharing a timestamp get increasing offsets starting at
//! [`INITIAL_OFFSET`]; the counter resets whenever the timestamp changes.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{QueryConfig, nanos};
use crate::core::{
    BoxedIterator, Direction, EmptyIterator, IterState, LogIterator, LogStorage, QueryContext,
};
use crate::error::{QueryError, QueryResult};
use crate::types::{
    CLUSTER_NAME, CONTAINER_NAME, Filter, LogItem, POD_NAME, POD_NAMESPACE, Selector, matches_all,
};

/// Offset of the first line at a timestamp.
///
/// Negative, so live lines sort after persisted lines of the same
/// timestamp when merged.
pub const INITIAL_OFFSET: i64 = i32::MIN as i64;

/// Filter keys answered by addressing the container itself.
const TARGET_KEYS: [&str; 3] = ["id", "source", "stream"];

/// Source kind of live items.
pub const LIVE_SOURCE: &str = "container";

/// Container addressed by a live query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTarget {
    /// Container id reported on items.
    pub id: String,
    /// Cluster, empty when the source serves a single cluster.
    pub cluster: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub pod: String,
    /// Container name.
    pub container: String,
}

impl ContainerTarget {
    /// Reads the target from selector options. `None` when pod namespace,
    /// pod name or container name is missing.
    pub fn from_selector(sel: &Selector) -> Option<Self> {
        Some(Self {
            id: sel.eq_filter("id").unwrap_or_default(),
            cluster: sel.option_str(CLUSTER_NAME).unwrap_or_default().to_string(),
            namespace: sel.option_str(POD_NAMESPACE)?.to_string(),
            pod: sel.option_str(POD_NAME)?.to_string(),
            container: sel.option_str(CONTAINER_NAME)?.to_string(),
        })
    }
}

/// Source of live container output.
#[async_trait]
pub trait LiveLogSource: Send + Sync {
    /// Lines logged by `target` within `[since, until)`, in source order.
    async fn fetch_lines(&self, target: &ContainerTarget, since: i64, until: i64) -> QueryResult<Vec<String>>;
}

/// Splits a line into its nanosecond timestamp and content.
pub fn parse_line(line: &str) -> Option<(i64, &str)> {
    let (ts, content) = match line.split_once(' ') {
        Some((ts, content)) => (ts, content),
        None => (line, ""),
    };
    let ts = DateTime::parse_from_rfc3339(ts).ok()?.timestamp_nanos_opt()?;
    Some((ts, content))
}

/// Iterator over windows of live output.
pub struct LiveTailIterator {
    source: Arc<dyn LiveLogSource>,
    target: ContainerTarget,
    start: i64,
    end: i64,
    window: i64,
    filters: Vec<Filter>,
    state: IterState,
    buffer: VecDeque<LogItem>,
    current: Option<LogItem>,
    cursor: i64,
    last_ts: Option<i64>,
    next_offset: i64,
}

impl LiveTailIterator {
    /// Creates an iterator over `[sel.start, sel.end)` of `target`.
    pub fn new(
        cancel: CancellationToken,
        source: Arc<dyn LiveLogSource>,
        target: ContainerTarget,
        sel: &Selector,
        window: i64,
    ) -> Self {
        Self {
            source,
            target,
            start: sel.start,
            end: sel.end,
            window: window.max(1),
            filters: sel
                .filters
                .iter()
                .filter(|f| !TARGET_KEYS.contains(&f.key.as_str()))
                .cloned()
                .collect(),
            state: IterState::new(cancel),
            buffer: VecDeque::new(),
            current: None,
            cursor: sel.start,
            last_ts: None,
            next_offset: INITIAL_OFFSET,
        }
    }

    fn rewind(&mut self, direction: Direction) {
        self.buffer.clear();
        self.current = None;
        self.last_ts = None;
        self.next_offset = INITIAL_OFFSET;
        self.cursor = match direction {
            Direction::Forward => self.start,
            Direction::Backward => self.end,
        };
    }

    fn offset_for(&mut self, ts: i64) -> i64 {
        if self.last_ts != Some(ts) {
            self.last_ts = Some(ts);
            self.next_offset = INITIAL_OFFSET;
        }
        let offset = self.next_offset;
        self.next_offset += 1;
        offset
    }

    fn to_items(&mut self, lines: Vec<String>, since: i64, until: i64) -> QueryResult<Vec<LogItem>> {
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let Some((ts, content)) = parse_line(line) else {
                debug!(line = %line, "Skipping unparsable live line");
                continue;
            };
            if ts < since || ts >= until {
                continue;
            }
            let offset = self.offset_for(ts);
            let item = LogItem::new(self.target.id.clone(), ts, offset, content)
                .with_source(LIVE_SOURCE)
                .with_tag("pod_namespace", self.target.namespace.clone())
                .with_tag("pod_name", self.target.pod.clone())
                .with_tag("container_name", self.target.container.clone());
            if matches_all(&self.filters, &item)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Loads the next non-empty window. Returns false at the range boundary.
    async fn fill(&mut self, direction: Direction) -> QueryResult<bool> {
        loop {
            let (since, until) = match direction {
                Direction::Forward if self.cursor < self.end => {
                    (self.cursor, self.cursor.saturating_add(self.window).min(self.end))
                }
                Direction::Backward if self.cursor > self.start => {
                    (self.cursor.saturating_sub(self.window).max(self.start), self.cursor)
                }
                _ => return Ok(false),
            };
            let lines = self.source.fetch_lines(&self.target, since, until).await?;
            self.cursor = match direction {
                Direction::Forward => until,
                Direction::Backward => since,
            };
            if direction == Direction::Backward {
                // offsets are assigned in source order within each window
                self.last_ts = None;
            }
            let mut items = self.to_items(lines, since, until)?;
            if items.is_empty() {
                continue;
            }
            if direction == Direction::Backward {
                items.reverse();
            }
            self.buffer.extend(items);
            return Ok(true);
        }
    }

    async fn advance(&mut self, direction: Direction) -> bool {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.current = Some(item);
                return true;
            }
            match self.fill(direction).await {
                Ok(true) => {}
                Ok(false) => {
                    self.current = None;
                    self.state.set_eof();
                    return false;
                }
                Err(e) => {
                    self.current = None;
                    self.state.fail(e);
                    return false;
                }
            }
        }
    }
}

#[async_trait]
impl LogIterator for LiveTailIterator {
    async fn first(&mut self) -> bool {
        if !self.state.begin_rewind("first", Direction::Forward) {
            return false;
        }
        self.rewind(Direction::Forward);
        self.advance(Direction::Forward).await
    }

    async fn last(&mut self) -> bool {
        if !self.state.begin_rewind("last", Direction::Backward) {
            return false;
        }
        self.rewind(Direction::Backward);
        self.advance(Direction::Backward).await
    }

    async fn next(&mut self) -> bool {
        let fresh = self.state.direction().is_none();
        if !self.state.begin("next", Direction::Forward) {
            return false;
        }
        if fresh {
            self.rewind(Direction::Forward);
        }
        self.advance(Direction::Forward).await
    }

    async fn prev(&mut self) -> bool {
        let fresh = self.state.direction().is_none();
        if !self.state.begin("prev", Direction::Backward) {
            return false;
        }
        if fresh {
            self.rewind(Direction::Backward);
        }
        self.advance(Direction::Backward).await
    }

    fn value(&self) -> Option<&LogItem> {
        self.current.as_ref()
    }

    fn error(&self) -> Option<&QueryError> {
        self.state.error()
    }

    async fn close(&mut self) -> QueryResult<()> {
        self.state.mark_closed();
        self.buffer.clear();
        self.current = None;
        Ok(())
    }
}

/// Storage reading live container output.
pub struct LiveTailStorage {
    source: Arc<dyn LiveLogSource>,
    window: i64,
}

impl LiveTailStorage {
    /// Creates a storage fetching windows of `window` nanoseconds.
    pub fn new(source: Arc<dyn LiveLogSource>, window: i64) -> Self {
        Self { source, window }
    }

    /// Creates a storage fetching windows of the configured live window.
    pub fn from_config(source: Arc<dyn LiveLogSource>, config: &QueryConfig) -> Self {
        Self::new(source, nanos(config.live_window))
    }
}

#[async_trait]
impl LogStorage for LiveTailStorage {
    fn name(&self) -> &str {
        "live_tail"
    }

    async fn iterator(&self, ctx: &QueryContext, sel: &Selector) -> QueryResult<BoxedIterator> {
        let Some(target) = ContainerTarget::from_selector(sel) else {
            debug!("Live query without pod identifiers");
            return Ok(Box::new(EmptyIterator::with_cancel(ctx.cancel.clone())));
        };
        Ok(Box::new(LiveTailIterator::new(
            ctx.cancel.clone(),
            self.source.clone(),
            target,
            sel,
            self.window,
        )))
    }
}
