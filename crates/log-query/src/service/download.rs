//! Plain text download of an expression query.
//!
//! The body is the raw content of every item, one per line. Downloads have
//! their own range limit and share the throttling slots of streaming scans.

use async_trait::async_trait;
use http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::instrument;

use crate::config::nanos;
use crate::core::QueryContext;
use crate::error::{ParameterError, QueryResult};
use crate::types::LogItem;

use super::LogSink;
use super::query::LogQueryService;
use super::request::DownloadRequest;
use super::selector::to_selector;

const DEFAULT_FILE_NAME: &str = "logs.txt";

/// Result of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    /// Response headers.
    pub headers: HeaderMap,
    /// Lines written.
    pub lines: u64,
}

/// Response headers of a download named `file_name`.
pub fn download_headers(file_name: &str) -> QueryResult<HeaderMap> {
    let file_name = if file_name.is_empty() {
        DEFAULT_FILE_NAME
    } else {
        file_name
    };
    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", file_name))
        .map_err(|_| ParameterError::invalid("file_name", format!("invalid file name: {}", file_name)))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok(headers)
}

struct LineWriter<W: AsyncWrite + Unpin + Send> {
    out: BufWriter<W>,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> LogSink for LineWriter<W> {
    async fn send(&mut self, item: LogItem) -> QueryResult<()> {
        self.out.write_all(item.content.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        Ok(())
    }
}

impl LogQueryService {
    /// Writes every item of the download query to `writer`.
    ///
    /// Ranges above the download limit and exhausted slots are rejected
    /// before anything is written.
    #[instrument(skip(self, ctx, req, writer), fields(file_name = %req.file_name))]
    pub async fn download_logs<W>(
        &self,
        ctx: &QueryContext,
        req: &DownloadRequest,
        writer: W,
    ) -> QueryResult<DownloadSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let headers = download_headers(&req.file_name)?;
        let mut query = req.query.clone();
        if query.count == 0 {
            query.count = self.config().download_default_count;
        }
        let sel = to_selector(&query, self.config(), self.now())?;
        if sel.end - sel.start > nanos(self.config().download_max_time_range) {
            return Err(ParameterError::invalid("(start,end]", "download time range is too large").into());
        }
        let _slot = self.acquire_download_slot()?;

        let mut sink = LineWriter {
            out: BufWriter::new(writer),
        };
        let lines = self.walk(ctx, &sel, query.count < 0, &mut sink).await?;
        sink.out.flush().await?;
        Ok(DownloadSummary { headers, lines })
    }
}
