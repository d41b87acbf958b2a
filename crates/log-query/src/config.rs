//! Query core configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LOG_QUERY_LOG_LEVEL` | info | Log level |
//! | `LOG_QUERY_DEFAULT_COUNT` | 50 | Count used when a request asks for 0 items |
//! | `LOG_QUERY_MAX_COUNT` | 700 | Upper bound for requested counts |
//! | `LOG_QUERY_DEFAULT_TIME_RANGE` | 7d | Range used when no start is given |
//! | `LOG_QUERY_MAX_TIME_RANGE` | 30d | Largest accepted query range |
//! | `LOG_QUERY_DOWNLOAD_MAX_TIME_RANGE` | 7d | Largest accepted download range |
//! | `LOG_QUERY_DOWNLOAD_CONCURRENCY` | 10 | Concurrent downloads, 0 for unbounded |
//! | `LOG_QUERY_DOWNLOAD_DEFAULT_COUNT` | 1000000 | Items streamed when no count is given |
//! | `LOG_QUERY_HOT_RETENTION` | 7d | Age after which data lives in the cold tier |
//! | `LOG_QUERY_FALLBACK_LOOKBACK` | 1m | Live fallback window before now |
//! | `LOG_QUERY_FALLBACK_LOOKAHEAD` | 3m | Live fallback window after now |
//! | `LOG_QUERY_PAGE_SIZE` | 200 | Default backend page size |
//! | `LOG_QUERY_LIVE_WINDOW` | 5m | Live tail fetch window |
//! | `LOG_QUERY_SPLIT_INITIAL_INTERVAL` | 1h | First slice width of split scans |
//! | `LOG_QUERY_SPLIT_DELTA_FACTOR` | 2.0 | Growth factor of slice widths |
//! | `LOG_QUERY_SPLIT_MAX_SLICES` | 10 | Slice limit of split scans |
//!
//! # Example
//!
//! ```rust
//! use loghub_log_query::QueryConfig;
//!
//! let config = QueryConfig {
//!     max_count: 1000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use clap::Parser;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration of the query core.
#[derive(Debug, Clone, Parser)]
#[command(name = "log-query")]
#[command(about = "Multi-tier log query core")]
pub struct QueryConfig {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "LOG_QUERY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Count used when a request asks for zero items.
    #[arg(long, env = "LOG_QUERY_DEFAULT_COUNT", default_value = "50")]
    pub default_count: i64,

    /// Upper bound for the absolute requested count.
    #[arg(long, env = "LOG_QUERY_MAX_COUNT", default_value = "700")]
    pub max_count: i64,

    /// Range used when a request gives no start.
    #[arg(long, env = "LOG_QUERY_DEFAULT_TIME_RANGE", default_value = "7d", value_parser = humantime::parse_duration)]
    pub default_time_range: Duration,

    /// Largest accepted query range.
    #[arg(long, env = "LOG_QUERY_MAX_TIME_RANGE", default_value = "30d", value_parser = humantime::parse_duration)]
    pub max_time_range: Duration,

    /// Largest accepted download range.
    #[arg(long, env = "LOG_QUERY_DOWNLOAD_MAX_TIME_RANGE", default_value = "7d", value_parser = humantime::parse_duration)]
    pub download_max_time_range: Duration,

    /// Concurrent downloads allowed. Zero means unbounded.
    #[arg(long, env = "LOG_QUERY_DOWNLOAD_CONCURRENCY", default_value = "10")]
    pub download_concurrency: usize,

    /// Items streamed when a scan gives no count.
    #[arg(long, env = "LOG_QUERY_DOWNLOAD_DEFAULT_COUNT", default_value = "1000000")]
    pub download_default_count: i64,

    /// Data older than this lives in the cold tier only.
    #[arg(long, env = "LOG_QUERY_HOT_RETENTION", default_value = "7d", value_parser = humantime::parse_duration)]
    pub hot_retention: Duration,

    /// How far before now a window still counts as recent.
    #[arg(long, env = "LOG_QUERY_FALLBACK_LOOKBACK", default_value = "1m", value_parser = humantime::parse_duration)]
    pub fallback_lookback: Duration,

    /// How far after now a window still counts as recent.
    #[arg(long, env = "LOG_QUERY_FALLBACK_LOOKAHEAD", default_value = "3m", value_parser = humantime::parse_duration)]
    pub fallback_lookahead: Duration,

    /// Default backend page size.
    #[arg(long, env = "LOG_QUERY_PAGE_SIZE", default_value = "200")]
    pub page_size: usize,

    /// Width of one live tail fetch.
    #[arg(long, env = "LOG_QUERY_LIVE_WINDOW", default_value = "5m", value_parser = humantime::parse_duration)]
    pub live_window: Duration,

    /// First slice width of split scans.
    #[arg(long, env = "LOG_QUERY_SPLIT_INITIAL_INTERVAL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub split_initial_interval: Duration,

    /// Growth factor of slice widths.
    #[arg(long, env = "LOG_QUERY_SPLIT_DELTA_FACTOR", default_value = "2.0")]
    pub split_delta_factor: f64,

    /// Maximum number of slices of a split scan.
    #[arg(long, env = "LOG_QUERY_SPLIT_MAX_SLICES", default_value = "10")]
    pub split_max_slices: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            default_count: 50,
            max_count: 700,
            default_time_range: 7 * DAY,
            max_time_range: 30 * DAY,
            download_max_time_range: 7 * DAY,
            download_concurrency: 10,
            download_default_count: 1_000_000,
            hot_retention: 7 * DAY,
            fallback_lookback: Duration::from_secs(60),
            fallback_lookahead: Duration::from_secs(3 * 60),
            page_size: 200,
            live_window: Duration::from_secs(5 * 60),
            split_initial_interval: Duration::from_secs(60 * 60),
            split_delta_factor: 2.0,
            split_max_slices: 10,
        }
    }
}

impl QueryConfig {
    /// Creates a configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self::try_parse().unwrap_or_default()
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.default_count <= 0 {
            errors.push("Default count must be positive".to_string());
        }

        if self.max_count <= 0 {
            errors.push("Max count must be positive".to_string());
        }

        if self.default_count > self.max_count {
            errors.push("Default count cannot exceed max count".to_string());
        }

        if self.default_time_range > self.max_time_range {
            errors.push("Default time range cannot exceed max time range".to_string());
        }

        if self.download_default_count <= 0 {
            errors.push("Download default count must be positive".to_string());
        }

        if self.page_size == 0 {
            errors.push("Page size cannot be 0".to_string());
        }

        if self.live_window.is_zero() {
            errors.push("Live window cannot be 0".to_string());
        }

        if self.split_initial_interval.is_zero() {
            errors.push("Split initial interval cannot be 0".to_string());
        }

        if self.split_delta_factor.is_nan() || self.split_delta_factor < 1.0 {
            errors.push("Split delta factor must be at least 1".to_string());
        }

        if self.split_max_slices == 0 {
            errors.push("Split max slices cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    pub fn for_testing() -> Self {
        Self {
            log_level: "debug".to_string(),
            download_concurrency: 1,
            page_size: 3,
            ..Default::default()
        }
    }
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `level`.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("loghub_log_query={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Nanoseconds of a duration, saturating at `i64::MAX`.
pub(crate) fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}
