//! Request to selector translation.

use serde_json::Value;

use crate::config::{QueryConfig, nanos};
use crate::core::QueryContext;
use crate::error::{ParameterError, QueryResult};
use crate::types::{
    Filter, IS_LIVE, IterateStyle, Operator, QueryMeta, SCHEME_ADVANCED, SCHEME_TRACE,
    SELECTOR_KEY_COUNT, Selector,
};

use super::request::Request;

const RANGE_PARAMETER: &str = "(start,end]";

/// Number of items a listing returns for a signed `count`.
///
/// Zero means the configured default; anything above the maximum is
/// clamped. The sign only picks the direction.
pub fn get_limit(count: i64, config: &QueryConfig) -> usize {
    let count = count.unsigned_abs();
    let limit = if count == 0 {
        config.default_count.unsigned_abs()
    } else {
        count.min(config.max_count.unsigned_abs())
    };
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Builds the selector of a request.
///
/// `now` fills a missing end. A missing start falls back to the default
/// range. A given start of a forward continuation is moved past the last
/// item of the previous page.
pub fn to_selector(req: &dyn Request, config: &QueryConfig, now: i64) -> QueryResult<Selector> {
    let mut sel = Selector::new(req.get_start(), req.get_end())
        .with_option(SELECTOR_KEY_COUNT, req.get_count())
        .with_option(IS_LIVE, req.get_live());
    sel.debug = req.get_debug();

    if sel.end <= 0 {
        sel.end = now;
    }
    if sel.start <= 0 {
        sel.start = sel.end.saturating_sub(nanos(config.default_time_range)).max(0);
    } else if req.get_count() >= 0 {
        sel.start = sel.start.saturating_add(1);
    }

    if sel.end < sel.start {
        return Err(ParameterError::invalid(RANGE_PARAMETER, "start must be less than end").into());
    }
    if sel.end - sel.start > nanos(config.max_time_range) {
        let opted_out = req
            .as_expression()
            .and_then(|e| e.get_query_meta())
            .is_some_and(|m| m.ignore_max_time_range_limit);
        if !opted_out {
            return Err(ParameterError::invalid(RANGE_PARAMETER, "time range is too large").into());
        }
    }

    if let Some(by_id) = req.as_container_id() {
        if !by_id.get_request_id().is_empty() {
            sel.scheme = SCHEME_TRACE.to_string();
            sel.filters
                .push(Filter::eq("tags.request_id", by_id.get_request_id()));
        } else if !by_id.get_id().is_empty() {
            sel.scheme = by_id.get_source().to_string();
            sel.filters.push(Filter::eq("id", by_id.get_id()));
            if !by_id.get_source().is_empty() {
                sel.filters.push(Filter::eq("source", by_id.get_source()));
            }
            if !by_id.get_stream().is_empty() {
                sel.filters.push(Filter::eq("stream", by_id.get_stream()));
            }
        } else {
            return Err(ParameterError::missing("id").into());
        }
        if !by_id.get_pattern().is_empty() {
            sel.filters.push(Filter::contains("content", by_id.get_pattern()));
        }
    }

    if let Some(by_expr) = req.as_expression() {
        sel.scheme = SCHEME_ADVANCED.to_string();
        let expr = by_expr.get_query_expression();
        if !expr.is_empty() {
            sel.filters
                .push(Filter::new("_", Operator::Expression, Value::from(expr)));
        }
        if let Some(extra) = by_expr.get_extra_filter() {
            if let Some(after) = &extra.after {
                sel.skip.after_id = Some(after.clone());
            }
            if extra.position_offset > 0 {
                sel.skip.from_offset = usize::try_from(extra.position_offset).unwrap_or(usize::MAX);
            }
        }
        if let Some(meta) = by_expr.get_query_meta() {
            sel.meta = QueryMeta {
                org_names: vec![meta.org_name.clone()],
                msp_env_ids: meta.msp_env_ids.clone(),
                highlight: meta.highlight,
                preferred_buffer_size: usize::try_from(meta.preferred_buffer_size).unwrap_or(0),
                preferred_iterate_style: IterateStyle::from_i32(meta.preferred_iterate_style),
                skip_total_stat: meta.skip_total_stat,
                ..Default::default()
            };
        }
    }
    Ok(sel)
}

/// Scopes a selector to organizations unless it already is.
///
/// The scope is the empty organization, the caller's organization and
/// `extra`, without duplicates.
pub fn try_fill_query_meta(sel: &mut Selector, ctx: &QueryContext, extra: &[&str]) {
    if !sel.meta.org_names.is_empty() {
        return;
    }
    let mut orgs = vec![String::new()];
    if let Some(org) = ctx.org.as_deref().filter(|o| !o.is_empty()) {
        orgs.push(org.to_string());
    }
    for org in extra {
        if !orgs.iter().any(|o| o == org) {
            orgs.push((*org).to_string());
        }
    }
    sel.meta.org_names = orgs;
}

/// Whether a query window is recent enough for the live fallback.
///
/// Recent means the start, or with no start the end, lies within
/// `[now - lookback, now + lookahead)`.
pub fn is_recent_window(start: i64, end: i64, now: i64, config: &QueryConfig) -> bool {
    let lo = now.saturating_sub(nanos(config.fallback_lookback));
    let hi = now.saturating_add(nanos(config.fallback_lookahead));
    if start == 0 && end >= lo && end < hi {
        return true;
    }
    start >= lo && start < hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::service::request::{
        ExpressionMeta, ExtraFilter, GetLogByExpressionRequest, GetLogRequest,
    };
    use crate::types::UniqueId;

    const HOUR: i64 = 3_600_000_000_000;
    const NOW: i64 = 1_000 * HOUR;

    fn by_id(start: i64, end: i64, count: i64) -> GetLogRequest {
        GetLogRequest {
            id: "c1".to_string(),
            source: "container".to_string(),
            start,
            end,
            count,
            ..Default::default()
        }
    }

    #[test]
    fn test_start_at_max_timestamp() {
        let config = QueryConfig::default();
        let err = to_selector(&by_id(i64::MAX, NOW, 10), &config, NOW).unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(err, QueryError::Parameter(_)));

        let sel = to_selector(&by_id(i64::MAX, i64::MAX, 10), &config, NOW).unwrap();
        assert_eq!((sel.start, sel.end), (i64::MAX, i64::MAX));
    }

    #[test]
    fn test_get_limit() {
        let config = QueryConfig::default();
        assert_eq!(get_limit(0, &config), 50);
        assert_eq!(get_limit(10, &config), 10);
        assert_eq!(get_limit(-10, &config), 10);
        assert_eq!(get_limit(5000, &config), 700);
        assert_eq!(get_limit(i64::MIN, &config), 700);
    }

    #[test]
    fn test_defaults_range() {
        let config = QueryConfig::default();
        let sel = to_selector(&by_id(0, 0, 10), &config, NOW).unwrap();
        assert_eq!(sel.end, NOW);
        assert_eq!(sel.start, NOW - 7 * 24 * HOUR);

        let sel = to_selector(&by_id(0, HOUR, 10), &config, NOW).unwrap();
        assert_eq!(sel.start, 0);
    }

    #[test]
    fn test_forward_continuation_moves_start() {
        let config = QueryConfig::default();
        let sel = to_selector(&by_id(100, 200, 10), &config, NOW).unwrap();
        assert_eq!(sel.start, 101);

        let sel = to_selector(&by_id(100, 200, -10), &config, NOW).unwrap();
        assert_eq!(sel.start, 100);
    }

    #[test]
    fn test_range_validation() {
        let config = QueryConfig::default();
        let err = to_selector(&by_id(300, 200, -1), &config, NOW).unwrap_err();
        assert!(matches!(err, QueryError::Parameter(ParameterError::InvalidParameter { .. })));

        let err = to_selector(&by_id(1, 31 * 24 * HOUR, 1), &config, NOW).unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_max_range_opt_out() {
        let config = QueryConfig::default();
        let mut req = GetLogByExpressionRequest {
            start: 1,
            end: 40 * 24 * HOUR,
            ..Default::default()
        };
        assert!(to_selector(&req, &config, NOW).is_err());
        req.query_meta = Some(ExpressionMeta {
            ignore_max_time_range_limit: true,
            ..Default::default()
        });
        assert!(to_selector(&req, &config, NOW).is_ok());
    }

    #[test]
    fn test_container_filters() {
        let config = QueryConfig::default();
        let mut req = by_id(0, 0, 10);
        req.stream = "stderr".to_string();
        req.pattern = "panic".to_string();
        let sel = to_selector(&req, &config, NOW).unwrap();
        assert_eq!(sel.scheme, "container");
        assert_eq!(
            sel.filters,
            vec![
                Filter::eq("id", "c1"),
                Filter::eq("source", "container"),
                Filter::eq("stream", "stderr"),
                Filter::contains("content", "panic"),
            ]
        );
        assert_eq!(sel.requested_count(), Some(10));
    }

    #[test]
    fn test_trace_and_missing_id() {
        let config = QueryConfig::default();
        let req = GetLogRequest {
            request_id: "r-1".to_string(),
            ..Default::default()
        };
        let sel = to_selector(&req, &config, NOW).unwrap();
        assert_eq!(sel.scheme, SCHEME_TRACE);
        assert_eq!(sel.eq_filter("tags.request_id").as_deref(), Some("r-1"));

        let err = to_selector(&GetLogRequest::default(), &config, NOW).unwrap_err();
        assert!(matches!(
            err,
            QueryError::Parameter(ParameterError::MissingParameter { ref parameter }) if parameter == "id"
        ));
    }

    #[test]
    fn test_expression_selector() {
        let config = QueryConfig::default();
        let cursor = UniqueId::new(5, "c1", 2);
        let req = GetLogByExpressionRequest {
            query_expression: "level:ERROR".to_string(),
            extra_filter: Some(ExtraFilter {
                after: Some(cursor.clone()),
                position_offset: 20,
            }),
            query_meta: Some(ExpressionMeta {
                org_name: "acme".to_string(),
                preferred_buffer_size: 64,
                preferred_iterate_style: 2,
                ..Default::default()
            }),
            ..Default::default()
        };
        let sel = to_selector(&req, &config, NOW).unwrap();
        assert_eq!(sel.scheme, SCHEME_ADVANCED);
        assert_eq!(sel.expression().as_deref(), Some("level:ERROR"));
        assert_eq!(sel.skip.after_id, Some(cursor));
        assert_eq!(sel.skip.from_offset, 20);
        assert_eq!(sel.meta.org_names, vec!["acme".to_string()]);
        assert_eq!(sel.meta.preferred_buffer_size, 64);
        assert_eq!(sel.meta.preferred_iterate_style, IterateStyle::Scroll);
    }

    #[test]
    fn test_fill_query_meta() {
        let ctx = QueryContext::new().with_org("acme");
        let mut sel = Selector::new(0, 1);
        try_fill_query_meta(&mut sel, &ctx, &["acme", "other"]);
        assert_eq!(sel.meta.org_names, vec!["", "acme", "other"]);

        let mut scoped = Selector::new(0, 1);
        scoped.meta.org_names = vec!["fixed".to_string()];
        try_fill_query_meta(&mut scoped, &ctx, &[]);
        assert_eq!(scoped.meta.org_names, vec!["fixed"]);
    }

    #[test]
    fn test_recent_window() {
        let config = QueryConfig::default();
        let minute = 60_000_000_000;
        assert!(is_recent_window(NOW - 30 * minute / 60, NOW, NOW, &config));
        assert!(is_recent_window(0, NOW + 2 * minute, NOW, &config));
        assert!(!is_recent_window(0, NOW + 3 * minute, NOW, &config));
        assert!(!is_recent_window(NOW - 2 * minute, NOW, NOW, &config));
    }
}
