//! Inbound request shapes.
//!
//! The service never depends on a concrete payload. It reads requests through
//! capability traits: every request is a [`Request`], and a request may
//! additionally address a container by id ([`ByContainerIdRequest`]), by pod
//! coordinates ([`ByContainerMetaRequest`]) or carry a backend expression
//! ([`ByExpressionRequest`]). The `as_*` accessors are the runtime capability
//! checks.

use serde::{Deserialize, Serialize};

use crate::types::{AggregationDescriptor, UniqueId};

/// Capabilities shared by every request.
pub trait Request: Send + Sync + std::fmt::Debug {
    /// Inclusive start in nanoseconds, zero for unset.
    fn get_start(&self) -> i64;
    /// End in nanoseconds, zero for now.
    fn get_end(&self) -> i64;
    /// Signed count. Negative reads backward.
    fn get_count(&self) -> i64;
    /// Live flag.
    fn get_live(&self) -> bool;
    /// Verbose logging flag.
    fn get_debug(&self) -> bool;

    /// Container-id capability.
    fn as_container_id(&self) -> Option<&dyn ByContainerIdRequest> {
        None
    }

    /// Container-meta capability.
    fn as_container_meta(&self) -> Option<&dyn ByContainerMetaRequest> {
        None
    }

    /// Expression capability.
    fn as_expression(&self) -> Option<&dyn ByExpressionRequest> {
        None
    }
}

/// A request addressing a container by id or a trace by request id.
pub trait ByContainerIdRequest: Request {
    /// Line offset hint.
    fn get_offset(&self) -> i64;
    /// Substring the content must contain.
    fn get_pattern(&self) -> &str;
    /// Trace request id.
    fn get_request_id(&self) -> &str;
    /// Container or job id.
    fn get_id(&self) -> &str;
    /// Source kind.
    fn get_source(&self) -> &str;
    /// Stream name.
    fn get_stream(&self) -> &str;
}

/// A request addressing a container by pod coordinates.
pub trait ByContainerMetaRequest: Request {
    /// Pod name.
    fn get_pod_name(&self) -> &str;
    /// Pod namespace.
    fn get_pod_namespace(&self) -> &str;
    /// Container name.
    fn get_container_name(&self) -> &str;
    /// Cluster name.
    fn get_cluster_name(&self) -> &str;
    /// First query of a live session.
    fn get_is_first_query(&self) -> bool;
}

/// A request carrying a backend expression.
pub trait ByExpressionRequest: Request {
    /// The expression, empty for none.
    fn get_query_expression(&self) -> &str;
    /// Query meta.
    fn get_query_meta(&self) -> Option<&ExpressionMeta>;
    /// Pagination filter.
    fn get_extra_filter(&self) -> Option<&ExtraFilter>;
}

/// Meta of an expression request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionMeta {
    /// Organization scope.
    pub org_name: String,
    /// Environment scope.
    pub msp_env_ids: Vec<String>,
    /// Request highlight fragments.
    pub highlight: bool,
    /// Preferred page size.
    pub preferred_buffer_size: i64,
    /// Wire value of the preferred paging style.
    pub preferred_iterate_style: i32,
    /// Skip the total count.
    pub skip_total_stat: bool,
    /// Accept ranges above the configured maximum.
    pub ignore_max_time_range_limit: bool,
}

/// Pagination filter of an expression request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraFilter {
    /// Resume strictly after this item.
    pub after: Option<UniqueId>,
    /// Skip this many leading items.
    pub position_offset: i64,
}

macro_rules! impl_request {
    (@caps GetLogRequest) => {
        fn as_container_id(&self) -> Option<&dyn ByContainerIdRequest> {
            Some(self)
        }
    };
    (@caps GetLogByOrganizationRequest) => {
        fn as_container_id(&self) -> Option<&dyn ByContainerIdRequest> {
            Some(self)
        }
    };
    (@caps GetLogByRuntimeRequest) => {
        fn as_container_id(&self) -> Option<&dyn ByContainerIdRequest> {
            Some(self)
        }
        fn as_container_meta(&self) -> Option<&dyn ByContainerMetaRequest> {
            Some(self)
        }
    };
    (@caps GetLogByExpressionRequest) => {
        fn as_expression(&self) -> Option<&dyn ByExpressionRequest> {
            Some(self)
        }
    };
    ($ty:ident) => {
        impl Request for $ty {
            fn get_start(&self) -> i64 {
                self.start
            }
            fn get_end(&self) -> i64 {
                self.end
            }
            fn get_count(&self) -> i64 {
                self.count
            }
            fn get_live(&self) -> bool {
                self.live
            }
            fn get_debug(&self) -> bool {
                self.debug
            }
            impl_request!(@caps $ty);
        }
    };
}

macro_rules! impl_container_id {
    ($ty:ident) => {
        impl ByContainerIdRequest for $ty {
            fn get_offset(&self) -> i64 {
                self.offset
            }
            fn get_pattern(&self) -> &str {
                &self.pattern
            }
            fn get_request_id(&self) -> &str {
                &self.request_id
            }
            fn get_id(&self) -> &str {
                &self.id
            }
            fn get_source(&self) -> &str {
                &self.source
            }
            fn get_stream(&self) -> &str {
                &self.stream
            }
        }
    };
}

/// Lookup of a container, job or trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLogRequest {
    /// Container or job id.
    pub id: String,
    /// Source kind.
    pub source: String,
    /// Stream name.
    pub stream: String,
    /// Trace request id.
    pub request_id: String,
    /// Start in nanoseconds.
    pub start: i64,
    /// End in nanoseconds.
    pub end: i64,
    /// Signed count.
    pub count: i64,
    /// Content substring.
    pub pattern: String,
    /// Line offset hint.
    pub offset: i64,
    /// Live flag.
    pub live: bool,
    /// Verbose logging.
    pub debug: bool,
    /// Pipeline of a `job` source.
    pub pipeline_id: String,
    /// Cluster name.
    pub cluster_name: String,
}

impl_request!(GetLogRequest);
impl_container_id!(GetLogRequest);

/// Lookup of a runtime's container, with a live fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLogByRuntimeRequest {
    /// Container or job id.
    pub id: String,
    /// Source kind.
    pub source: String,
    /// Stream name.
    pub stream: String,
    /// Trace request id.
    pub request_id: String,
    /// Start in nanoseconds.
    pub start: i64,
    /// End in nanoseconds.
    pub end: i64,
    /// Signed count.
    pub count: i64,
    /// Content substring.
    pub pattern: String,
    /// Line offset hint.
    pub offset: i64,
    /// Live flag.
    pub live: bool,
    /// Verbose logging.
    pub debug: bool,
    /// Application the runtime belongs to.
    pub application_id: String,
    /// Cluster name.
    pub cluster_name: String,
    /// Pod name.
    pub pod_name: String,
    /// Pod namespace.
    pub pod_namespace: String,
    /// Container name.
    pub container_name: String,
    /// First query of a live session.
    pub is_first_query: bool,
}

impl_request!(GetLogByRuntimeRequest);
impl_container_id!(GetLogByRuntimeRequest);

impl ByContainerMetaRequest for GetLogByRuntimeRequest {
    fn get_pod_name(&self) -> &str {
        &self.pod_name
    }
    fn get_pod_namespace(&self) -> &str {
        &self.pod_namespace
    }
    fn get_container_name(&self) -> &str {
        &self.container_name
    }
    fn get_cluster_name(&self) -> &str {
        &self.cluster_name
    }
    fn get_is_first_query(&self) -> bool {
        self.is_first_query
    }
}

/// Lookup of a container within a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLogByOrganizationRequest {
    /// Container or job id.
    pub id: String,
    /// Source kind.
    pub source: String,
    /// Stream name.
    pub stream: String,
    /// Trace request id.
    pub request_id: String,
    /// Start in nanoseconds.
    pub start: i64,
    /// End in nanoseconds.
    pub end: i64,
    /// Signed count.
    pub count: i64,
    /// Content substring.
    pub pattern: String,
    /// Line offset hint.
    pub offset: i64,
    /// Live flag.
    pub live: bool,
    /// Verbose logging.
    pub debug: bool,
    /// Cluster name.
    pub cluster_name: String,
}

impl_request!(GetLogByOrganizationRequest);
impl_container_id!(GetLogByOrganizationRequest);

/// Expression search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLogByExpressionRequest {
    /// Start in nanoseconds.
    pub start: i64,
    /// End in nanoseconds.
    pub end: i64,
    /// Signed count.
    pub count: i64,
    /// Live flag.
    pub live: bool,
    /// Verbose logging.
    pub debug: bool,
    /// Backend expression.
    pub query_expression: String,
    /// Query meta.
    pub query_meta: Option<ExpressionMeta>,
    /// Pagination filter.
    pub extra_filter: Option<ExtraFilter>,
}

impl_request!(GetLogByExpressionRequest);

impl ByExpressionRequest for GetLogByExpressionRequest {
    fn get_query_expression(&self) -> &str {
        &self.query_expression
    }
    fn get_query_meta(&self) -> Option<&ExpressionMeta> {
        self.query_meta.as_ref()
    }
    fn get_extra_filter(&self) -> Option<&ExtraFilter> {
        self.extra_filter.as_ref()
    }
}

impl GetLogByRuntimeRequest {
    /// The runtime request the `job` path of a plain lookup turns into.
    pub(crate) fn for_job(req: &GetLogRequest) -> Self {
        Self {
            id: req.id.clone(),
            source: req.source.clone(),
            stream: req.stream.clone(),
            request_id: req.request_id.clone(),
            start: req.start,
            end: req.end,
            count: req.count,
            pattern: req.pattern.clone(),
            offset: req.offset,
            live: true,
            debug: req.debug,
            cluster_name: req.cluster_name.clone(),
            pod_namespace: format!("pipeline-{}", req.pipeline_id),
            // job pods and their single container are named after the job
            pod_name: req.id.clone(),
            container_name: req.id.clone(),
            ..Default::default()
        }
    }
}

/// Bucketed aggregation over an expression query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogAggregationRequest {
    /// The query to aggregate.
    pub query: Option<GetLogByExpressionRequest>,
    /// Aggregations to compute.
    pub aggregations: Vec<AggregationDescriptor>,
}

/// Download of an expression query as a text file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRequest {
    /// The query to export.
    pub query: GetLogByExpressionRequest,
    /// File name offered to the client.
    pub file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let get = GetLogRequest::default();
        assert!(get.as_container_id().is_some());
        assert!(get.as_container_meta().is_none());
        assert!(get.as_expression().is_none());

        let runtime = GetLogByRuntimeRequest::default();
        assert!(runtime.as_container_id().is_some());
        assert!(runtime.as_container_meta().is_some());

        let expr = GetLogByExpressionRequest::default();
        assert!(expr.as_expression().is_some());
        assert!(expr.as_container_id().is_none());
    }

    #[test]
    fn test_job_request() {
        let req = GetLogRequest {
            id: "task-1".to_string(),
            source: "job".to_string(),
            pipeline_id: "42".to_string(),
            count: -20,
            ..Default::default()
        };
        let runtime = GetLogByRuntimeRequest::for_job(&req);
        assert!(runtime.live);
        assert_eq!(runtime.pod_namespace, "pipeline-42");
        assert_eq!(runtime.count, -20);
        assert_eq!(runtime.get_id(), "task-1");
    }

    #[test]
    fn test_deserialize_partial() {
        let req: GetLogByExpressionRequest = serde_json::from_str(
            r#"{"start": 1, "end": 2, "query_meta": {"skip_total_stat": true}}"#,
        )
        .unwrap();
        assert_eq!(req.start, 1);
        assert!(req.query_meta.unwrap().skip_total_stat);
    }
}
