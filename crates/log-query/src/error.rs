//! Error types for the log query core.
//!
//! Errors are grouped by category: iterator state violations, caller
//! parameter problems, backend failures and aggregation problems. Every
//! error is `Clone` so that an iterator can keep the error that stopped it
//! and hand it out again from `error()`.
//!
//! End-of-stream is never represented here. An exhausted iterator reports
//! no error at all.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// The primary error type for all query operations.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// Iterator state errors
    #[error(transparent)]
    Iterator(#[from] IteratorError),

    /// Caller supplied parameter errors
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// Backend errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Aggregation errors
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

/// Direction an iterator has been locked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Oldest first.
    Forward,
    /// Newest first.
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// Errors raised by the iterator state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IteratorError {
    /// A navigation call contradicted the direction the iterator is locked to.
    #[error("operation {operation} not supported on {direction} iterator")]
    OpNotSupported {
        operation: &'static str,
        direction: Direction,
    },

    /// The iterator was closed or its query was canceled.
    #[error("iterator closed")]
    Closed,
}

/// Errors caused by malformed or out-of-bound request parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// A parameter has an invalid value.
    #[error("invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A required parameter is missing.
    #[error("missing parameter {parameter}")]
    MissingParameter { parameter: String },
}

impl ParameterError {
    /// Shorthand for [`ParameterError::InvalidParameter`].
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        ParameterError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`ParameterError::MissingParameter`].
    pub fn missing(parameter: impl Into<String>) -> Self {
        ParameterError::MissingParameter {
            parameter: parameter.into(),
        }
    }
}

/// Errors originating from a storage backend.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// The backend is not reachable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// The backend does not provide the requested capability.
    #[error("capability '{capability}' not supported by {backend_name}")]
    UnsupportedCapability {
        backend_name: String,
        capability: String,
    },

    /// A query against the backend failed.
    #[error("query failed on {backend_name}: {message}")]
    QueryFailed {
        backend_name: String,
        message: String,
    },

    /// A row or document could not be decoded into a log item.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
    },

    /// Every candidate backend failed to produce an iterator.
    #[error("all {attempted} backends failed, last error: {last_error}")]
    AllFailed {
        attempted: usize,
        last_error: Box<QueryError>,
    },
}

impl BackendError {
    /// Shorthand for [`BackendError::QueryFailed`].
    pub fn query_failed(backend_name: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::QueryFailed {
            backend_name: backend_name.into(),
            message: message.into(),
        }
    }
}

/// Errors related to aggregation requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    /// The request did not carry a query.
    #[error("aggregation query should not be empty")]
    MissingQuery,

    /// The request did not name any aggregation.
    #[error("aggregations should not be empty")]
    EmptyDescriptors,

    /// A consulted backend cannot aggregate.
    #[error("{backend} does not implement aggregation")]
    MissingAggregator { backend: String },

    /// No aggregation capable backend is configured.
    #[error("no aggregation capable storage configured")]
    NoAggregator,

    /// Descriptor options do not match the descriptor type.
    #[error("invalid options for aggregation {name}: {message}")]
    InvalidOptions { name: String, message: String },
}

/// Result type alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// Returns the HTTP status class this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::Parameter(_) => StatusCode::BAD_REQUEST,
            QueryError::Iterator(IteratorError::Closed) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            QueryError::Aggregation(AggregationError::MissingQuery)
            | QueryError::Aggregation(AggregationError::EmptyDescriptors)
            | QueryError::Aggregation(AggregationError::InvalidOptions { .. }) => {
                StatusCode::BAD_REQUEST
            }
            QueryError::Iterator(IteratorError::OpNotSupported { .. })
            | QueryError::Backend(_)
            | QueryError::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true if the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns true if this error means the iterator was closed or canceled.
    pub fn is_closed(&self) -> bool {
        matches!(self, QueryError::Iterator(IteratorError::Closed))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Backend(BackendError::Decode {
            message: err.to_string(),
        })
    }
}

impl From<regex::Error> for QueryError {
    fn from(err: regex::Error) -> Self {
        QueryError::Parameter(ParameterError::invalid("regexp", err.to_string()))
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::Backend(BackendError::Internal {
            backend_name: "io".to_string(),
            message: err.to_string(),
        })
    }
}
