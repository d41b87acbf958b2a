//! Data model shared by every layer of the query core.

pub mod aggregation;
pub mod log_item;
pub mod selector;

pub use aggregation::{
    Aggregation, AggregationBucket, AggregationDescriptor, AggregationOptions, AggregationResponse,
    AggregationResult, AggregationType, HistogramOptions, TermsOptions,
};
pub use log_item::{LogItem, TAG_PREFIX, compare_items, compare_position, format_timestamp};
pub use selector::{
    CLUSTER_NAME, CONTAINER_NAME, Filter, ID, IS_FALLBACK, IS_FIRST_QUERY, IS_LIVE, IterateStyle,
    Operator, POD_NAME, POD_NAMESPACE, QueryMeta, ResultSkip, ReturnFields, SCHEME_ADVANCED,
    SCHEME_CONTAINER, SCHEME_TRACE, SELECTOR_KEY_COUNT, Selector, UniqueId, matches_all,
};
