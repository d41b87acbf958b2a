//! Cross-backend aggregation merging.
//!
//! Responses are merged per descriptor name of the request. Bucket counts
//! with equal keys are summed and totals are added. Terms buckets end up
//! ordered by descending count, histogram buckets by ascending key. The
//! ordering is taken from the request descriptor, never from a response.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::{Aggregator, DynStorage, QueryContext};
use crate::error::{AggregationError, QueryResult};
use crate::types::{
    Aggregation, AggregationBucket, AggregationDescriptor, AggregationResponse, AggregationResult,
    AggregationType,
};

/// Fans an aggregation out to several storages and merges the responses.
pub struct MergedAggregator {
    storages: Vec<DynStorage>,
}

impl std::fmt::Debug for MergedAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedAggregator")
            .field(
                "storages",
                &self.storages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MergedAggregator {
    /// Creates a merged aggregator. Every storage must be able to aggregate.
    pub fn new(storages: Vec<DynStorage>) -> Result<Self, AggregationError> {
        if storages.is_empty() {
            return Err(AggregationError::NoAggregator);
        }
        if let Some(storage) = storages.iter().find(|s| s.as_aggregator().is_none()) {
            return Err(AggregationError::MissingAggregator {
                backend: storage.name().to_string(),
            });
        }
        Ok(Self { storages })
    }
}

#[async_trait]
impl Aggregator for MergedAggregator {
    async fn aggregate(&self, ctx: &QueryContext, req: &Aggregation) -> QueryResult<AggregationResponse> {
        req.validate()?;
        let mut responses = Vec::with_capacity(self.storages.len());
        for storage in &self.storages {
            let Some(aggregator) = storage.as_aggregator() else {
                return Err(AggregationError::MissingAggregator {
                    backend: storage.name().to_string(),
                }
                .into());
            };
            let resp = aggregator.aggregate(ctx, req).await?;
            debug!(backend = %storage.name(), total = resp.total, "Aggregation response");
            responses.push(resp);
        }
        Ok(merge_responses(&req.descriptors, responses))
    }
}

/// Merges per-backend responses for the same descriptor set.
pub fn merge_responses(
    descriptors: &[AggregationDescriptor],
    responses: Vec<AggregationResponse>,
) -> AggregationResponse {
    let mut merged = AggregationResponse {
        total: responses.iter().map(|r| r.total).sum(),
        aggregations: HashMap::with_capacity(descriptors.len()),
    };

    for desc in descriptors {
        let mut order: Vec<AggregationBucket> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for resp in &responses {
            let Some(result) = resp.aggregations.get(&desc.name) else {
                continue;
            };
            for bucket in &result.buckets {
                let key = key_string(&bucket.key);
                match index.get(&key) {
                    Some(&i) => order[i].count += bucket.count,
                    None => {
                        index.insert(key, order.len());
                        order.push(bucket.clone());
                    }
                }
            }
        }

        match desc.typ {
            AggregationType::Terms => {
                // stable sort keeps first-seen order among equal counts
                order.sort_by(|a, b| b.count.cmp(&a.count));
                let size = desc.terms_size();
                if size > 0 {
                    order.truncate(size);
                }
            }
            AggregationType::Histogram => {
                order.sort_by(|a, b| compare_keys(&a.key, &b.key));
            }
        }
        merged
            .aggregations
            .insert(desc.name.clone(), AggregationResult { buckets: order });
    }
    merged
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => key_string(a).cmp(&key_string(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistogramOptions, TermsOptions};

    fn kv(key: impl Into<Value>, count: i64) -> (Value, i64) {
        (key.into(), count)
    }

    fn response(name: &str, total: i64, buckets: Vec<(Value, i64)>) -> AggregationResponse {
        let mut aggregations = HashMap::new();
        aggregations.insert(
            name.to_string(),
            AggregationResult {
                buckets: buckets
                    .into_iter()
                    .map(|(k, c)| AggregationBucket::new(k, c))
                    .collect(),
            },
        );
        AggregationResponse {
            total,
            aggregations,
        }
    }

    fn keys_and_counts(resp: &AggregationResponse, name: &str) -> Vec<(Value, i64)> {
        resp.aggregations[name]
            .buckets
            .iter()
            .map(|b| (b.key.clone(), b.count))
            .collect()
    }

    #[test]
    fn test_terms_merge_sorted_by_count_desc() {
        let desc = vec![AggregationDescriptor::terms("level", "tags.level", TermsOptions::default())];
        let merged = merge_responses(
            &desc,
            vec![
                response("level", 5, vec![kv("A", 3), kv("B", 2)]),
                response("level", 6, vec![kv("A", 1), kv("C", 5)]),
            ],
        );
        assert_eq!(merged.total, 11);
        assert_eq!(
            keys_and_counts(&merged, "level"),
            vec![kv("C", 5), kv("A", 4), kv("B", 2)]
        );
    }

    #[test]
    fn test_terms_size_truncates() {
        let desc = vec![AggregationDescriptor::terms(
            "level",
            "tags.level",
            TermsOptions {
                size: 1,
                missing: None,
            },
        )];
        let merged = merge_responses(
            &desc,
            vec![response("level", 0, vec![kv("A", 3), kv("B", 9)])],
        );
        assert_eq!(keys_and_counts(&merged, "level"), vec![kv("B", 9)]);
    }

    #[test]
    fn test_histogram_sorted_by_key_asc() {
        let desc = vec![AggregationDescriptor::histogram(
            "hist",
            "timestamp",
            HistogramOptions::default(),
        )];
        let merged = merge_responses(
            &desc,
            vec![
                response("hist", 0, vec![kv(200, 1), kv(1000, 4)]),
                response("hist", 0, vec![kv(30, 2), kv(200, 5)]),
            ],
        );
        assert_eq!(
            keys_and_counts(&merged, "hist"),
            vec![kv(30, 2), kv(200, 6), kv(1000, 4)]
        );
    }

    #[test]
    fn test_missing_descriptor_is_empty() {
        let desc = vec![
            AggregationDescriptor::terms("a", "stream", TermsOptions::default()),
            AggregationDescriptor::terms("b", "source", TermsOptions::default()),
        ];
        let merged = merge_responses(&desc, vec![response("a", 1, vec![kv("x", 1)])]);
        assert!(merged.aggregations["b"].buckets.is_empty());
        assert_eq!(merged.aggregations["a"].buckets.len(), 1);
    }

    #[test]
    fn test_type_comes_from_request() {
        // the same buckets read as a histogram sort by key, not by count
        let desc = vec![AggregationDescriptor::histogram(
            "x",
            "timestamp",
            HistogramOptions::default(),
        )];
        let merged = merge_responses(
            &desc,
            vec![response("x", 0, vec![kv(2, 10), kv(1, 1)])],
        );
        assert_eq!(
            keys_and_counts(&merged, "x"),
            vec![kv(1, 1), kv(2, 10)]
        );
    }

    #[test]
    fn test_new_requires_storages() {
        assert_eq!(
            MergedAggregator::new(vec![]).unwrap_err(),
            AggregationError::NoAggregator
        );
    }
}
