//! Aggregation request and response types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AggregationError;

use super::selector::Selector;

/// Bucketing strategy of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    /// Time buckets, ordered ascending by key.
    Histogram,
    /// Value buckets, ordered descending by count.
    Terms,
}

/// Options of a histogram aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramOptions {
    /// Lower bound for the computed interval in nanoseconds.
    pub minimum_interval: i64,
    /// Desired number of buckets.
    pub preferred_points: i64,
    /// Fixed interval in nanoseconds. Wins over the computed one when set.
    pub fixed_interval: i64,
}

impl HistogramOptions {
    /// Bucket width for a range of `span` nanoseconds. Never below one.
    pub fn interval(&self, span: i64) -> i64 {
        if self.fixed_interval > 0 {
            return self.fixed_interval;
        }
        let mut interval = if self.preferred_points > 0 {
            span / self.preferred_points
        } else {
            span
        };
        if interval < self.minimum_interval {
            interval = self.minimum_interval;
        }
        interval.max(1)
    }
}

/// Options of a terms aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermsOptions {
    /// Keep at most this many buckets. Zero keeps all.
    pub size: usize,
    /// Key used for items lacking the field.
    pub missing: Option<Value>,
}

/// Type specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AggregationOptions {
    /// Histogram options.
    Histogram(HistogramOptions),
    /// Terms options.
    Terms(TermsOptions),
}

/// One named aggregation in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationDescriptor {
    /// Result key.
    pub name: String,
    /// Field aggregated over.
    pub field: String,
    /// Governs bucket ordering of the merged result.
    pub typ: AggregationType,
    /// Type specific options.
    pub options: AggregationOptions,
}

impl AggregationDescriptor {
    /// Creates a histogram descriptor.
    pub fn histogram(name: impl Into<String>, field: impl Into<String>, options: HistogramOptions) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            typ: AggregationType::Histogram,
            options: AggregationOptions::Histogram(options),
        }
    }

    /// Creates a terms descriptor.
    pub fn terms(name: impl Into<String>, field: impl Into<String>, options: TermsOptions) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            typ: AggregationType::Terms,
            options: AggregationOptions::Terms(options),
        }
    }

    /// Checks that the options agree with the declared type.
    pub fn validate(&self) -> Result<(), AggregationError> {
        let invalid = |message: &str| AggregationError::InvalidOptions {
            name: self.name.clone(),
            message: message.to_string(),
        };
        match (&self.typ, &self.options) {
            (AggregationType::Histogram, AggregationOptions::Histogram(opts)) => {
                if opts.fixed_interval < 0 || opts.minimum_interval < 0 || opts.preferred_points < 0 {
                    return Err(invalid("histogram intervals must not be negative"));
                }
                Ok(())
            }
            (AggregationType::Terms, AggregationOptions::Terms(_)) => Ok(()),
            _ => Err(invalid("options do not match aggregation type")),
        }
    }

    /// Terms bucket limit, zero when unbounded or not a terms descriptor.
    pub fn terms_size(&self) -> usize {
        match &self.options {
            AggregationOptions::Terms(opts) => opts.size,
            AggregationOptions::Histogram(_) => 0,
        }
    }
}

/// An aggregation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Items to aggregate over.
    pub selector: Option<Selector>,
    /// Aggregations to compute.
    pub descriptors: Vec<AggregationDescriptor>,
}

impl Aggregation {
    /// Validates the request shape.
    pub fn validate(&self) -> Result<(), AggregationError> {
        if self.selector.is_none() {
            return Err(AggregationError::MissingQuery);
        }
        if self.descriptors.is_empty() {
            return Err(AggregationError::EmptyDescriptors);
        }
        self.descriptors.iter().try_for_each(AggregationDescriptor::validate)
    }
}

/// One key/count pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    /// Bucket key. Histogram keys are bucket start timestamps.
    pub key: Value,
    /// Items in the bucket.
    pub count: i64,
}

impl AggregationBucket {
    /// Creates a bucket.
    pub fn new(key: impl Into<Value>, count: i64) -> Self {
        Self {
            key: key.into(),
            count,
        }
    }
}

/// Buckets of one aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Ordered buckets.
    pub buckets: Vec<AggregationBucket>,
}

/// Aggregations of one backend, or of several after merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResponse {
    /// Items matched.
    pub total: i64,
    /// Results by descriptor name.
    pub aggregations: HashMap<String, AggregationResult>,
}
