//! Metric samples
//!
//! A [`MetricSample`] is one push event from a training process. Samples are
//! immutable once built; the only way to build one is [`SampleBuilder`],
//! which enforces the "at least one metric" invariant and drops non-finite
//! values.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One decoded metrics push
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    training_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    epoch: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_batches: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    custom_metrics: BTreeMap<String, f64>,
}

impl MetricSample {
    /// Start building a sample
    #[inline]
    #[must_use]
    pub fn builder() -> SampleBuilder {
        SampleBuilder::default()
    }

    /// Training job that produced the sample, if reported
    #[inline]
    #[must_use]
    pub fn training_id(&self) -> Option<&str> {
        self.training_id.as_deref()
    }

    /// Reported wall-clock time
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Epoch counter
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Option<i64> {
        self.epoch
    }

    /// Batch counter within the epoch
    #[inline]
    #[must_use]
    pub fn batch(&self) -> Option<i64> {
        self.batch
    }

    /// Batches per epoch, when the trainer reports it
    #[inline]
    #[must_use]
    pub fn total_batches(&self) -> Option<i64> {
        self.total_batches
    }

    /// Training loss
    #[inline]
    #[must_use]
    pub fn loss(&self) -> Option<f64> {
        self.loss
    }

    /// Reported accuracy
    #[inline]
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    /// Optimizer learning rate
    #[inline]
    #[must_use]
    pub fn learning_rate(&self) -> Option<f64> {
        self.learning_rate
    }

    /// Free-form numeric metrics, keyed by name
    #[inline]
    #[must_use]
    pub fn custom_metrics(&self) -> &BTreeMap<String, f64> {
        &self.custom_metrics
    }

    /// Look up any metric by key
    #[must_use]
    pub fn metric(&self, key: &MetricKey) -> Option<f64> {
        match key {
            MetricKey::Loss => self.loss,
            MetricKey::Accuracy => self.accuracy,
            MetricKey::LearningRate => self.learning_rate,
            MetricKey::Custom(name) => self.custom_metrics.get(name).copied(),
        }
    }
}

/// Builder for [`MetricSample`]
///
/// Non-finite numbers are treated as absent, never as zero.
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    inner: MetricSample,
}

impl Default for SampleBuilder {
    fn default() -> Self {
        let inner = MetricSample {
            training_id: None,
            timestamp: None,
            epoch: None,
            batch: None,
            total_batches: None,
            loss: None,
            accuracy: None,
            learning_rate: None,
            custom_metrics: BTreeMap::new(),
        };
        Self { inner }
    }
}

impl SampleBuilder {
    #[inline]
    #[must_use]
    pub fn training_id(mut self, id: impl Into<String>) -> Self {
        self.inner.training_id = Some(id.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.inner.timestamp = Some(at);
        self
    }

    #[inline]
    #[must_use]
    pub fn epoch(mut self, epoch: i64) -> Self {
        self.inner.epoch = Some(epoch);
        self
    }

    #[inline]
    #[must_use]
    pub fn batch(mut self, batch: i64) -> Self {
        self.inner.batch = Some(batch);
        self
    }

    #[inline]
    #[must_use]
    pub fn total_batches(mut self, total: i64) -> Self {
        self.inner.total_batches = Some(total);
        self
    }

    #[inline]
    #[must_use]
    pub fn loss(mut self, value: f64) -> Self {
        self.inner.loss = finite(value);
        self
    }

    #[inline]
    #[must_use]
    pub fn accuracy(mut self, value: f64) -> Self {
        self.inner.accuracy = finite(value);
        self
    }

    #[inline]
    #[must_use]
    pub fn learning_rate(mut self, value: f64) -> Self {
        self.inner.learning_rate = finite(value);
        self
    }

    /// Add a custom metric; non-finite values are skipped
    #[must_use]
    pub fn custom_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        if let Some(value) = finite(value) {
            self.inner.custom_metrics.insert(name.into(), value);
        }
        self
    }

    /// Finish the sample
    ///
    /// # Errors
    /// - `DecodeError::Schema` if neither loss, accuracy nor any custom
    ///   metric is present
    pub fn build(self) -> Result<MetricSample, DecodeError> {
        let sample = self.inner;
        if sample.loss.is_none() && sample.accuracy.is_none() && sample.custom_metrics.is_empty()
        {
            return Err(DecodeError::Schema(
                "needs loss, accuracy or at least one custom metric".to_string(),
            ));
        }
        Ok(sample)
    }
}

#[inline]
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Name of a plottable metric
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricKey {
    /// `loss`
    Loss,
    /// `accuracy`
    Accuracy,
    /// `learning_rate`
    LearningRate,
    /// Entry of `custom_metrics`
    Custom(String),
}

impl MetricKey {
    /// Wire name of the metric
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Loss => "loss",
            Self::Accuracy => "accuracy",
            Self::LearningRate => "learning_rate",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("metric key cannot be empty".to_string()),
            "loss" => Ok(Self::Loss),
            "accuracy" => Ok(Self::Accuracy),
            "learning_rate" => Ok(Self::LearningRate),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

impl TryFrom<String> for MetricKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.as_str().to_string()
    }
}
