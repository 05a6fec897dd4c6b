//! Series projection
//!
//! Derives renderable chart data from a [`HistorySnapshot`]:
//! - one label per sample (time, then epoch, then batch, then sequence)
//! - one value column per configured series, with gaps for absent values
//! - the configured axis bounds, passed through untouched
//!
//! [`project`] is the pure form. [`SeriesProjector`] caches derived rows
//! between updates and only derives rows for newly appended samples; its
//! output is always equal to `project` over the same snapshot.

use crate::error::AxisError;
use crate::history::HistorySnapshot;
use crate::sample::{MetricKey, MetricSample};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Optional fixed scale bounds for one axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl AxisRange {
    /// Range with both bounds fixed
    #[inline]
    #[must_use]
    pub fn fixed(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

/// What to project and how the consumer should scale it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Series to emit, in display order
    pub series: Vec<MetricKey>,
    /// Scale bounds per series
    pub bounds: BTreeMap<MetricKey, AxisRange>,
    /// Only project the most recent `window` samples
    pub window: Option<NonZeroUsize>,
}

impl AxisConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With series list
    #[must_use]
    pub fn with_series(mut self, series: impl IntoIterator<Item = MetricKey>) -> Self {
        self.series = series.into_iter().collect();
        self
    }

    /// With fixed bounds for one series
    #[must_use]
    pub fn with_bounds(mut self, key: MetricKey, range: AxisRange) -> Self {
        self.bounds.insert(key, range);
        self
    }

    /// With display window
    #[inline]
    #[must_use]
    pub fn with_window(mut self, window: Option<NonZeroUsize>) -> Self {
        self.window = window;
        self
    }

    /// Check bounds are finite and ordered
    ///
    /// # Errors
    /// - `AxisError::NoSeries` if the series list is empty
    /// - `AxisError::NonFinite` / `AxisError::Inverted` for a bad range
    pub fn validate(&self) -> Result<(), AxisError> {
        if self.series.is_empty() {
            return Err(AxisError::NoSeries);
        }
        for (key, range) in &self.bounds {
            let finite = |b: Option<f64>| b.map_or(true, f64::is_finite);
            if !finite(range.min) || !finite(range.max) {
                return Err(AxisError::NonFinite {
                    key: key.to_string(),
                });
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(AxisError::Inverted {
                        key: key.to_string(),
                        min,
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            series: vec![MetricKey::Loss, MetricKey::Accuracy],
            bounds: BTreeMap::from([
                (MetricKey::Loss, AxisRange::fixed(0.0, 2.0)),
                (MetricKey::Accuracy, AxisRange::fixed(0.0, 1.0)),
            ]),
            window: None,
        }
    }
}

/// Chart-ready data
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projection {
    /// X-axis labels, one per projected sample
    pub labels: Vec<String>,
    /// Values per series; `None` is a gap in the line
    pub series: IndexMap<MetricKey, Vec<Option<f64>>>,
    /// Scale bounds the consumer should apply
    pub bounds: BTreeMap<MetricKey, AxisRange>,
}

impl Projection {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// No rows, one empty column per configured series
    fn empty(config: &AxisConfig) -> Self {
        Self {
            labels: Vec::new(),
            series: config
                .series
                .iter()
                .map(|key| (key.clone(), Vec::new()))
                .collect(),
            bounds: config.bounds.clone(),
        }
    }

    fn push_row(&mut self, seq: u64, sample: &MetricSample) {
        self.labels.push(label_for(seq, sample));
        for (key, column) in &mut self.series {
            column.push(sample.metric(key));
        }
    }

    fn drop_front(&mut self, count: usize) {
        self.labels.drain(..count);
        for column in self.series.values_mut() {
            column.drain(..count);
        }
    }
}

/// Project a snapshot into chart series
#[must_use]
pub fn project(snapshot: &HistorySnapshot<'_>, config: &AxisConfig) -> Projection {
    let mut projection = Projection::empty(config);
    for (seq, sample) in snapshot.sequenced_from(window_start(snapshot, config)) {
        projection.push_row(seq, sample);
    }
    projection
}

/// Label for one sample: time, else epoch, else batch, else sequence
#[must_use]
pub fn label_for(seq: u64, sample: &MetricSample) -> String {
    if let Some(at) = sample.timestamp() {
        return at.format("%H:%M:%S").to_string();
    }
    if let Some(epoch) = sample.epoch() {
        return format!("epoch {epoch}");
    }
    if let Some(batch) = sample.batch() {
        return format!("batch {batch}");
    }
    format!("#{seq}")
}

/// First sequence number inside the display window
fn window_start(snapshot: &HistorySnapshot<'_>, config: &AxisConfig) -> u64 {
    config.window.map_or(snapshot.first_seq(), |w| {
        snapshot
            .end_seq()
            .saturating_sub(w.get() as u64)
            .max(snapshot.first_seq())
    })
}

/// Incremental projector
///
/// Keeps the projection built on the previous update and edits its columns
/// in place: rows for new samples are pushed, rows that left the history or
/// the window are dropped from the front. The cache is reused while the
/// history is still the same lineage, checked by pointer identity of the
/// newest projected sample.
#[derive(Debug)]
pub struct SeriesProjector {
    config: AxisConfig,
    projection: Projection,
    /// Sequence number of each projected row, oldest first
    seqs: VecDeque<u64>,
    /// Newest sample a row was derived from
    tail: Option<Arc<MetricSample>>,
    derived: u64,
}

impl SeriesProjector {
    /// Create projector with an empty cache
    #[inline]
    #[must_use]
    pub fn new(config: AxisConfig) -> Self {
        Self {
            projection: Projection::empty(&config),
            config,
            seqs: VecDeque::new(),
            tail: None,
            derived: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AxisConfig {
        &self.config
    }

    /// Swap configuration; cached rows are dropped
    pub fn set_config(&mut self, config: AxisConfig) {
        if config != self.config {
            self.config = config;
            self.reset();
        }
    }

    /// Drop all cached rows
    pub fn reset(&mut self) {
        self.projection = Projection::empty(&self.config);
        self.seqs.clear();
        self.tail = None;
    }

    /// Number of rows derived since construction
    #[inline]
    #[must_use]
    pub fn rows_derived(&self) -> u64 {
        self.derived
    }

    /// Bring the cache up to date with `snapshot` and return the projection
    pub fn update(&mut self, snapshot: &HistorySnapshot<'_>) -> &Projection {
        if !self.cache_matches(snapshot) {
            if !self.seqs.is_empty() {
                tracing::debug!("history lineage changed; rebuilding projection");
            }
            self.reset();
        }

        // Evicted from the store, or pushed out of the display window
        let start = window_start(snapshot, &self.config);
        let stale = self.seqs.iter().take_while(|&&seq| seq < start).count();
        if stale > 0 {
            self.seqs.drain(..stale);
            self.projection.drop_front(stale);
        }

        let from = self.seqs.back().map_or(start, |seq| seq + 1);
        for (seq, sample) in snapshot.sequenced_from(from) {
            self.seqs.push_back(seq);
            self.projection.push_row(seq, sample);
            self.derived += 1;
        }
        self.tail = snapshot.latest().cloned();

        &self.projection
    }

    fn cache_matches(&self, snapshot: &HistorySnapshot<'_>) -> bool {
        match (&self.tail, self.seqs.back()) {
            (Some(tail), Some(&seq)) => snapshot
                .get(seq)
                .is_some_and(|sample| Arc::ptr_eq(sample, tail)),
            _ => false,
        }
    }
}

impl Default for SeriesProjector {
    fn default() -> Self {
        Self::new(AxisConfig::default())
    }
}
