//! History store
//!
//! Append-only, optionally bounded sequence of samples for one subscription.
//!
//! Every appended sample gets a sequence number, starting at 1 after
//! construction or [`HistoryStore::clear`]. Eviction only ever removes from
//! the front, so the retained entries always cover a contiguous range of
//! sequence numbers.

use crate::sample::MetricSample;
use serde::{Deserialize, Serialize};
use std::collections::vec_deque;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// How much history to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep everything
    #[default]
    Unbounded,
    /// Keep the most recent `n` samples
    LastN(NonZeroUsize),
}

impl RetentionPolicy {
    /// Convenience constructor; `0` means unbounded
    #[inline]
    #[must_use]
    pub fn last_n(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Self::Unbounded, Self::LastN)
    }

    /// Maximum retained length, if bounded
    #[inline]
    #[must_use]
    pub fn limit(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::LastN(n) => Some(n.get()),
        }
    }
}

/// Ordered sample history for one subscription
#[derive(Debug)]
pub struct HistoryStore {
    retention: RetentionPolicy,
    entries: VecDeque<Arc<MetricSample>>,
    /// Sequence number of `entries[0]`
    first_seq: u64,
}

impl HistoryStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new(retention: RetentionPolicy) -> Self {
        let entries = match retention {
            RetentionPolicy::LastN(n) => VecDeque::with_capacity(n.get().min(4096) + 1),
            RetentionPolicy::Unbounded => VecDeque::new(),
        };
        Self {
            retention,
            entries,
            first_seq: 1,
        }
    }

    /// Append a sample, evicting from the front past the retention limit
    ///
    /// Returns the shared handle now stored at the back.
    pub fn append(&mut self, sample: MetricSample) -> Arc<MetricSample> {
        let sample = Arc::new(sample);
        self.entries.push_back(Arc::clone(&sample));

        if let Some(limit) = self.retention.limit() {
            while self.entries.len() > limit {
                self.entries.pop_front();
                self.first_seq += 1;
            }
        }

        sample
    }

    /// Drop all entries and restart numbering
    pub fn clear(&mut self) {
        self.entries.clear();
        self.first_seq = 1;
    }

    /// Read-only ordered view
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot<'_> {
        HistorySnapshot {
            first_seq: self.first_seq,
            entries: &self.entries,
        }
    }

    /// Most recently appended sample
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&Arc<MetricSample>> {
        self.entries.back()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Total samples appended since construction or the last clear
    #[inline]
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.first_seq - 1 + self.entries.len() as u64
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::Unbounded)
    }
}

/// Borrowed, read-only view of a [`HistoryStore`]
#[derive(Debug, Clone, Copy)]
pub struct HistorySnapshot<'a> {
    first_seq: u64,
    entries: &'a VecDeque<Arc<MetricSample>>,
}

static EMPTY: VecDeque<Arc<MetricSample>> = VecDeque::new();

impl HistorySnapshot<'static> {
    /// Snapshot with no entries, for when nothing is subscribed
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            first_seq: 1,
            entries: &EMPTY,
        }
    }
}

impl<'a> HistorySnapshot<'a> {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number of the oldest retained sample
    #[inline]
    #[must_use]
    pub fn first_seq(&self) -> u64 {
        self.first_seq
    }

    /// Sequence number the next append will receive
    #[inline]
    #[must_use]
    pub fn end_seq(&self) -> u64 {
        self.first_seq + self.entries.len() as u64
    }

    /// Sample with the given sequence number, if still retained
    #[must_use]
    pub fn get(&self, seq: u64) -> Option<&'a Arc<MetricSample>> {
        let offset = seq.checked_sub(self.first_seq)?;
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&'a Arc<MetricSample>> {
        self.entries.back()
    }

    /// Samples in receipt order
    #[inline]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &'a MetricSample> + ExactSizeIterator {
        self.entries.iter().map(|s| &**s)
    }

    /// `(sequence, sample)` pairs starting at `from_seq`
    pub fn sequenced_from(&self, from_seq: u64) -> Sequenced<'a> {
        let skip = usize::try_from(from_seq.saturating_sub(self.first_seq)).unwrap_or(usize::MAX);
        let skip = skip.min(self.entries.len());
        Sequenced {
            next_seq: self.first_seq + skip as u64,
            inner: self.entries.range(skip..),
        }
    }

    /// Owned copy of the retained samples
    #[must_use]
    pub fn to_vec(&self) -> Vec<MetricSample> {
        self.iter().cloned().collect()
    }
}

/// Iterator over `(sequence, sample)` pairs
#[derive(Debug, Clone)]
pub struct Sequenced<'a> {
    next_seq: u64,
    inner: vec_deque::Iter<'a, Arc<MetricSample>>,
}

impl<'a> Iterator for Sequenced<'a> {
    type Item = (u64, &'a Arc<MetricSample>);

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.inner.next()?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Some((seq, sample))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Sequenced<'_> {}
