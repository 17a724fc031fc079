// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Statistical payloads carried by monitor objects.
//!
//! The framework never interprets detector data directly; it carries
//! payloads as a tagged union whose variants know how to reset themselves
//! and which merge class they belong to. The merge algorithm itself lives in
//! `qualo-merge`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reduction class of a payload, declared by the publishing task.
///
/// The merger refuses to mix classes on one publication path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeClass {
    /// Bin-wise / counter-wise sum.
    Additive,
    /// Numerator and denominator summed independently, divided at read time.
    Ratio,
    /// The sample with the largest validity wins.
    LatestWins,
    /// Not mergeable; replicas must not be produced.
    None,
}

impl fmt::Display for MergeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Additive => "additive",
            Self::Ratio => "ratio",
            Self::LatestWins => "latest-wins",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// A one-dimensional histogram with fixed equidistant binning.
///
/// Out-of-range fills land in the under/overflow counters, as the dashboards
/// expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histo1d {
    /// Lower edge of the axis.
    pub x_min: f64,
    /// Upper edge of the axis.
    pub x_max: f64,
    bins: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Histo1d {
    /// Create a histogram with `n_bins` equidistant bins over `[x_min, x_max)`.
    pub fn new(n_bins: usize, x_min: f64, x_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            bins: vec![0.0; n_bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Fill the histogram with a unit weight.
    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    /// Fill the histogram with an explicit weight.
    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        self.entries += 1;
        if x < self.x_min {
            self.underflow += weight;
            return;
        }
        if x >= self.x_max {
            self.overflow += weight;
            return;
        }
        let width = (self.x_max - self.x_min) / self.bins.len() as f64;
        let idx = ((x - self.x_min) / width) as usize;
        // rounding at the upper edge can land one past the end
        let idx = idx.min(self.bins.len() - 1);
        self.bins[idx] += weight;
    }

    /// Bin contents, without under/overflow.
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    /// Mutable bin contents, for adapters filling from external sources.
    pub fn bins_mut(&mut self) -> &mut [f64] {
        &mut self.bins
    }

    /// Number of fills, including out-of-range ones.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Weighted mean of the bin centers, `None` for an empty histogram.
    pub fn mean(&self) -> Option<f64> {
        let total = self.integral();
        if total == 0.0 {
            return None;
        }
        let width = (self.x_max - self.x_min) / self.bins.len() as f64;
        let weighted: f64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, w)| w * (self.x_min + (i as f64 + 0.5) * width))
            .sum();
        Some(weighted / total)
    }

    /// Whether `other` has the same axis definition.
    pub fn same_binning(&self, other: &Histo1d) -> bool {
        self.bins.len() == other.bins.len() && self.x_min == other.x_min && self.x_max == other.x_max
    }

    /// Bin-wise addition; the caller must have checked the binning.
    pub fn add(&mut self, other: &Histo1d) {
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.entries += other.entries;
    }

    /// Clear contents, keeping the binning.
    pub fn reset(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0.0);
        self.underflow = 0.0;
        self.overflow = 0.0;
        self.entries = 0;
    }
}

/// A ratio histogram keeping numerator and denominator separate.
///
/// Division is deferred to [`RatioHisto1d::values`] so that merging replicas
/// sums numerators and denominators first; dividing per replica and then
/// averaging would be wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioHisto1d {
    num: Histo1d,
    den: Histo1d,
}

impl RatioHisto1d {
    /// Create a ratio histogram; numerator and denominator share the axis.
    pub fn new(n_bins: usize, x_min: f64, x_max: f64) -> Self {
        Self {
            num: Histo1d::new(n_bins, x_min, x_max),
            den: Histo1d::new(n_bins, x_min, x_max),
        }
    }

    /// The numerator histogram.
    pub fn num(&self) -> &Histo1d {
        &self.num
    }

    /// The mutable numerator histogram.
    pub fn num_mut(&mut self) -> &mut Histo1d {
        &mut self.num
    }

    /// The denominator histogram.
    pub fn den(&self) -> &Histo1d {
        &self.den
    }

    /// The mutable denominator histogram.
    pub fn den_mut(&mut self) -> &mut Histo1d {
        &mut self.den
    }

    /// Bin-wise ratio; bins with a zero denominator yield 0.
    pub fn values(&self) -> Vec<f64> {
        self.num
            .bins()
            .iter()
            .zip(self.den.bins())
            .map(|(n, d)| if *d == 0.0 { 0.0 } else { n / d })
            .collect()
    }

    /// Whether `other` shares the axis definition.
    pub fn same_binning(&self, other: &RatioHisto1d) -> bool {
        self.num.same_binning(&other.num)
    }

    /// Sum numerators and denominators independently.
    pub fn add(&mut self, other: &RatioHisto1d) {
        self.num.add(&other.num);
        self.den.add(&other.den);
    }

    /// Clear both histograms.
    pub fn reset(&mut self) {
        self.num.reset();
        self.den.reset();
    }
}

/// An idempotent state sample; the newest sample wins under merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSample {
    /// Free-form state value, e.g. a JSON document.
    pub value: serde_json::Value,
    /// When the sample was taken, ms since epoch.
    pub sampled_at: u64,
}

/// A monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Counter {
    /// Current count.
    pub count: u64,
}

impl Counter {
    /// Increment by one.
    pub fn increment(&mut self) {
        self.count += 1;
    }

    /// Increment by `n`.
    pub fn add(&mut self, n: u64) {
        self.count += n;
    }
}

/// Discriminant of [`Payload`], used by checks to declare what they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A plain counter.
    Counter,
    /// A one-dimensional histogram.
    Histo1d,
    /// A ratio histogram.
    RatioHisto1d,
    /// An idempotent state sample.
    State,
    /// An opaque blob.
    Opaque,
}

/// The tagged union of payloads the framework can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A plain counter, additive under merge.
    Counter(Counter),
    /// A one-dimensional histogram, additive under merge.
    Histo1d(Histo1d),
    /// A ratio histogram with deferred division.
    RatioHisto1d(RatioHisto1d),
    /// An idempotent state sample, latest-wins under merge.
    State(StateSample),
    /// An opaque blob the framework passes through untouched.
    Opaque(Vec<u8>),
}

impl Payload {
    /// The discriminant of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Counter(_) => PayloadKind::Counter,
            Self::Histo1d(_) => PayloadKind::Histo1d,
            Self::RatioHisto1d(_) => PayloadKind::RatioHisto1d,
            Self::State(_) => PayloadKind::State,
            Self::Opaque(_) => PayloadKind::Opaque,
        }
    }

    /// The merge class the payload belongs to.
    pub fn merge_class(&self) -> MergeClass {
        match self {
            Self::Counter(_) | Self::Histo1d(_) => MergeClass::Additive,
            Self::RatioHisto1d(_) => MergeClass::Ratio,
            Self::State(_) => MergeClass::LatestWins,
            Self::Opaque(_) => MergeClass::None,
        }
    }

    /// Discard accumulated statistics, keeping the shape.
    pub fn reset(&mut self) {
        match self {
            Self::Counter(c) => c.count = 0,
            Self::Histo1d(h) => h.reset(),
            Self::RatioHisto1d(r) => r.reset(),
            Self::State(s) => {
                s.value = serde_json::Value::Null;
                s.sampled_at = 0;
            }
            Self::Opaque(b) => b.clear(),
        }
    }

    /// Serialize the payload snapshot for transport or storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a payload snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histo_fill_and_ranges() {
        let mut h = Histo1d::new(10, 0.0, 10.0);
        h.fill(0.5);
        h.fill(9.99);
        h.fill(-1.0);
        h.fill(10.0);
        assert_eq!(h.entries(), 4);
        assert_eq!(h.bins()[0], 1.0);
        assert_eq!(h.bins()[9], 1.0);
        assert_eq!(h.integral(), 2.0);
    }

    #[test]
    fn test_histo_mean() {
        let mut h = Histo1d::new(10, 0.0, 10.0);
        assert!(h.mean().is_none());
        h.fill(2.0);
        h.fill(3.0);
        // bin centers 2.5 and 3.5
        assert!((h.mean().unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_histo_add_and_reset() {
        let mut a = Histo1d::new(4, 0.0, 4.0);
        let mut b = Histo1d::new(4, 0.0, 4.0);
        a.fill(1.5);
        b.fill(1.5);
        b.fill(3.5);
        a.add(&b);
        assert_eq!(a.bins(), &[0.0, 2.0, 0.0, 1.0]);
        assert_eq!(a.entries(), 3);
        a.reset();
        assert_eq!(a.integral(), 0.0);
        assert_eq!(a.entries(), 0);
    }

    #[test]
    fn test_ratio_defers_division() {
        // Stream A: N=[10, 20], D=[100, 100]; stream B: N=[0, 40], D=[100, 100]
        let mut a = RatioHisto1d::new(2, 0.0, 2.0);
        a.num_mut().bins_mut().copy_from_slice(&[10.0, 20.0]);
        a.den_mut().bins_mut().copy_from_slice(&[100.0, 100.0]);
        let mut b = RatioHisto1d::new(2, 0.0, 2.0);
        b.num_mut().bins_mut().copy_from_slice(&[0.0, 40.0]);
        b.den_mut().bins_mut().copy_from_slice(&[100.0, 100.0]);

        a.add(&b);
        assert_eq!(a.values(), vec![0.05, 0.30]);
    }

    #[test]
    fn test_ratio_zero_denominator() {
        let r = RatioHisto1d::new(3, 0.0, 3.0);
        assert_eq!(r.values(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_merge_classes() {
        assert_eq!(
            Payload::Counter(Counter::default()).merge_class(),
            MergeClass::Additive
        );
        assert_eq!(
            Payload::Histo1d(Histo1d::new(1, 0.0, 1.0)).merge_class(),
            MergeClass::Additive
        );
        assert_eq!(
            Payload::RatioHisto1d(RatioHisto1d::new(1, 0.0, 1.0)).merge_class(),
            MergeClass::Ratio
        );
        assert_eq!(
            Payload::State(StateSample {
                value: serde_json::Value::Null,
                sampled_at: 0
            })
            .merge_class(),
            MergeClass::LatestWins
        );
        assert_eq!(Payload::Opaque(vec![1]).merge_class(), MergeClass::None);
    }

    #[test]
    fn test_payload_snapshot_round_trip() {
        let mut h = Histo1d::new(4, 0.0, 4.0);
        h.fill(2.2);
        let payload = Payload::Histo1d(h);
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(Payload::from_bytes(&bytes).unwrap(), payload);
    }
}
