//! Response time histogram with fixed bucket boundaries
//!
//! Every histogram taking part in accumulate/delta arithmetic must share the same
//! [`BucketLayout`]. The layout is fixed when the run starts; two histograms with
//! different layouts meeting in `accumulate` or `delta` is a fatal error.
//!
//! Buckets are half-open: a layout with bounds `[1, 2, 4]` has the buckets
//! `[0,1) [1,2) [2,4) [4,MAX]`.
//!
//! # Example
//!
//! ```
//! use fspulse::stats::histogram::{BucketLayout, ResponseHistogram};
//! use std::sync::Arc;
//!
//! let layout = Arc::new(BucketLayout::default());
//! let mut hist = ResponseHistogram::new(layout);
//! hist.add(150);
//! hist.add(3);
//! assert_eq!(hist.total(), 2);
//! ```

use crate::error::FatalError;
use crate::Result;
use std::sync::Arc;

/// Maximum number of buckets a layout may have
pub const MAX_BUCKETS: usize = 1024;

/// Upper bound of the default doubling layout (2^31 microseconds)
const DEFAULT_TOP: u64 = 1 << 31;

/// Bucket boundaries shared by all histograms of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLayout {
    bounds: Vec<u64>,
}

impl BucketLayout {
    /// Build a layout from explicit bucket bounds (microseconds)
    ///
    /// # Errors
    ///
    /// Bounds must be non-empty, start above zero and strictly increase, and
    /// the resulting layout must not exceed [`MAX_BUCKETS`].
    pub fn from_bounds(bounds: Vec<u64>) -> Result<Self> {
        if bounds.is_empty() {
            return Err(FatalError::InvalidBucketLayout("no bucket bounds".to_string()).into());
        }
        if bounds[0] == 0 {
            return Err(FatalError::InvalidBucketLayout("first bound must be non-zero".to_string()).into());
        }
        if let Some(w) = bounds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(FatalError::InvalidBucketLayout(format!(
                "bounds must increase: {} followed by {}",
                w[0], w[1]
            ))
            .into());
        }
        if bounds.len() + 1 > MAX_BUCKETS {
            return Err(FatalError::InvalidBucketLayout(format!(
                "{} buckets exceeds the limit of {}",
                bounds.len() + 1,
                MAX_BUCKETS
            ))
            .into());
        }
        Ok(Self { bounds })
    }

    /// Doubling layout: `start`, `2*start`, ... up to and including `end`
    pub fn doubling(start: u64, end: u64) -> Result<Self> {
        if start == 0 || end < start {
            return Err(FatalError::InvalidBucketLayout(format!(
                "invalid doubling range {}-{}",
                start, end
            ))
            .into());
        }
        let mut bounds = Vec::new();
        let mut b = start;
        while b <= end {
            bounds.push(b);
            match b.checked_mul(2) {
                Some(next) => b = next,
                None => break,
            }
        }
        Self::from_bounds(bounds)
    }

    /// Number of buckets, including the open-ended last one
    pub fn len(&self) -> usize {
        self.bounds.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Bucket index for a response time
    #[inline]
    pub fn index_of(&self, micros: u64) -> usize {
        self.bounds.partition_point(|&b| b <= micros)
    }

    /// Inclusive lower and exclusive upper edge of a bucket
    pub fn range(&self, idx: usize) -> (u64, u64) {
        let low = if idx == 0 { 0 } else { self.bounds[idx - 1] };
        let high = self.bounds.get(idx).copied().unwrap_or(u64::MAX);
        (low, high)
    }
}

impl Default for BucketLayout {
    fn default() -> Self {
        let bounds = std::iter::successors(Some(1u64), |b| Some(b * 2))
            .take_while(|&b| b <= DEFAULT_TOP)
            .collect();
        Self { bounds }
    }
}

/// Fixed-bucket response time histogram
#[derive(Debug, Clone)]
pub struct ResponseHistogram {
    layout: Arc<BucketLayout>,
    counts: Vec<u64>,
}

impl ResponseHistogram {
    /// Create an empty histogram over `layout`
    pub fn new(layout: Arc<BucketLayout>) -> Self {
        let counts = vec![0; layout.len()];
        Self { layout, counts }
    }

    pub fn layout(&self) -> &Arc<BucketLayout> {
        &self.layout
    }

    /// Add one sample
    #[inline]
    pub fn add(&mut self, micros: u64) {
        let idx = self.layout.index_of(micros);
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total number of samples
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    fn check_layout(&self, other: &ResponseHistogram) -> Result<()> {
        if Arc::ptr_eq(&self.layout, &other.layout) || self.layout == other.layout {
            Ok(())
        } else {
            Err(FatalError::BucketLayoutMismatch {
                left: self.layout.len(),
                right: other.layout.len(),
            }
            .into())
        }
    }

    /// Add every bucket of `other` to this histogram
    pub fn accumulate(&mut self, other: &ResponseHistogram) -> Result<()> {
        self.check_layout(other)?;
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        Ok(())
    }

    /// Bucket-wise `current - previous`
    ///
    /// # Errors
    ///
    /// A bucket of `previous` larger than the same bucket of `current` means the
    /// counters were reset underneath us and is reported as
    /// [`FatalError::NegativeDelta`].
    pub fn delta(current: &ResponseHistogram, previous: &ResponseHistogram) -> Result<Self> {
        current.check_layout(previous)?;
        let mut counts = Vec::with_capacity(current.counts.len());
        for (idx, (&cur, &prev)) in current.counts.iter().zip(&previous.counts).enumerate() {
            let value = cur.checked_sub(prev).ok_or_else(|| {
                let (low, high) = current.layout.range(idx);
                FatalError::NegativeDelta {
                    field: format!("histogram bucket [{},{})", low, high),
                    current: cur,
                    previous: prev,
                }
            })?;
            counts.push(value);
        }
        Ok(Self {
            layout: Arc::clone(&current.layout),
            counts,
        })
    }

    /// Overwrite this histogram with the contents of `other`
    pub fn copy_from(&mut self, other: &ResponseHistogram) -> Result<()> {
        self.check_layout(other)?;
        self.counts.copy_from_slice(&other.counts);
        Ok(())
    }

    /// Estimate a percentile (0.0-100.0) as the upper edge of the bucket
    /// containing it. Returns 0 for an empty histogram.
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let target = ((p / 100.0) * total as f64).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (idx, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return self.layout.range(idx).1;
            }
        }
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_fatal;

    fn layout() -> Arc<BucketLayout> {
        Arc::new(BucketLayout::default())
    }

    #[test]
    fn test_default_layout() {
        let l = BucketLayout::default();
        // 1, 2, 4 ... 2^31 plus the open-ended bucket
        assert_eq!(l.len(), 33);
        assert_eq!(l.index_of(0), 0);
        assert_eq!(l.index_of(1), 1);
        assert_eq!(l.index_of(3), 2);
        assert_eq!(l.index_of(4), 3);
        assert_eq!(l.index_of(u64::MAX), 32);
        assert_eq!(l.range(32), (1 << 31, u64::MAX));
    }

    #[test]
    fn test_from_bounds_validation() {
        assert!(BucketLayout::from_bounds(vec![]).is_err());
        assert!(BucketLayout::from_bounds(vec![0, 10]).is_err());
        assert!(BucketLayout::from_bounds(vec![10, 10]).is_err());
        assert!(BucketLayout::from_bounds(vec![10, 5]).is_err());
        assert!(BucketLayout::from_bounds((1..=MAX_BUCKETS as u64).collect()).is_err());
        assert!(BucketLayout::from_bounds(vec![10, 20, 50]).is_ok());
    }

    #[test]
    fn test_doubling_matches_default() {
        let l = BucketLayout::doubling(1, 1 << 31).unwrap();
        assert_eq!(l, BucketLayout::default());
    }

    #[test]
    fn test_add_and_total() {
        let mut h = ResponseHistogram::new(layout());
        h.add(0);
        h.add(100);
        h.add(100);
        assert_eq!(h.total(), 3);
        assert_eq!(h.counts()[0], 1);
        assert_eq!(h.counts()[BucketLayout::default().index_of(100)], 2);
    }

    #[test]
    fn test_delta_then_accumulate_restores_current() {
        let l = layout();
        let mut previous = ResponseHistogram::new(Arc::clone(&l));
        for v in [1, 5, 900] {
            previous.add(v);
        }
        let mut current = previous.clone();
        for v in [5, 70_000, 12] {
            current.add(v);
        }

        let delta = ResponseHistogram::delta(&current, &previous).unwrap();
        assert_eq!(delta.total(), 3);

        let mut total = previous.clone();
        total.accumulate(&delta).unwrap();
        assert_eq!(total.counts(), current.counts());
    }

    #[test]
    fn test_negative_delta_is_fatal() {
        let l = layout();
        let mut previous = ResponseHistogram::new(Arc::clone(&l));
        previous.add(10);
        let current = ResponseHistogram::new(l);

        let err = ResponseHistogram::delta(&current, &previous).unwrap_err();
        assert!(matches!(as_fatal(&err), Some(FatalError::NegativeDelta { .. })));
    }

    #[test]
    fn test_layout_mismatch() {
        let mut a = ResponseHistogram::new(layout());
        let b = ResponseHistogram::new(Arc::new(BucketLayout::from_bounds(vec![10, 100]).unwrap()));
        let err = a.accumulate(&b).unwrap_err();
        assert!(matches!(
            as_fatal(&err),
            Some(FatalError::BucketLayoutMismatch { left: 33, right: 3 })
        ));
    }

    #[test]
    fn test_percentile() {
        let mut h = ResponseHistogram::new(Arc::new(BucketLayout::from_bounds(vec![10, 100, 1000]).unwrap()));
        assert_eq!(h.percentile(50.0), 0);
        for _ in 0..9 {
            h.add(5);
        }
        h.add(500);
        assert_eq!(h.percentile(50.0), 10);
        assert_eq!(h.percentile(90.0), 10);
        assert_eq!(h.percentile(99.0), 1000);
    }
}
