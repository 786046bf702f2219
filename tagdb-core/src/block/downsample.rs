//! Downsample propagation
//!
//! A downsample resolution keeps raw FULL samples, one per bucket: a sample
//! is forwarded whenever it lands in a different bucket than the sample
//! before it. Bucket boundaries are shifted per series by a stable skew so
//! that many series do not all cross a boundary in the same second.

use crate::catalog::SeriesId;
use crate::{Resolution, Sample, Timestamp};

/// Stable per-series offset applied to write-side bucket boundaries
pub fn series_skew(series: &SeriesId) -> i64 {
    crc32fast::hash(series.as_str().as_bytes()) as i64
}

/// Bucket index of `timestamp` for a bucket width of `period` seconds
#[inline]
pub fn bucket(timestamp: Timestamp, skew: i64, period: i64) -> i64 {
    timestamp.saturating_add(skew).div_euclid(period)
}

/// Samples to forward to one downsample resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownsampleWrite {
    pub resolution: Resolution,
    pub samples: Vec<Sample>,
}

/// Work the FULL write path hands back for the downsample resolutions.
///
/// Always at most one entry per downsample resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fanout {
    writes: Vec<DownsampleWrite>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `samples` for `resolution`, merging with anything already queued
    pub fn push(&mut self, resolution: Resolution, samples: impl IntoIterator<Item = Sample>) {
        let mut samples = samples.into_iter().peekable();
        if samples.peek().is_none() {
            return;
        }
        match self.writes.iter_mut().find(|w| w.resolution == resolution) {
            Some(write) => write.samples.extend(samples),
            None => self.writes.push(DownsampleWrite {
                resolution,
                samples: samples.collect(),
            }),
        }
    }

    /// Seed every downsample with the first sample of a new FULL chain
    pub fn seed(&mut self, first: Sample) {
        for resolution in Resolution::DOWNSAMPLES {
            self.push(resolution, [first]);
        }
    }

    /// Queue samples that cross a bucket boundary, starting from `prev_time`.
    ///
    /// `samples` must be sorted by time.
    pub fn crossings(&mut self, skew: i64, prev_time: Timestamp, samples: &[Sample]) {
        for resolution in Resolution::DOWNSAMPLES {
            let Some(period) = resolution.period() else {
                continue;
            };
            let mut prev = prev_time;
            let mut crossed = Vec::new();
            for &(timestamp, value) in samples {
                if bucket(timestamp, skew, period) != bucket(prev, skew, period) {
                    crossed.push((timestamp, value));
                }
                prev = timestamp;
            }
            self.push(resolution, crossed);
        }
    }

    /// Merge another fan-out into this one
    pub fn extend(&mut self, other: Fanout) {
        for write in other.writes {
            self.push(write.resolution, write.samples);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[DownsampleWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<DownsampleWrite> {
        self.writes
    }
}

/// Drop every sample that shares a `floor(t / period)` bucket with the one
/// before it, keeping the earliest sample of each bucket.
///
/// `samples` must be sorted by time.
pub fn retain_earliest_per_bucket(samples: &mut Vec<Sample>, period: i64) {
    samples.dedup_by(|later, earlier| {
        later.0.div_euclid(period) == earlier.0.div_euclid(period)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_floors_negative_times() {
        assert_eq!(bucket(59, 0, 60), 0);
        assert_eq!(bucket(60, 0, 60), 1);
        assert_eq!(bucket(-1, 0, 60), -1);
        assert_eq!(bucket(50, 10, 60), 1);
    }

    #[test]
    fn test_skew_is_stable() {
        let a = SeriesId::new("host=a,project=web");
        let b = SeriesId::new("host=b,project=web");
        assert_eq!(series_skew(&a), series_skew(&a.clone()));
        assert_ne!(series_skew(&a), series_skew(&b));
        assert!(series_skew(&a) >= 0);
    }

    #[test]
    fn test_crossings_forward_first_sample_of_each_bucket() {
        let samples: Vec<Sample> = (1..=180).map(|t| (t, t * 2)).collect();
        let mut fanout = Fanout::new();
        fanout.crossings(0, 0, &samples);

        let minute = fanout
            .writes()
            .iter()
            .find(|w| w.resolution == Resolution::Minute)
            .unwrap();
        assert_eq!(minute.samples, vec![(60, 120), (120, 240), (180, 360)]);
        // No hour or day boundary crossed
        assert_eq!(fanout.writes().len(), 1);
    }

    #[test]
    fn test_crossings_respect_skew() {
        let mut fanout = Fanout::new();
        fanout.crossings(30, 0, &[(29, 1), (30, 2), (31, 3)]);
        let minute = &fanout.writes()[0];
        assert_eq!(minute.resolution, Resolution::Minute);
        assert_eq!(minute.samples, vec![(30, 2)]);
    }

    #[test]
    fn test_seed_and_merge() {
        let mut fanout = Fanout::new();
        fanout.seed((100, 5));
        let mut more = Fanout::new();
        more.push(Resolution::Hour, [(3600, 9)]);
        more.push(Resolution::Day, Vec::new());
        fanout.extend(more);

        assert_eq!(fanout.writes().len(), 3);
        let hour = fanout
            .writes()
            .iter()
            .find(|w| w.resolution == Resolution::Hour)
            .unwrap();
        assert_eq!(hour.samples, vec![(100, 5), (3600, 9)]);
    }

    #[test]
    fn test_retain_earliest_per_bucket() {
        let mut samples = vec![(0, 1), (30, 2), (59, 3), (60, 4), (61, 5), (200, 6)];
        retain_earliest_per_bucket(&mut samples, 60);
        assert_eq!(samples, vec![(0, 1), (60, 4), (200, 6)]);
    }
}
