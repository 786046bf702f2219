//! Value blocks
//!
//! A block holds a contiguous run of samples for one `(series, resolution)`:
//! the first sample is stored as absolute `start_time`/`start_value`, every
//! later sample as a delta in the encoded payload. `end_time`/`end_value`
//! track the last absolute sample so appends never need to decode.

pub mod downsample;

pub use downsample::{bucket, retain_earliest_per_bucket, series_skew, DownsampleWrite, Fanout};

use crate::encoding::{DeltaDecoder, DeltaEncoder};
use crate::{Resolution, Result, Sample, TagDbError, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Store-assigned identity of a durable block
pub type BlockId = u64;

/// A chunk of delta-encoded samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Durable identity; `None` until the durable tier first stores it
    pub id: Option<BlockId>,
    pub resolution: Resolution,
    pub start_time: Timestamp,
    pub start_value: Value,
    pub end_time: Timestamp,
    pub end_value: Value,
    /// Interior samples as successive `(dt, dv)` varints
    pub payload: Vec<u8>,
}

/// Result of splitting a block around a timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSplit {
    /// Samples strictly before the split timestamp
    pub older: Vec<Sample>,
    /// Block holding the rest, if anything remains
    pub newer: Option<Block>,
}

impl Block {
    /// Create a block anchored at `first`
    pub fn new(resolution: Resolution, first: Sample) -> Self {
        Self {
            id: None,
            resolution,
            start_time: first.0,
            start_value: first.1,
            end_time: first.0,
            end_value: first.1,
            payload: Vec::new(),
        }
    }

    /// Build a block from sorted samples; `None` if `samples` is empty
    pub fn from_samples(resolution: Resolution, samples: &[Sample]) -> Option<Self> {
        let (&first, rest) = samples.split_first()?;
        let mut block = Self::new(resolution, first);
        block.encode_all(rest);
        Some(block)
    }

    /// Last absolute sample
    pub fn end(&self) -> Sample {
        (self.end_time, self.end_value)
    }

    /// Encoded payload size in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Append sorted samples.
    ///
    /// Samples earlier than `start_time` can never be found again by the
    /// read path; they are rejected and returned to the caller.
    pub fn append(&mut self, samples: &[Sample]) -> Vec<Sample> {
        let (accepted, stale): (Vec<Sample>, Vec<Sample>) = samples
            .iter()
            .copied()
            .partition(|&(t, _)| t >= self.start_time);
        self.encode_all(&accepted);
        stale
    }

    fn encode_all(&mut self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        let mut encoder = DeltaEncoder::resume(self.end(), &self.payload);
        for &(t, v) in samples {
            encoder.push(t, v);
        }
        (self.end_time, self.end_value) = encoder.last();
        self.payload = encoder.finish();
    }

    /// Decode every sample in ascending time order.
    ///
    /// Downsample resolutions keep only the earliest sample of each bucket.
    pub fn decode(&self) -> Result<Vec<Sample>> {
        let mut samples = DeltaDecoder::new((self.start_time, self.start_value), &self.payload)
            .decode_all()?;
        samples.sort_by_key(|s| s.0);
        if let Some(period) = self.resolution.period() {
            retain_earliest_per_bucket(&mut samples, period);
        }
        Ok(samples)
    }

    /// Replace contents with `samples`, keeping id and resolution
    fn reset(&mut self, samples: &[Sample]) -> Result<()> {
        let (&first, rest) = samples
            .split_first()
            .ok_or_else(|| TagDbError::Internal("cannot reset block to zero samples".into()))?;
        self.start_time = first.0;
        self.start_value = first.1;
        self.end_time = first.0;
        self.end_value = first.1;
        self.payload.clear();
        self.encode_all(rest);
        Ok(())
    }

    /// Split in half by sample count.
    ///
    /// Returns the older half as a new block (without an id); `self` keeps
    /// the newer half. Returns `None` when there are fewer than two samples.
    pub fn split_half(&mut self) -> Result<Option<Block>> {
        let samples = self.decode()?;
        if samples.len() < 2 {
            return Ok(None);
        }
        let split_point = samples.len() / 2;
        let older = Block::from_samples(self.resolution, &samples[..split_point]);
        self.reset(&samples[split_point..])?;
        Ok(older)
    }

    /// Split until every payload fits in `max_bytes`.
    ///
    /// Returns the split-off older blocks, oldest first.
    pub fn enforce_size_limit(&mut self, max_bytes: usize) -> Result<Vec<Block>> {
        let mut spilled = Vec::new();
        while self.payload.len() > max_bytes {
            let Some(mut older) = self.split_half()? else {
                break;
            };
            spilled.extend(older.enforce_size_limit(max_bytes)?);
            spilled.push(older);
        }
        Ok(spilled)
    }

    /// Split around `split_time`: samples before it go to `older`, the rest
    /// stay in a block with this block's id.
    pub fn split_at(&self, split_time: Timestamp) -> Result<TimeSplit> {
        let samples = self.decode()?;
        let split_point = samples.partition_point(|&(t, _)| t < split_time);
        let newer = if split_point < samples.len() {
            let mut block = self.clone();
            block.reset(&samples[split_point..])?;
            Some(block)
        } else {
            None
        };
        Ok(TimeSplit {
            older: samples[..split_point].to_vec(),
            newer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: i64) -> Vec<Sample> {
        (0..n).map(|i| (1000 + i, i * 7 - 50)).collect()
    }

    #[test]
    fn test_block_roundtrip() {
        let input = samples(200);
        let block = Block::from_samples(Resolution::Full, &input).unwrap();
        assert_eq!(block.start_time, 1000);
        assert_eq!(block.end(), *input.last().unwrap());
        assert_eq!(block.decode().unwrap(), input);
    }

    #[test]
    fn test_append_continues_from_end() {
        let mut block = Block::new(Resolution::Full, (100, 5));
        assert!(block.append(&[(110, 8)]).is_empty());
        assert!(block.append(&[(120, -3), (130, 4)]).is_empty());
        assert_eq!(
            block.decode().unwrap(),
            vec![(100, 5), (110, 8), (120, -3), (130, 4)]
        );
    }

    #[test]
    fn test_append_rejects_stale_samples() {
        let mut block = Block::new(Resolution::Full, (100, 5));
        let stale = block.append(&[(90, 1), (105, 2)]);
        assert_eq!(stale, vec![(90, 1)]);
        assert_eq!(block.decode().unwrap(), vec![(100, 5), (105, 2)]);
    }

    #[test]
    fn test_out_of_order_recent_samples_decode_sorted() {
        let mut block = Block::new(Resolution::Full, (100, 5));
        block.append(&[(120, 1)]);
        block.append(&[(110, 2)]);
        assert_eq!(block.end(), (110, 2));
        assert_eq!(block.decode().unwrap(), vec![(100, 5), (110, 2), (120, 1)]);
    }

    #[test]
    fn test_downsample_decode_keeps_earliest_per_bucket() {
        let mut block = Block::new(Resolution::Minute, (0, 1));
        block.append(&[(30, 2), (60, 3), (61, 4), (125, 5)]);
        assert_eq!(block.decode().unwrap(), vec![(0, 1), (60, 3), (125, 5)]);
    }

    #[test]
    fn test_split_half() {
        let input = samples(11);
        let mut block = Block::from_samples(Resolution::Full, &input).unwrap();
        block.id = Some(7);

        let older = block.split_half().unwrap().unwrap();
        assert_eq!(older.id, None);
        assert_eq!(older.decode().unwrap(), input[..5].to_vec());
        assert_eq!(block.id, Some(7));
        assert_eq!(block.start_time, input[5].0);
        assert_eq!(block.decode().unwrap(), input[5..].to_vec());
    }

    #[test]
    fn test_split_half_single_sample() {
        let mut block = Block::new(Resolution::Full, (1, 1));
        assert!(block.split_half().unwrap().is_none());
    }

    #[test]
    fn test_enforce_size_limit() {
        let input: Vec<Sample> = (0..400)
            .map(|i| (i, if i % 2 == 0 { 1 << 40 } else { -(1 << 40) }))
            .collect();
        let mut block = Block::from_samples(Resolution::Full, &input).unwrap();
        assert!(block.payload_len() > 256);

        let spilled = block.enforce_size_limit(256).unwrap();
        assert!(!spilled.is_empty());
        assert!(block.payload_len() <= 256);

        let mut rebuilt: Vec<Sample> = Vec::new();
        for b in &spilled {
            assert!(b.payload_len() <= 256);
            rebuilt.extend(b.decode().unwrap());
        }
        rebuilt.extend(block.decode().unwrap());
        assert_eq!(rebuilt, input);

        // Older blocks come first and never overlap
        for pair in spilled.windows(2) {
            assert!(pair[0].end_time < pair[1].start_time);
        }
        assert!(spilled.last().unwrap().end_time < block.start_time);
    }

    #[test]
    fn test_split_at_time() {
        let input = samples(10);
        let block = Block::from_samples(Resolution::Full, &input).unwrap();

        let split = block.split_at(1004).unwrap();
        assert_eq!(split.older, input[..4].to_vec());
        let newer = split.newer.unwrap();
        assert_eq!(newer.start_time, 1004);
        assert_eq!(newer.decode().unwrap(), input[4..].to_vec());

        let all_old = block.split_at(5000).unwrap();
        assert_eq!(all_old.older, input);
        assert!(all_old.newer.is_none());
    }

    #[test]
    fn test_corrupt_payload() {
        let mut block = Block::from_samples(Resolution::Full, &samples(3)).unwrap();
        block.payload.push(0x80);
        assert!(block.decode().unwrap_err().is_corruption());
    }
}
