//! Delta encoder/decoder for block payloads

use super::varint::{put_varint, VarintReader};
use crate::{Result, Sample, TagDbError, Timestamp, Value};
use bytes::BytesMut;

/// Appends samples to a payload as deltas from the previous absolute sample
#[derive(Debug)]
pub struct DeltaEncoder {
    buf: BytesMut,
    prev_time: Timestamp,
    prev_value: Value,
}

impl DeltaEncoder {
    /// Start an empty payload after the anchor sample
    pub fn new(anchor: Sample) -> Self {
        Self::resume(anchor, &[])
    }

    /// Continue an existing payload whose last absolute sample is `last`
    pub fn resume(last: Sample, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(payload.len() + 64);
        buf.extend_from_slice(payload);
        Self {
            buf,
            prev_time: last.0,
            prev_value: last.1,
        }
    }

    /// Encode one sample
    pub fn push(&mut self, timestamp: Timestamp, value: Value) {
        put_varint(&mut self.buf, timestamp.wrapping_sub(self.prev_time));
        put_varint(&mut self.buf, value.wrapping_sub(self.prev_value));
        self.prev_time = timestamp;
        self.prev_value = value;
    }

    /// Current payload size in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Last absolute sample written
    pub fn last(&self) -> Sample {
        (self.prev_time, self.prev_value)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Iterates the absolute samples of a payload, anchor first
#[derive(Debug, Clone)]
pub struct DeltaDecoder<'a> {
    reader: VarintReader<'a>,
    anchor: Option<Sample>,
    prev_time: Timestamp,
    prev_value: Value,
    failed: bool,
}

impl<'a> DeltaDecoder<'a> {
    pub fn new(anchor: Sample, payload: &'a [u8]) -> Self {
        Self {
            reader: VarintReader::new(payload),
            anchor: Some(anchor),
            prev_time: anchor.0,
            prev_value: anchor.1,
            failed: false,
        }
    }

    /// Decode all samples
    pub fn decode_all(self) -> Result<Vec<Sample>> {
        self.collect()
    }

    fn decode_next(&mut self) -> Result<Option<Sample>> {
        let Some(dt) = self.reader.read_varint()? else {
            return Ok(None);
        };
        let dv = self.reader.read_varint()?.ok_or_else(|| {
            TagDbError::Corruption(format!(
                "time without value at offset {}",
                self.reader.position()
            ))
        })?;
        self.prev_time = self.prev_time.wrapping_add(dt);
        self.prev_value = self.prev_value.wrapping_add(dv);
        Ok(Some((self.prev_time, self.prev_value)))
    }
}

impl Iterator for DeltaDecoder<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(anchor) = self.anchor.take() {
            return Some(Ok(anchor));
        }
        if self.failed {
            return None;
        }
        match self.decode_next() {
            Ok(sample) => sample.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn encode(samples: &[Sample]) -> Vec<u8> {
        let mut encoder = DeltaEncoder::new(samples[0]);
        for &(t, v) in &samples[1..] {
            encoder.push(t, v);
        }
        encoder.finish()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut rng = rand::thread_rng();
        let mut t = 1_600_000_000i64;
        let mut samples = Vec::new();
        for _ in 0..500 {
            t += rng.gen_range(1..120);
            samples.push((t, rng.gen_range(-1_000_000..1_000_000)));
        }

        let payload = encode(&samples);
        let decoded = DeltaDecoder::new(samples[0], &payload).decode_all().unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_extreme_deltas_roundtrip() {
        let samples = vec![(i64::MIN, i64::MAX), (0, i64::MIN), (i64::MAX, 0)];
        let payload = encode(&samples);
        let decoded = DeltaDecoder::new(samples[0], &payload).decode_all().unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_small_deltas_are_compact() {
        let samples: Vec<Sample> = (0..100).map(|i| (1000 + i * 10, 5 + i % 3)).collect();
        let payload = encode(&samples);
        // 99 interior samples, one byte each for dt and dv
        assert_eq!(payload.len(), 99 * 2);
    }

    #[test]
    fn test_resume_continues_payload() {
        let mut encoder = DeltaEncoder::new((100, 5));
        encoder.push(110, 8);
        let payload = encoder.finish();

        let mut encoder = DeltaEncoder::resume((110, 8), &payload);
        encoder.push(130, 2);
        let payload = encoder.finish();

        let decoded = DeltaDecoder::new((100, 5), &payload).decode_all().unwrap();
        assert_eq!(decoded, vec![(100, 5), (110, 8), (130, 2)]);
    }

    #[test]
    fn test_time_without_value_is_corruption() {
        let mut payload = encode(&[(100, 5), (110, 8)]);
        payload.pop();
        let mut decoder = DeltaDecoder::new((100, 5), &payload);
        assert_eq!(decoder.next().unwrap().unwrap(), (100, 5));
        assert!(decoder.next().unwrap().unwrap_err().is_corruption());
        assert!(decoder.next().is_none());
    }
}
