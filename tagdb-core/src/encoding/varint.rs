//! Zig-zag + base-128 varint primitives

use crate::{Result, TagDbError};
use bytes::BufMut;

/// Longest encoding of a u64 (ceil(64 / 7))
pub const MAX_VARINT_LEN: usize = 10;

/// Map a signed integer onto the unsigned line: 0, -1, 1, -2, 2, ...
#[inline]
pub fn to_zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`to_zigzag`]
#[inline]
pub fn from_zigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append `value` as a zig-zag, little-endian base-128 varint
pub fn put_varint<B: BufMut>(buf: &mut B, value: i64) {
    let mut v = to_zigzag(value);
    while v >= 0x80 {
        buf.put_u8(0x80 | (v & 0x7f) as u8);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Encode a single value into a fresh buffer
pub fn encode_varint(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    put_varint(&mut out, value);
    out
}

/// Cursor over an encoded byte stream
#[derive(Debug, Clone)]
pub struct VarintReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VarintReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True once every byte has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read the next varint.
    ///
    /// Returns `Ok(None)` at a clean end of stream and a corruption error if
    /// the stream stops part-way through an integer.
    pub fn read_varint(&mut self) -> Result<Option<i64>> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        let mut consumed = 0usize;

        loop {
            let Some(&byte) = self.data.get(self.pos) else {
                if consumed == 0 {
                    return Ok(None);
                }
                return Err(TagDbError::Corruption(format!(
                    "incomplete varint at offset {}",
                    self.pos - consumed
                )));
            };
            self.pos += 1;
            consumed += 1;

            if consumed > MAX_VARINT_LEN {
                return Err(TagDbError::Corruption(format!(
                    "varint longer than {} bytes at offset {}",
                    MAX_VARINT_LEN,
                    self.pos - consumed
                )));
            }

            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        Ok(Some(from_zigzag(value)))
    }
}
