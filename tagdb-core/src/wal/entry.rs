//! WAL entry types and serialization

use crate::block::Block;
use crate::catalog::{SeriesId, Tag};
use crate::storage::SeriesRecord;
use crate::{Result, TagDbError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// WAL entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalEntryType {
    /// New tag
    TagInserted = 1,
    /// New series
    SeriesInserted = 2,
    /// Block created or rewritten
    BlockPut = 3,
}

impl TryFrom<u8> for WalEntryType {
    type Error = TagDbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WalEntryType::TagInserted),
            2 => Ok(WalEntryType::SeriesInserted),
            3 => Ok(WalEntryType::BlockPut),
            _ => Err(TagDbError::InvalidFormat(format!(
                "Invalid WAL entry type: {}",
                value
            ))),
        }
    }
}

/// A committed durable mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    TagInserted(Tag),
    SeriesInserted(SeriesRecord),
    BlockPut { series: SeriesId, block: Block },
}

impl WalRecord {
    pub fn entry_type(&self) -> WalEntryType {
        match self {
            WalRecord::TagInserted(_) => WalEntryType::TagInserted,
            WalRecord::SeriesInserted(_) => WalEntryType::SeriesInserted,
            WalRecord::BlockPut { .. } => WalEntryType::BlockPut,
        }
    }
}

/// A single WAL entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Entry type
    pub entry_type: WalEntryType,
    /// bincode-encoded [`WalRecord`]
    pub payload: Vec<u8>,
}

const HEADER_LEN: usize = 4;
const CHECKSUM_LEN: usize = 4;
/// type byte + payload length
const MIN_BODY_LEN: usize = 1 + 4 + CHECKSUM_LEN;

impl WalEntry {
    /// Create an entry for a record
    pub fn new(record: &WalRecord) -> Result<Self> {
        Ok(Self {
            entry_type: record.entry_type(),
            payload: bincode::serialize(record)?,
        })
    }

    /// Serialize the entry with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: entry length (excluding this field)
    /// - 1 byte: entry type
    /// - 4 bytes: payload length
    /// - N bytes: payload
    /// - 4 bytes: CRC32 checksum
    pub fn serialize_with_checksum(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + MIN_BODY_LEN + self.payload.len());

        // Reserve space for length prefix
        buf.put_u32_le(0);

        buf.put_u8(self.entry_type as u8);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        // Checksum excludes the length prefix
        let checksum = crc32fast::hash(&buf[HEADER_LEN..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - HEADER_LEN) as u32;
        buf[0..HEADER_LEN].copy_from_slice(&len.to_le_bytes());

        buf.freeze()
    }

    /// Deserialize entry from bytes, validating checksum
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_LEN {
            return Err(TagDbError::InvalidFormat("Entry too short".into()));
        }

        let mut cursor = data;
        let len = cursor.get_u32_le() as usize;
        if data.len() < HEADER_LEN + len {
            return Err(TagDbError::InvalidFormat("Incomplete entry".into()));
        }
        if len < MIN_BODY_LEN {
            return Err(TagDbError::Corruption(format!("WAL entry length {}", len)));
        }

        let entry_data = &data[HEADER_LEN..HEADER_LEN + len];
        let (body, mut checksum) = entry_data.split_at(len - CHECKSUM_LEN);

        let expected = checksum.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(TagDbError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = body;
        let entry_type = WalEntryType::try_from(cursor.get_u8())?;
        let payload_len = cursor.get_u32_le() as usize;
        if cursor.len() != payload_len {
            return Err(TagDbError::Corruption(format!(
                "WAL payload length {} but {} bytes present",
                payload_len,
                cursor.len()
            )));
        }

        let entry = WalEntry {
            entry_type,
            payload: cursor.to_vec(),
        };

        Ok((entry, HEADER_LEN + len))
    }

    /// Decode the record carried by this entry
    pub fn record(&self) -> Result<WalRecord> {
        let record: WalRecord = bincode::deserialize(&self.payload)?;
        if record.entry_type() != self.entry_type {
            return Err(TagDbError::InvalidFormat(format!(
                "entry typed {:?} carries {:?}",
                self.entry_type,
                record.entry_type()
            )));
        }
        Ok(record)
    }
}
