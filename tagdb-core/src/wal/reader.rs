//! WAL reader for recovery

use super::{segment_path, WalConfig, WalEntry};
use crate::{Result, TagDbError};
use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing::{info, warn};

/// WAL reader for recovering entries after crash
pub struct WalReader {
    config: WalConfig,
}

impl WalReader {
    /// Create a new WAL reader
    pub fn new(config: WalConfig) -> Self {
        Self { config }
    }

    /// Recover all entries from WAL segments, oldest first.
    ///
    /// A torn or corrupt tail is cut off the segment so later appends
    /// land right after the last good entry.
    pub fn recover(&self) -> Result<Vec<WalEntry>> {
        let mut entries = Vec::new();

        for segment_id in self.segment_ids()? {
            let path = segment_path(&self.config.dir, segment_id);
            let (segment_entries, valid_len) = Self::read_segment(&path)?;
            info!(
                "Recovered {} entries from {:?}",
                segment_entries.len(),
                path
            );
            if let Some(valid_len) = valid_len {
                warn!("Truncating {:?} to {} bytes", path, valid_len);
                OpenOptions::new()
                    .write(true)
                    .open(&path)?
                    .set_len(valid_len as u64)?;
            }
            entries.extend(segment_entries);
        }

        Ok(entries)
    }

    /// Ids of existing segments, ascending
    pub fn segment_ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();

        if !self.config.dir.exists() {
            return Ok(ids);
        }

        for entry in fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            if let Some(id) = Self::parse_segment_id(&path) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Read every good entry; the second value is the length to truncate
    /// the segment to when its tail is damaged
    fn read_segment(path: &Path) -> Result<(Vec<WalEntry>, Option<usize>)> {
        let data = fs::read(path)?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalEntry::deserialize_with_checksum(&data[offset..]) {
                Ok((entry, bytes_read)) => {
                    entries.push(entry);
                    offset += bytes_read;
                }
                Err(TagDbError::ChecksumMismatch { .. }) | Err(TagDbError::Corruption(_)) => {
                    warn!("Corrupt entry at offset {} in {:?}", offset, path);
                    return Ok((entries, Some(offset)));
                }
                Err(TagDbError::InvalidFormat(_)) => {
                    // Crash during write
                    return Ok((entries, Some(offset)));
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, None))
    }

    fn parse_segment_id(path: &Path) -> Option<u64> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|s| s.strip_prefix("wal_"))
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|s| s.parse().ok())
    }
}
