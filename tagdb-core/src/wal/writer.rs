//! WAL writer implementation

use super::{segment_path, SyncPolicy, WalConfig, WalEntry, WalReader};
use crate::Result;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// WAL writer for appending entries to disk
pub struct WalWriter {
    config: WalConfig,
    inner: Mutex<WalWriterInner>,
    current_offset: AtomicU64,
}

struct WalWriterInner {
    file: BufWriter<File>,
    segment_id: u64,
    bytes_written: usize,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl WalWriter {
    /// Open the WAL for appending, continuing the latest segment
    pub fn new(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let segment_id = WalReader::new(config.clone())
            .segment_ids()?
            .last()
            .copied()
            .unwrap_or(0);
        let file = Self::open_segment(&config.dir, segment_id)?;
        let bytes_written = file.metadata()?.len() as usize;

        let inner = WalWriterInner {
            file: BufWriter::new(file),
            segment_id,
            bytes_written,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
            current_offset: AtomicU64::new(0),
        })
    }

    /// Append an entry to the WAL
    pub fn append(&self, entry: &WalEntry) -> Result<u64> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Append entries as one write, syncing at most once.
    ///
    /// Returns the offset of the first entry.
    pub fn append_all(&self, entries: &[WalEntry]) -> Result<u64> {
        let mut batch = Vec::new();
        for entry in entries {
            batch.extend_from_slice(&entry.serialize_with_checksum());
        }
        let mut inner = self.inner.lock();

        if inner.bytes_written > 0 && inner.bytes_written + batch.len() > self.config.segment_size
        {
            self.rotate_segment(&mut inner)?;
        }

        inner.file.write_all(&batch)?;
        inner.bytes_written += batch.len();
        inner.writes_since_sync += entries.len();

        if self.should_sync(&inner) {
            inner.file.flush()?;
            inner.file.get_ref().sync_all()?;
            inner.writes_since_sync = 0;
            inner.last_sync = Instant::now();
        }

        let offset = self
            .current_offset
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(offset)
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        inner.writes_since_sync = 0;
        inner.last_sync = Instant::now();
        Ok(())
    }

    /// Get current segment ID
    pub fn current_segment(&self) -> u64 {
        self.inner.lock().segment_id
    }

    fn should_sync(&self, inner: &WalWriterInner) -> bool {
        match self.config.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => inner.writes_since_sync >= n,
            SyncPolicy::Interval { millis } => {
                inner.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }

    fn rotate_segment(&self, inner: &mut WalWriterInner) -> Result<()> {
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;

        inner.segment_id += 1;
        let file = Self::open_segment(&self.config.dir, inner.segment_id)?;
        inner.file = BufWriter::new(file);
        inner.bytes_written = 0;
        inner.writes_since_sync = 0;

        Ok(())
    }

    fn open_segment(dir: &Path, segment_id: u64) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, segment_id))?)
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        let _ = self.inner.get_mut().file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Tag;
    use crate::wal::WalRecord;
    use tempfile::TempDir;

    fn tag_entry(i: usize) -> WalEntry {
        WalEntry::new(&WalRecord::TagInserted(Tag::new("host", format!("h{}", i)))).unwrap()
    }

    #[test]
    fn test_wal_writer() {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig {
            dir: temp_dir.path().to_path_buf(),
            sync_policy: SyncPolicy::Immediate,
            segment_size: 1024,
        };

        let writer = WalWriter::new(config).unwrap();
        let offset = writer.append(&tag_entry(0)).unwrap();
        assert_eq!(offset, 0);
        assert!(writer.append(&tag_entry(1)).unwrap() > 0);

        writer.sync().unwrap();
    }

    #[test]
    fn test_segment_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig {
            dir: temp_dir.path().to_path_buf(),
            sync_policy: SyncPolicy::None,
            segment_size: 128,
        };

        let writer = WalWriter::new(config.clone()).unwrap();
        for i in 0..20 {
            writer.append(&tag_entry(i)).unwrap();
        }
        writer.sync().unwrap();
        assert!(writer.current_segment() > 0);

        // Reopening continues the latest segment
        let segment = writer.current_segment();
        drop(writer);
        let reopened = WalWriter::new(config).unwrap();
        assert_eq!(reopened.current_segment(), segment);
    }
}
