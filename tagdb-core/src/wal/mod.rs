//! Write-Ahead Log (WAL) implementation
//!
//! Every committed durable mutation is appended here before it becomes
//! visible. Replaying the log on open rebuilds the durable store.

mod entry;
mod reader;
mod writer;

pub use entry::{WalEntry, WalEntryType, WalRecord};
pub use reader::WalReader;
pub use writer::WalWriter;

use std::path::{Path, PathBuf};

/// WAL sync policy
#[derive(Debug, Clone, Copy, Default)]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    #[default]
    Immediate,
    /// Sync after N writes
    EveryN(usize),
    /// Sync on interval (trades durability for performance)
    Interval { millis: u64 },
    /// Never sync (OS decides, fastest, least safe)
    None,
}

/// WAL configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory for WAL files
    pub dir: PathBuf,
    /// Sync policy
    pub sync_policy: SyncPolicy,
    /// Maximum segment size in bytes
    pub segment_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/wal"),
            sync_policy: SyncPolicy::default(),
            segment_size: crate::config::WAL_SEGMENT_SIZE,
        }
    }
}

pub(crate) fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("wal_{:020}.log", segment_id))
}
