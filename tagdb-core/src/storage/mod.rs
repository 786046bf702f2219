//! Durable tier - the authoritative store for tags, series and blocks
//!
//! Any backend that can serve the [`DurableStore`] contract can sit under
//! the catalog and block store. [`MemoryStore`] is the reference backend,
//! optionally persisted through the WAL.

mod engine;
mod memory;

pub use engine::Engine;
pub use memory::MemoryStore;

use crate::block::{Block, BlockId};
use crate::blockstore::BlockStoreConfig;
use crate::catalog::{SeriesId, Tag};
use crate::wal::WalConfig;
use crate::{Resolution, Result, TagDbError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Stored form of a series: its id and the canonical ids of its tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: SeriesId,
    pub tags: Vec<String>,
}

/// Block access inside a series-scoped transaction
pub trait BlockTxn {
    /// Block with the greatest `start_time` for `resolution`
    fn latest_block(&mut self, resolution: Resolution) -> Result<Option<Block>>;

    /// The block covering `from` (greatest `start_time <= from`), then every
    /// later block, ascending by `start_time`
    fn blocks_from(&mut self, resolution: Resolution, from: Timestamp) -> Result<Vec<Block>>;

    /// Insert a block, or overwrite it in place when it carries an id.
    ///
    /// Returns the block's id.
    fn put_block(&mut self, block: Block) -> Result<BlockId>;
}

/// Contract of the durable tier
pub trait DurableStore: Send + Sync {
    /// Tag by canonical id
    fn get_tag(&self, id: &str) -> Result<Option<Tag>>;

    /// Insert unless a tag with the same id exists; returns the stored tag
    fn insert_tag(&self, tag: Tag) -> Result<Tag>;

    /// Every tag with the given key
    fn tags_with_key(&self, key: &str) -> Result<Vec<Tag>>;

    /// Insert unless a series with the same id exists; returns the stored record
    fn insert_series(&self, series: SeriesRecord) -> Result<SeriesRecord>;

    /// Batch fetch; unknown ids are skipped
    fn get_series(&self, ids: &[SeriesId]) -> Result<Vec<SeriesRecord>>;

    /// Ids of every series carrying the tag
    fn series_with_tag(&self, tag_id: &str) -> Result<BTreeSet<SeriesId>>;

    /// Block with the greatest `start_time <= at`
    fn latest_block_at_or_before(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        at: Timestamp,
    ) -> Result<Option<Block>>;

    /// Blocks with `after < start_time <= until`, ascending by `start_time`
    fn blocks_between(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        after: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<Block>>;

    /// Run `body` as a read-modify-write transaction over one series' blocks.
    ///
    /// Nothing `body` wrote is visible unless it returns `Ok`. A backend
    /// may run `body` more than once.
    fn transact(
        &self,
        series: &SeriesId,
        body: &mut dyn FnMut(&mut dyn BlockTxn) -> Result<()>,
    ) -> Result<()>;
}

/// [`DurableStore::transact`] for bodies that produce a value
pub fn transaction<T>(
    store: &dyn DurableStore,
    series: &SeriesId,
    mut body: impl FnMut(&mut dyn BlockTxn) -> Result<T>,
) -> Result<T> {
    let mut output = None;
    store.transact(series, &mut |txn| {
        output = Some(body(txn)?);
        Ok(())
    })?;
    output.ok_or_else(|| TagDbError::Transaction(format!("no result for {}", series)))
}

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// WAL configuration; `dir` is derived from `data_dir` when persistent
    pub wal: WalConfig,
    /// Block sizing and cache tier policy
    pub block_store: BlockStoreConfig,
}

impl StorageConfig {
    /// Persistent configuration rooted at `data_dir`
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// WAL configuration with its directory under `data_dir`
    pub fn wal_config(&self) -> Option<WalConfig> {
        self.data_dir.as_ref().map(|dir| WalConfig {
            dir: dir.join("wal"),
            ..self.wal.clone()
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            wal: WalConfig::default(),
            block_store: BlockStoreConfig::default(),
        }
    }
}
