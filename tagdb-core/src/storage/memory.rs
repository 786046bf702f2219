//! In-memory durable store, optionally persisted through the WAL

use super::{BlockTxn, DurableStore, SeriesRecord, StorageConfig};
use crate::block::{Block, BlockId};
use crate::catalog::{SeriesId, Tag};
use crate::wal::{WalEntry, WalReader, WalRecord, WalWriter};
use crate::{Resolution, Result, TagDbError, Timestamp};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Blocks of one series, indexed by `(resolution, start_time)`
#[derive(Debug, Default)]
struct SeriesBlocks {
    index: BTreeMap<(Resolution, Timestamp), BlockId>,
    blocks: HashMap<BlockId, Block>,
}

impl SeriesBlocks {
    /// Store a block that already has an id; returns the version it replaced
    fn put(&mut self, id: BlockId, block: Block) -> Option<Block> {
        let previous = self.remove(id);
        self.index.insert((block.resolution, block.start_time), id);
        self.blocks.insert(id, block);
        previous
    }

    fn remove(&mut self, id: BlockId) -> Option<Block> {
        let previous = self.blocks.remove(&id)?;
        let slot = (previous.resolution, previous.start_time);
        if self.index.get(&slot) == Some(&id) {
            self.index.remove(&slot);
        }
        Some(previous)
    }

    fn latest_at_or_before(&self, resolution: Resolution, at: Timestamp) -> Option<&Block> {
        self.index
            .range((resolution, Timestamp::MIN)..=(resolution, at))
            .next_back()
            .and_then(|(_, id)| self.blocks.get(id))
    }

    fn from(&self, resolution: Resolution, from: Timestamp) -> Vec<Block> {
        let first = self
            .index
            .range((resolution, Timestamp::MIN)..=(resolution, from))
            .next_back()
            .map_or(from, |(&(_, start), _)| start);
        self.index
            .range((resolution, first)..=(resolution, Timestamp::MAX))
            .filter_map(|(_, id)| self.blocks.get(id).cloned())
            .collect()
    }

    fn between(&self, resolution: Resolution, after: Timestamp, until: Timestamp) -> Vec<Block> {
        if after >= until {
            return Vec::new();
        }
        self.index
            .range((resolution, after + 1)..=(resolution, until))
            .filter_map(|(_, id)| self.blocks.get(id).cloned())
            .collect()
    }
}

enum Undo {
    Inserted(BlockId),
    Replaced(BlockId, Block),
}

struct MemoryTxn<'a> {
    blocks: &'a mut SeriesBlocks,
    next_block_id: &'a AtomicU64,
    undo: Vec<Undo>,
    written: Vec<BlockId>,
}

impl MemoryTxn<'_> {
    fn rollback(mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Inserted(id) => {
                    self.blocks.remove(id);
                }
                Undo::Replaced(id, block) => {
                    self.blocks.put(id, block);
                }
            }
        }
    }
}

impl BlockTxn for MemoryTxn<'_> {
    fn latest_block(&mut self, resolution: Resolution) -> Result<Option<Block>> {
        Ok(self
            .blocks
            .latest_at_or_before(resolution, Timestamp::MAX)
            .cloned())
    }

    fn blocks_from(&mut self, resolution: Resolution, from: Timestamp) -> Result<Vec<Block>> {
        Ok(self.blocks.from(resolution, from))
    }

    fn put_block(&mut self, mut block: Block) -> Result<BlockId> {
        let id = match block.id {
            Some(id) => id,
            None => self.next_block_id.fetch_add(1, Ordering::Relaxed),
        };
        block.id = Some(id);

        if let Some(&other) = self.blocks.index.get(&(block.resolution, block.start_time)) {
            if other != id {
                return Err(TagDbError::Transaction(format!(
                    "block {} already starts at {}",
                    other, block.start_time
                )));
            }
        }

        match self.blocks.put(id, block) {
            Some(previous) => self.undo.push(Undo::Replaced(id, previous)),
            None => self.undo.push(Undo::Inserted(id)),
        }
        if !self.written.contains(&id) {
            self.written.push(id);
        }
        Ok(id)
    }
}

/// Reference durable store
///
/// Tags, series and blocks live in maps behind `parking_lot` locks. Block
/// transactions serialise per series; different series never contend.
pub struct MemoryStore {
    tags: RwLock<BTreeMap<String, Tag>>,
    series: RwLock<BTreeMap<SeriesId, SeriesRecord>>,
    postings: RwLock<HashMap<String, BTreeSet<SeriesId>>>,
    blocks: RwLock<HashMap<SeriesId, Arc<Mutex<SeriesBlocks>>>>,
    next_block_id: AtomicU64,
    wal: Option<WalWriter>,
}

impl MemoryStore {
    /// Volatile store
    pub fn new() -> Self {
        Self {
            tags: RwLock::new(BTreeMap::new()),
            series: RwLock::new(BTreeMap::new()),
            postings: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
            next_block_id: AtomicU64::new(1),
            wal: None,
        }
    }

    /// Open a store, replaying the WAL when `config` names a data directory
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let Some(wal_config) = config.wal_config() else {
            return Ok(Self::new());
        };

        let mut store = Self::new();
        let entries = WalReader::new(wal_config.clone()).recover()?;
        let replayed = entries.len();
        for entry in entries {
            store.apply(entry.record()?)?;
        }
        store.wal = Some(WalWriter::new(wal_config)?);

        info!(
            "Opened store with {} tags, {} series from {} WAL entries",
            store.tags.read().len(),
            store.series.read().len(),
            replayed
        );
        Ok(store)
    }

    /// Whether mutations are persisted
    pub fn is_persistent(&self) -> bool {
        self.wal.is_some()
    }

    fn apply(&self, record: WalRecord) -> Result<()> {
        match record {
            WalRecord::TagInserted(tag) => {
                self.tags.write().entry(tag.id()).or_insert(tag);
            }
            WalRecord::SeriesInserted(series) => self.index_series(series),
            WalRecord::BlockPut { series, block } => {
                let id = block.id.ok_or_else(|| {
                    TagDbError::WalRecovery(format!("block of {} without id", series))
                })?;
                self.next_block_id.fetch_max(id + 1, Ordering::Relaxed);
                self.series_blocks(&series).lock().put(id, block);
            }
        }
        Ok(())
    }

    fn log(&self, records: &[WalRecord]) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let entries = records
            .iter()
            .map(WalEntry::new)
            .collect::<Result<Vec<_>>>()?;
        wal.append_all(&entries)?;
        Ok(())
    }

    fn index_series(&self, series: SeriesRecord) {
        let mut postings = self.postings.write();
        for tag_id in &series.tags {
            postings
                .entry(tag_id.clone())
                .or_default()
                .insert(series.id.clone());
        }
        self.series.write().insert(series.id.clone(), series);
    }

    fn series_blocks(&self, series: &SeriesId) -> Arc<Mutex<SeriesBlocks>> {
        if let Some(blocks) = self.blocks.read().get(series) {
            return blocks.clone();
        }
        self.blocks
            .write()
            .entry(series.clone())
            .or_default()
            .clone()
    }

    fn existing_blocks(&self, series: &SeriesId) -> Option<Arc<Mutex<SeriesBlocks>>> {
        self.blocks.read().get(series).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn get_tag(&self, id: &str) -> Result<Option<Tag>> {
        Ok(self.tags.read().get(id).cloned())
    }

    fn insert_tag(&self, tag: Tag) -> Result<Tag> {
        let mut tags = self.tags.write();
        let id = tag.id();
        if let Some(existing) = tags.get(&id) {
            return Ok(existing.clone());
        }
        self.log(&[WalRecord::TagInserted(tag.clone())])?;
        tags.insert(id, tag.clone());
        Ok(tag)
    }

    fn tags_with_key(&self, key: &str) -> Result<Vec<Tag>> {
        let prefix = format!("{}=", key);
        Ok(self
            .tags
            .read()
            .range(prefix.clone()..)
            .take_while(|(id, _)| id.starts_with(&prefix))
            .filter(|(_, tag)| tag.key() == key)
            .map(|(_, tag)| tag.clone())
            .collect())
    }

    fn insert_series(&self, series: SeriesRecord) -> Result<SeriesRecord> {
        // Held across the WAL append so two creators cannot both log
        let guard = self.series.upgradable_read();
        if let Some(existing) = guard.get(&series.id) {
            return Ok(existing.clone());
        }
        self.log(&[WalRecord::SeriesInserted(series.clone())])?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.insert(series.id.clone(), series.clone());
        drop(guard);

        let mut postings = self.postings.write();
        for tag_id in &series.tags {
            postings
                .entry(tag_id.clone())
                .or_default()
                .insert(series.id.clone());
        }
        Ok(series)
    }

    fn get_series(&self, ids: &[SeriesId]) -> Result<Vec<SeriesRecord>> {
        let series = self.series.read();
        Ok(ids.iter().filter_map(|id| series.get(id).cloned()).collect())
    }

    fn series_with_tag(&self, tag_id: &str) -> Result<BTreeSet<SeriesId>> {
        Ok(self
            .postings
            .read()
            .get(tag_id)
            .cloned()
            .unwrap_or_default())
    }

    fn latest_block_at_or_before(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        at: Timestamp,
    ) -> Result<Option<Block>> {
        Ok(self.existing_blocks(series).and_then(|blocks| {
            blocks
                .lock()
                .latest_at_or_before(resolution, at)
                .cloned()
        }))
    }

    fn blocks_between(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        after: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<Block>> {
        Ok(self
            .existing_blocks(series)
            .map(|blocks| blocks.lock().between(resolution, after, until))
            .unwrap_or_default())
    }

    fn transact(
        &self,
        series: &SeriesId,
        body: &mut dyn FnMut(&mut dyn BlockTxn) -> Result<()>,
    ) -> Result<()> {
        let blocks = self.series_blocks(series);
        let mut blocks = blocks.lock();
        let mut txn = MemoryTxn {
            blocks: &mut *blocks,
            next_block_id: &self.next_block_id,
            undo: Vec::new(),
            written: Vec::new(),
        };

        if let Err(e) = body(&mut txn) {
            txn.rollback();
            return Err(e);
        }

        let records: Vec<WalRecord> = txn
            .written
            .iter()
            .filter_map(|id| txn.blocks.blocks.get(id))
            .map(|block| WalRecord::BlockPut {
                series: series.clone(),
                block: block.clone(),
            })
            .collect();
        if let Err(e) = self.log(&records) {
            txn.rollback();
            return Err(e);
        }
        Ok(())
    }
}
