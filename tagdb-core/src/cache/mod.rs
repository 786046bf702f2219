//! Cache tier - fast mutable home of the leading FULL and MINUTE blocks
//!
//! Entries are addressed by a key within a namespace. Writers use a
//! versioned read followed by compare-and-swap; nothing here needs to be
//! durable.

mod memory;

pub use memory::MemoryCache;

use crate::block::Block;
use crate::Result;

/// Version stamp returned by [`CacheStore::gets`]
pub type CasToken = u64;

/// Contract of the cache tier
pub trait CacheStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Block>>;

    /// Versioned read for a later [`CacheStore::cas`]
    fn gets(&self, namespace: &str, key: &str) -> Result<Option<(Block, CasToken)>>;

    /// Unconditional write
    fn set(&self, namespace: &str, key: &str, block: Block) -> Result<()>;

    /// Write only if the entry still has version `expected`.
    ///
    /// `expected = None` means the entry must be absent. Returns `false`
    /// when another writer got there first.
    fn cas(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<CasToken>,
        block: Block,
    ) -> Result<bool>;

    /// Remove an entry; returns whether it existed
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;
}
