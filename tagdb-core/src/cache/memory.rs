//! In-process cache store

use super::{CacheStore, CasToken};
use crate::block::Block;
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Entry {
    block: Block,
    version: CasToken,
}

/// Namespaced in-memory cache with versioned CAS
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<(String, String), Entry>>,
    next_version: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached blocks across all namespaces
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn bump(&self) -> CasToken {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn entry_key(namespace: &str, key: &str) -> (String, String) {
    (namespace.to_string(), key.to_string())
}

impl CacheStore for MemoryCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Block>> {
        Ok(self
            .entries
            .lock()
            .get(&entry_key(namespace, key))
            .map(|e| e.block.clone()))
    }

    fn gets(&self, namespace: &str, key: &str) -> Result<Option<(Block, CasToken)>> {
        Ok(self
            .entries
            .lock()
            .get(&entry_key(namespace, key))
            .map(|e| (e.block.clone(), e.version)))
    }

    fn set(&self, namespace: &str, key: &str, block: Block) -> Result<()> {
        let version = self.bump();
        self.entries
            .lock()
            .insert(entry_key(namespace, key), Entry { block, version });
        Ok(())
    }

    fn cas(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<CasToken>,
        block: Block,
    ) -> Result<bool> {
        let version = self.bump();
        let mut entries = self.entries.lock();
        let key = entry_key(namespace, key);
        let current = entries.get(&key).map(|e| e.version);
        if current != expected {
            return Ok(false);
        }
        entries.insert(key, Entry { block, version });
        Ok(true)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .remove(&entry_key(namespace, key))
            .is_some())
    }
}
