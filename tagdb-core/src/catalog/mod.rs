//! Tag and series catalog
//!
//! Tags and series are immutable once written, so both catalogs keep a
//! positive-only cache in front of the durable store: hits are remembered
//! forever, misses are never cached.

mod expr;
mod series;
mod tag;

pub use expr::{Expression, Grouping};
pub use series::{GroupKey, Series, SeriesCatalog, SeriesGroups, SeriesId};
pub use tag::{Tag, TagCatalog};

use crossbeam_skiplist::SkipMap;
use std::fmt;
use std::sync::Arc;

/// Append-only concurrent map from canonical id to a shared entity.
///
/// Concurrent inserts for the same id converge on whichever value landed
/// first.
pub struct InternCache<T> {
    entries: SkipMap<String, Arc<T>>,
}

impl<T: Send + Sync + 'static> InternCache<T> {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Insert unless present; returns the cached value either way
    pub fn insert(&self, id: String, value: Arc<T>) -> Arc<T> {
        self.entries.get_or_insert(id, value).value().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Send + Sync + 'static> Default for InternCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InternCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternCache")
            .field("len", &self.entries.len())
            .finish()
    }
}
