//! Tags: immutable `key=value` labels

use super::InternCache;
use crate::storage::DurableStore;
use crate::{Result, TagDbError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single unique key/value label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse `key=value`, splitting on the first `=`
    pub fn parse(s: &str) -> Result<Self> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| TagDbError::Parse(format!("tag {:?} is not key=value", s)))?;
        Ok(Self::new(key, value))
    }

    /// Reject tags that no expression could select or group by.
    ///
    /// Keys and values may not contain `{}[],` or start or end with
    /// whitespace, since expression items are split on those and trimmed.
    pub fn validate(&self) -> Result<()> {
        for part in [&self.key, &self.value] {
            if part.contains(|c: char| matches!(c, '{' | '}' | '[' | ']' | ',')) {
                return Err(TagDbError::Parse(format!(
                    "tag {:?} contains a reserved character",
                    self.id()
                )));
            }
            if part.trim() != part.as_str() {
                return Err(TagDbError::Parse(format!(
                    "tag {:?} has surrounding whitespace",
                    self.id()
                )));
            }
        }
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Canonical durable id
    pub fn id(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Interns tags against the durable store
pub struct TagCatalog {
    store: Arc<dyn DurableStore>,
    cache: InternCache<Tag>,
}

impl TagCatalog {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            cache: InternCache::new(),
        }
    }

    /// Fetch an existing tag
    pub fn get(&self, key: &str, value: &str) -> Result<Option<Arc<Tag>>> {
        self.get_by_id(&format!("{}={}", key, value))
    }

    /// Fetch an existing tag by canonical id
    pub fn get_by_id(&self, id: &str) -> Result<Option<Arc<Tag>>> {
        if let Some(tag) = self.cache.get(id) {
            return Ok(Some(tag));
        }
        Ok(self
            .store
            .get_tag(id)?
            .map(|tag| self.cache.insert(id.to_string(), Arc::new(tag))))
    }

    /// Fetch a tag, creating it if it does not exist yet
    pub fn get_or_create(&self, key: &str, value: &str) -> Result<Arc<Tag>> {
        let tag = Tag::new(key, value);
        let id = tag.id();
        if let Some(cached) = self.cache.get(&id) {
            return Ok(cached);
        }
        tag.validate()?;
        let stored = self.store.insert_tag(tag)?;
        Ok(self.cache.insert(id, Arc::new(stored)))
    }

    /// Look up a `key=value` string without creating anything.
    ///
    /// Query paths use this: a tag that does not exist cannot match.
    pub fn lookup_str(&self, s: &str) -> Result<Option<Arc<Tag>>> {
        let tag = Tag::parse(s)?;
        self.get(tag.key(), tag.value())
    }

    /// Resolve a `key=value` string, creating the tag on first use.
    ///
    /// Only ingest paths may call this.
    pub fn intern_str(&self, s: &str) -> Result<Arc<Tag>> {
        let tag = Tag::parse(s)?;
        self.get_or_create(tag.key(), tag.value())
    }

    /// All tags with the given key, caching each as it is yielded
    pub fn all_with_key(&self, key: &str) -> Result<impl Iterator<Item = Arc<Tag>> + '_> {
        let records = self.store.tags_with_key(key)?;
        Ok(records.into_iter().map(move |tag| {
            let id = tag.id();
            self.cache.insert(id, Arc::new(tag))
        }))
    }

    /// Number of cached tags
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
