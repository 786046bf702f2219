//! Series: immutable tag sets and expression resolution

use super::expr::ExpressionSyntax;
use super::{Expression, Grouping, InternCache, Tag, TagCatalog};
use crate::storage::{DurableStore, SeriesRecord};
use crate::{Result, TagDbError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Canonical series identity: sorted tag ids joined by `,`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesId(String);

impl SeriesId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the id of an already sorted, deduplicated tag set
    pub fn from_tags(tags: &[Arc<Tag>]) -> Self {
        let ids: Vec<String> = tags.iter().map(|t| t.id()).collect();
        Self(ids.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unique combination of tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    id: SeriesId,
    tags: Vec<Arc<Tag>>,
}

impl Series {
    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    /// Tags sorted by canonical id
    pub fn tags(&self) -> &[Arc<Tag>] {
        &self.tags
    }

    /// Tags of this series with the given key
    pub fn tags_with_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Arc<Tag>> {
        self.tags.iter().filter(move |t| t.key() == key)
    }

    fn record(&self) -> SeriesRecord {
        SeriesRecord {
            id: self.id.clone(),
            tags: self.tags.iter().map(|t| t.id()).collect(),
        }
    }
}

/// Grouping bucket key: one tag per grouping dimension, in expression order
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(Vec<Arc<Tag>>);

impl GroupKey {
    pub fn new(tags: Vec<Arc<Tag>>) -> Self {
        Self(tags)
    }

    pub fn tags(&self) -> &[Arc<Tag>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", tag)?;
        }
        f.write_str(")")
    }
}

/// Series per grouping bucket
pub type SeriesGroups = BTreeMap<GroupKey, Vec<Arc<Series>>>;

/// Interns series and resolves tag expressions into series
pub struct SeriesCatalog {
    store: Arc<dyn DurableStore>,
    tags: Arc<TagCatalog>,
    cache: InternCache<Series>,
}

impl SeriesCatalog {
    pub fn new(store: Arc<dyn DurableStore>, tags: Arc<TagCatalog>) -> Self {
        Self {
            store,
            tags,
            cache: InternCache::new(),
        }
    }

    pub fn tags(&self) -> &Arc<TagCatalog> {
        &self.tags
    }

    /// Fetch the series for exactly this tag set, creating it if needed.
    ///
    /// Input order and duplicates do not matter.
    pub fn get_or_create(&self, mut tags: Vec<Arc<Tag>>) -> Result<Arc<Series>> {
        if tags.is_empty() {
            return Err(TagDbError::Parse("a series needs at least one tag".into()));
        }
        tags.sort_by_cached_key(|t| t.id());
        tags.dedup();

        let id = SeriesId::from_tags(&tags);
        if let Some(series) = self.cache.get(id.as_str()) {
            return Ok(series);
        }

        let series = Series { id, tags };
        self.store.insert_series(series.record())?;
        Ok(self.cache.insert(series.id.as_str().to_string(), Arc::new(series)))
    }

    /// Fetch an existing series
    pub fn get(&self, id: &SeriesId) -> Result<Option<Arc<Series>>> {
        Ok(self.get_many([id.clone()])?.into_iter().next())
    }

    /// Resolve ids through the cache, then one batched durable fetch.
    ///
    /// Unknown ids are skipped. Results follow the input order.
    pub fn get_many(&self, ids: impl IntoIterator<Item = SeriesId>) -> Result<Vec<Arc<Series>>> {
        let ids: Vec<SeriesId> = ids.into_iter().collect();
        let missing: Vec<SeriesId> = ids
            .iter()
            .filter(|id| self.cache.get(id.as_str()).is_none())
            .cloned()
            .collect();

        if !missing.is_empty() {
            debug!(count = missing.len(), "fetching series from durable store");
            for record in self.store.get_series(&missing)? {
                let series = self.hydrate(record)?;
                self.cache
                    .insert(series.id.as_str().to_string(), Arc::new(series));
            }
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.cache.get(id.as_str()))
            .collect())
    }

    fn hydrate(&self, record: SeriesRecord) -> Result<Series> {
        let tags = record
            .tags
            .iter()
            .map(|tag_id| {
                self.tags.get_by_id(tag_id)?.ok_or_else(|| {
                    TagDbError::Corruption(format!(
                        "series {} references missing tag {}",
                        record.id, tag_id
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Series {
            id: record.id,
            tags,
        })
    }

    /// Parse an expression and look up its tags without creating any
    pub fn parse_expression(&self, expr: &str) -> Result<Expression> {
        let syntax = ExpressionSyntax::parse(expr)?;

        let mut expression = Expression::default();
        for selector in syntax.selectors {
            match self.tags.get(selector.key(), selector.value())? {
                Some(tag) => expression.selectors.push(tag),
                None => expression.unknown_selectors.push(selector.id()),
            }
        }
        for key in syntax.group_keys {
            let tags = self.tags.all_with_key(&key)?.collect();
            expression.groupings.push(Grouping { key, tags });
        }
        Ok(expression)
    }

    /// Resolve an expression to series per grouping bucket.
    ///
    /// Without groupings the result is a single bucket keyed by the empty
    /// group key, even when nothing matched.
    pub fn resolve(&self, expression: &Expression) -> Result<SeriesGroups> {
        let mut groups = SeriesGroups::new();
        if expression.groupings.is_empty() {
            groups.insert(GroupKey::default(), Vec::new());
        }
        if expression.matches_nothing() {
            return Ok(groups);
        }

        let mut candidates: Option<BTreeSet<SeriesId>> = None;
        for tag in &expression.selectors {
            let ids = self.store.series_with_tag(&tag.id())?;
            candidates = Some(intersect(candidates, ids));
        }
        for grouping in &expression.groupings {
            let mut any_of = BTreeSet::new();
            for tag in &grouping.tags {
                any_of.extend(self.store.series_with_tag(&tag.id())?);
            }
            candidates = Some(intersect(candidates, any_of));
        }
        let candidates = candidates.unwrap_or_default();
        if candidates.is_empty() {
            return Ok(groups);
        }

        let series = self.get_many(candidates)?;
        if expression.groupings.is_empty() {
            groups.insert(GroupKey::default(), series);
            return Ok(groups);
        }

        for s in series {
            let dimensions: Vec<Vec<Arc<Tag>>> = expression
                .groupings
                .iter()
                .map(|g| s.tags_with_key(&g.key).cloned().collect())
                .collect();
            for key in cartesian_product(&dimensions) {
                groups.entry(GroupKey::new(key)).or_default().push(s.clone());
            }
        }
        Ok(groups)
    }

    /// Parse and resolve in one step
    pub fn find(&self, expr: &str) -> Result<SeriesGroups> {
        let expression = self.parse_expression(expr)?;
        self.resolve(&expression)
    }
}

fn intersect(acc: Option<BTreeSet<SeriesId>>, next: BTreeSet<SeriesId>) -> BTreeSet<SeriesId> {
    match acc {
        None => next,
        Some(acc) => acc.intersection(&next).cloned().collect(),
    }
}

fn cartesian_product(dimensions: &[Vec<Arc<Tag>>]) -> Vec<Vec<Arc<Tag>>> {
    dimensions.iter().fold(vec![Vec::new()], |partial, dimension| {
        partial
            .iter()
            .flat_map(|prefix| {
                dimension.iter().map(move |tag| {
                    let mut key = prefix.clone();
                    key.push(tag.clone());
                    key
                })
            })
            .collect()
    })
}
