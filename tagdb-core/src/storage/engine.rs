//! Storage engine - top-level coordinator

use super::{DurableStore, MemoryStore, StorageConfig};
use crate::blockstore::{BlockStore, BlockStoreConfig};
use crate::cache::{CacheStore, MemoryCache};
use crate::catalog::{Series, SeriesCatalog, Tag, TagCatalog};
use crate::clock::{Clock, SystemClock};
use crate::query::{QueryEngine, QueryResult};
use crate::{Resolution, Result, Sample, TimeRange, Timestamp};
use std::sync::Arc;
use tracing::info;

/// tagdb storage engine
///
/// Owns the catalogs, the block store and the query engine, all wired to
/// one durable store, one cache store and one clock.
pub struct Engine {
    tags: Arc<TagCatalog>,
    series: Arc<SeriesCatalog>,
    blocks: Arc<BlockStore>,
    query: QueryEngine,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Open an engine over the reference stores
    pub fn open(config: StorageConfig) -> Result<Self> {
        let store = MemoryStore::open(&config)?;
        info!(
            "Opened tagdb engine ({})",
            if store.is_persistent() {
                "persistent"
            } else {
                "in-memory"
            }
        );
        Ok(Self::with_parts(
            Arc::new(store),
            Arc::new(MemoryCache::new()),
            Arc::new(SystemClock),
            config.block_store,
        ))
    }

    /// Wire an engine over caller-supplied stores and clock
    pub fn with_parts(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: BlockStoreConfig,
    ) -> Self {
        let tags = Arc::new(TagCatalog::new(store.clone()));
        let series = Arc::new(SeriesCatalog::new(store.clone(), tags.clone()));
        let blocks = Arc::new(BlockStore::new(store, cache, clock.clone(), config));
        let query = QueryEngine::new(series.clone(), blocks.clone());
        Self {
            tags,
            series,
            blocks,
            query,
            clock,
        }
    }

    /// Add FULL samples to the series named by `tags`.
    ///
    /// Tags and the series are created on first use. Every tag string is
    /// validated before anything is written.
    pub fn add_values<S: AsRef<str>>(
        &self,
        tags: &[S],
        pairs: &[Sample],
        offset: bool,
    ) -> Result<Arc<Series>> {
        let parsed = tags
            .iter()
            .map(|s| {
                let tag = Tag::parse(s.as_ref())?;
                tag.validate()?;
                Ok(tag)
            })
            .collect::<Result<Vec<_>>>()?;

        let interned = parsed
            .iter()
            .map(|tag| self.tags.get_or_create(tag.key(), tag.value()))
            .collect::<Result<Vec<_>>>()?;
        let series = self.series.get_or_create(interned)?;

        self.blocks
            .add_values(series.id(), Resolution::Full, pairs, offset)?;
        Ok(series)
    }

    /// Run a tag-expression query.
    ///
    /// A missing start means the epoch, a missing end means the end of
    /// time. Negative bounds count back from now.
    pub fn query(
        &self,
        expr: &str,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        resolution: Resolution,
    ) -> Result<QueryResult> {
        let now = self.clock.now();
        let range = TimeRange::new(
            start.map_or(0, |t| relative_to(t, now)),
            end.map_or(Timestamp::MAX, |t| relative_to(t, now)),
        );
        self.query.query(expr, range, resolution)
    }

    pub fn tags(&self) -> &Arc<TagCatalog> {
        &self.tags
    }

    pub fn series(&self) -> &Arc<SeriesCatalog> {
        &self.series
    }

    pub fn blocks(&self) -> &Arc<BlockStore> {
        &self.blocks
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn relative_to(t: Timestamp, now: Timestamp) -> Timestamp {
    if t < 0 {
        now.saturating_add(t)
    } else {
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::GroupKey;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    fn engine(now: Timestamp) -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let engine = Engine::with_parts(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            clock.clone(),
            BlockStoreConfig::default(),
        );
        (engine, clock)
    }

    fn single(result: QueryResult) -> Vec<Sample> {
        let mut groups = result.collect().unwrap();
        assert_eq!(groups.len(), 1);
        groups.remove(0).1
    }

    #[test]
    fn test_write_then_query() {
        let (engine, _) = engine(10_000);
        engine
            .add_values(&["project=web", "host=a"], &[(9_000, 1), (9_010, 2)], false)
            .unwrap();

        let result = engine.query("{project=web}", None, None, Resolution::Full).unwrap();
        assert!(result.group_keys.is_empty());
        assert_eq!(result.groups[0].key, GroupKey::default());
        assert_eq!(single(result), vec![(9_000, 1), (9_010, 2)]);
    }

    #[test]
    fn test_malformed_tag_has_no_effect() {
        let (engine, _) = engine(10_000);
        let err = engine
            .add_values(&["project=web", "broken"], &[(1, 1)], false)
            .unwrap_err();
        assert!(err.is_parse());
        assert!(engine.tags().get("project", "web").unwrap().is_none());
    }

    #[test]
    fn test_every_written_tag_can_be_queried() {
        let (engine, _) = engine(10_000);
        let err = engine
            .add_values(&["project=web", "host={a}"], &[(1, 1)], false)
            .unwrap_err();
        assert!(err.is_parse());
        assert!(engine.tags().get("project", "web").unwrap().is_none());
        assert!(engine.add_values(&["host=a "], &[(1, 1)], false).unwrap_err().is_parse());

        engine
            .add_values(&["path=a b=c", "host=a"], &[(2, 5)], false)
            .unwrap();
        let result = engine.query("{path=a b=c}[host]", None, None, Resolution::Full).unwrap();
        assert_eq!(single(result), vec![(2, 5)]);
    }

    #[test]
    fn test_group_by_hostname() {
        let (engine, _) = engine(10_000);
        engine
            .add_values(&["project=web", "hostname=a", "metric=cpu"], &[(100, 1), (300, 3)], false)
            .unwrap();
        engine
            .add_values(&["project=web", "hostname=a", "metric=mem"], &[(200, 2)], false)
            .unwrap();
        engine
            .add_values(&["project=web", "hostname=b", "metric=cpu"], &[(150, 5)], false)
            .unwrap();
        engine
            .add_values(&["project=db", "hostname=b", "metric=cpu"], &[(175, 9)], false)
            .unwrap();

        let result = engine
            .query("{project=web}[hostname]", None, None, Resolution::Full)
            .unwrap();
        assert_eq!(result.group_keys, vec!["hostname"]);
        let groups = result.collect().unwrap();
        let rendered: Vec<(String, Vec<Sample>)> = groups
            .into_iter()
            .map(|(key, values)| (key.to_string(), values))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("(hostname=a)".to_string(), vec![(100, 1), (200, 2), (300, 3)]),
                ("(hostname=b)".to_string(), vec![(150, 5)]),
            ]
        );
    }

    #[test]
    fn test_relative_query_window() {
        let (engine, clock) = engine(10_000);
        engine
            .add_values(&["host=a"], &[(9_000, 1), (9_500, 2), (9_900, 3)], false)
            .unwrap();

        let recent = engine
            .query("{host=a}", Some(-600), None, Resolution::Full)
            .unwrap();
        assert_eq!(single(recent), vec![(9_500, 2), (9_900, 3)]);

        clock.advance(100);
        let window = engine
            .query("{host=a}", Some(-1_100), Some(-400), Resolution::Full)
            .unwrap();
        assert_eq!(single(window), vec![(9_000, 1), (9_500, 2)]);
    }

    #[test]
    fn test_unknown_selector_yields_empty_bucket() {
        let (engine, _) = engine(10_000);
        engine.add_values(&["host=a"], &[(1, 1)], false).unwrap();
        let result = engine.query("{host=b}", None, None, Resolution::Full).unwrap();
        assert_eq!(single(result), Vec::<Sample>::new());
        assert!(engine.query("{host", None, None, Resolution::Full).is_err());
    }

    #[test]
    fn test_downsampled_query() {
        let (engine, _) = engine(100_000);
        let pairs: Vec<Sample> = (0..3_600).step_by(15).map(|t| (90_000 + t, t)).collect();
        engine.add_values(&["host=a"], &pairs, false).unwrap();

        let minutes = single(engine.query("{host=a}", None, None, Resolution::Minute).unwrap());
        assert!(minutes.len() >= 59 && minutes.len() <= 61);
        let full = single(engine.query("{host=a}", None, None, Resolution::Full).unwrap());
        assert_eq!(full, pairs);
    }

    #[test]
    fn test_persistent_engine_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::persistent(temp_dir.path());
        {
            let engine = Engine::open(config.clone()).unwrap();
            engine
                .add_values(&["host=a", "dc=x"], &[(1, 1)], false)
                .unwrap();
        }
        let engine = Engine::open(config).unwrap();
        assert!(engine.tags().get("dc", "x").unwrap().is_some());
        let groups = engine.series().find("{dc=x}").unwrap();
        assert_eq!(groups[&GroupKey::default()].len(), 1);
    }
}
