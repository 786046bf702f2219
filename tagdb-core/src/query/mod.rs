//! Query engine
//!
//! Resolves a tag expression into grouping buckets, opens one value stream
//! per series and merges each bucket into a single ascending stream.

mod merge;

pub use merge::Merge;

use crate::blockstore::{BlockStore, SeriesValues};
use crate::catalog::{GroupKey, Series, SeriesCatalog};
use crate::{Resolution, Result, Sample, TimeRange};
use std::sync::Arc;
use tracing::debug;

/// One grouping bucket of a query
pub struct GroupResult {
    pub key: GroupKey,
    pub series: Vec<Arc<Series>>,
    /// Merged samples of every series in the bucket
    pub values: Merge<SeriesValues>,
}

/// Query result: buckets in group key order
pub struct QueryResult {
    /// Grouping keys of the expression, in expression order
    pub group_keys: Vec<String>,
    pub groups: Vec<GroupResult>,
}

impl QueryResult {
    /// Drain every bucket, failing on the first error item
    pub fn collect(self) -> Result<Vec<(GroupKey, Vec<Sample>)>> {
        self.groups
            .into_iter()
            .map(|group| Ok((group.key, group.values.collect::<Result<Vec<_>>>()?)))
            .collect()
    }
}

/// Answers tag-expression queries
pub struct QueryEngine {
    series: Arc<SeriesCatalog>,
    blocks: Arc<BlockStore>,
}

impl QueryEngine {
    pub fn new(series: Arc<SeriesCatalog>, blocks: Arc<BlockStore>) -> Self {
        Self { series, blocks }
    }

    /// Run `expr` over `range` at `resolution`
    pub fn query(
        &self,
        expr: &str,
        range: TimeRange,
        resolution: Resolution,
    ) -> Result<QueryResult> {
        let expression = self.series.parse_expression(expr)?;
        let groups = self.series.resolve(&expression)?;
        debug!(
            "Query {} resolved to {} groups over {}..={} ({})",
            expr,
            groups.len(),
            range.start,
            range.end,
            resolution
        );

        let groups = groups
            .into_iter()
            .map(|(key, series)| {
                let streams = series
                    .iter()
                    .map(|s| self.blocks.get_values(s.id(), resolution, range))
                    .collect::<Result<Vec<_>>>()?;
                Ok(GroupResult {
                    key,
                    series,
                    values: Merge::new(streams),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResult {
            group_keys: expression.group_keys().map(str::to_string).collect(),
            groups,
        })
    }
}
