//! Read path

use super::{cache_namespace, BlockStore};
use crate::block::Block;
use crate::catalog::SeriesId;
use crate::{Resolution, Result, Sample, TimeRange, Timestamp};
use std::collections::VecDeque;

impl BlockStore {
    /// Samples of `(series, resolution)` within `range`, ascending by time.
    ///
    /// Block metadata is fetched up front; payloads are decoded one block at
    /// a time as the iterator advances.
    pub fn get_values(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        range: TimeRange,
    ) -> Result<SeriesValues> {
        if range.start > range.end {
            return Ok(SeriesValues::new(range, Vec::new(), None));
        }

        let leading = match self.config.cache_policy(resolution) {
            Some(_) => self
                .cache
                .get(&cache_namespace(resolution), series.as_str())?,
            None => None,
        };
        if let Some(block) = &leading {
            if block.start_time <= range.start {
                return Ok(SeriesValues::new(range, vec![block.clone()], None));
            }
        }

        let mut durable = Vec::new();
        if let Some(prefix) = self
            .store
            .latest_block_at_or_before(series, resolution, range.start)?
        {
            durable.push(prefix);
        }
        durable.extend(
            self.store
                .blocks_between(series, resolution, range.start, range.end)?,
        );

        let leading = leading.filter(|block| block.start_time <= range.end);
        Ok(SeriesValues::new(range, durable, leading))
    }
}

/// Lazy, ascending stream of one series' samples.
///
/// A block that fails to decode yields a single error item; iteration then
/// continues with the next block.
#[derive(Debug)]
pub struct SeriesValues {
    range: TimeRange,
    pending: VecDeque<Block>,
    leading: Option<Block>,
    current: std::vec::IntoIter<Sample>,
    last_yielded: Option<Timestamp>,
    /// Last time the durable tier yielded, fixed once the cached leading
    /// block takes over
    durable_through: Option<Timestamp>,
}

impl SeriesValues {
    fn new(range: TimeRange, durable: Vec<Block>, leading: Option<Block>) -> Self {
        Self {
            range,
            pending: durable.into(),
            leading,
            current: Vec::new().into_iter(),
            last_yielded: None,
            durable_through: None,
        }
    }

    fn next_block(&mut self) -> Option<Block> {
        if let Some(block) = self.pending.pop_front() {
            return Some(block);
        }
        let leading = self.leading.take()?;
        self.durable_through = self.last_yielded;
        Some(leading)
    }
}

impl Iterator for SeriesValues {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.current.next() {
                if !self.range.contains(sample.0) {
                    continue;
                }
                // The leading block may repeat what the durable tier just
                // handed back
                if self.durable_through.is_some_and(|last| sample.0 <= last) {
                    continue;
                }
                self.last_yielded = Some(sample.0);
                return Some(Ok(sample));
            }

            let block = self.next_block()?;
            match block.decode() {
                Ok(samples) => self.current = samples.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
