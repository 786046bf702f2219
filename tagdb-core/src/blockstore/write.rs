//! Write path

use super::{cache_namespace, BlockStore, CachePolicy};
use crate::block::{series_skew, Block, Fanout, TimeSplit};
use crate::catalog::SeriesId;
use crate::storage::{transaction, BlockTxn};
use crate::{Resolution, Result, Sample, TagDbError, Timestamp, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

impl BlockStore {
    /// Add samples to `(series, resolution)`.
    ///
    /// With `offset`, each value is a delta from the one before it, starting
    /// from the last value already stored. FULL writes are forwarded to the
    /// downsample resolutions once their own write has landed.
    pub fn add_values(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        pairs: &[Sample],
        offset: bool,
    ) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let fan_out = resolution == Resolution::Full && self.config.downsample;
        let fanout = match self.config.cache_policy(resolution) {
            Some(policy) => self.add_cached(series, resolution, pairs, offset, fan_out, policy)?,
            None => self.add_durable(series, resolution, pairs, offset, fan_out)?,
        };

        for write in fanout.into_writes() {
            debug!(
                "Forwarding {} samples of {} to {}",
                write.samples.len(),
                series,
                write.resolution
            );
            self.add_values(series, write.resolution, &write.samples, false)?;
        }
        Ok(())
    }

    /// Append to the cached leading block.
    ///
    /// Whatever the new leading block gives up (size-split halves, aged-out
    /// samples) is committed to the durable tier before the CAS, so the
    /// cache never holds the only copy of a handed-down sample. A failed
    /// hand-off leaves the cache untouched.
    fn add_cached(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        pairs: &[Sample],
        offset: bool,
        fan_out: bool,
        policy: CachePolicy,
    ) -> Result<Fanout> {
        let namespace = cache_namespace(resolution);
        let mut retries = 0u32;

        loop {
            let current = self.cache.gets(&namespace, series.as_str())?;
            let token = current.as_ref().map(|(_, token)| *token);

            let (mut block, fanout) = self.update_block(
                series,
                resolution,
                current.map(|(block, _)| block),
                pairs,
                offset,
                fan_out,
                || self.durable_end_value(series, resolution),
            )?;
            let spilled = self.split_oversized(series, &mut block)?;
            let evicted = self.age_out(series, &mut block, policy)?;
            if !spilled.is_empty() || !evicted.is_empty() {
                self.hand_down(series, resolution, &spilled, &evicted)?;
            }

            if self.cache.cas(&namespace, series.as_str(), token, block)? {
                return Ok(fanout);
            }
            retries += 1;
            debug!(
                "Leading block of {} ({}) changed concurrently, retry {}",
                series, resolution, retries
            );
        }
    }

    fn add_durable(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        pairs: &[Sample],
        offset: bool,
        fan_out: bool,
    ) -> Result<Fanout> {
        transaction(self.store.as_ref(), series, |txn| {
            let latest = txn.latest_block(resolution)?;
            let (block, fanout) =
                self.update_block(series, resolution, latest, pairs, offset, fan_out, || Ok(0))?;
            self.put_split(txn, series, block)?;
            Ok(fanout)
        })
    }

    /// Move size-split halves and aged-out samples into the durable tier.
    ///
    /// A half that starts after everything durable becomes a block of its
    /// own; anything else is merged into the blocks covering it. Samples
    /// the durable tier already holds are skipped, so a hand-off repeated
    /// after a lost CAS, or raced by another writer, stores nothing twice.
    fn hand_down(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        spilled: &[Block],
        evicted: &[Sample],
    ) -> Result<()> {
        transaction(self.store.as_ref(), series, |txn| {
            for block in spilled {
                let overlaps = match txn.latest_block(resolution)? {
                    Some(latest) => newest_time(&latest)? >= block.start_time,
                    None => false,
                };
                if overlaps {
                    self.merge_durable(txn, series, resolution, &block.decode()?)?;
                } else {
                    txn.put_block(block.clone())?;
                }
            }
            self.merge_durable(txn, series, resolution, evicted)
        })
    }

    /// Insert sorted `samples` into the durable blocks covering them.
    ///
    /// Samples older than the first durable block start a new block in
    /// front of it.
    fn merge_durable(
        &self,
        txn: &mut dyn BlockTxn,
        series: &SeriesId,
        resolution: Resolution,
        samples: &[Sample],
    ) -> Result<()> {
        let Some(&(first, _)) = samples.first() else {
            return Ok(());
        };
        let blocks = txn.blocks_from(resolution, first)?;

        let head_len = blocks
            .first()
            .map_or(samples.len(), |b| samples.partition_point(|s| s.0 < b.start_time));
        let (head, mut rest) = samples.split_at(head_len);
        if let Some(block) = Block::from_samples(resolution, head) {
            self.put_split(txn, series, block)?;
        }

        let bounds: Vec<_> = blocks.iter().skip(1).map(|b| b.start_time).collect();
        for (i, mut block) in blocks.into_iter().enumerate() {
            let take = bounds
                .get(i)
                .map_or(rest.len(), |&bound| rest.partition_point(|s| s.0 < bound));
            let (group, tail) = rest.split_at(take);
            rest = tail;

            let fresh = not_yet_stored(&block, group)?;
            if fresh.is_empty() {
                continue;
            }
            block.append(&fresh);
            self.put_split(txn, series, block)?;
        }
        Ok(())
    }

    /// Store `block`, splitting it first if it is over the size cap
    fn put_split(&self, txn: &mut dyn BlockTxn, series: &SeriesId, mut block: Block) -> Result<()> {
        let spilled = self.split_oversized(series, &mut block)?;
        // The kept block moves out of its old start slot before the
        // split-off halves claim it
        txn.put_block(block)?;
        for older in spilled {
            txn.put_block(older)?;
        }
        Ok(())
    }

    fn split_oversized(&self, series: &SeriesId, block: &mut Block) -> Result<Vec<Block>> {
        let spilled = block.enforce_size_limit(self.config.max_block_bytes)?;
        if !spilled.is_empty() {
            info!(
                "Split {} ({}) into {} blocks at {} bytes",
                series,
                block.resolution,
                spilled.len() + 1,
                self.config.max_block_bytes
            );
        }
        Ok(spilled)
    }

    /// Append to `existing`, or start a new block when there is none
    #[allow(clippy::too_many_arguments)]
    fn update_block(
        &self,
        series: &SeriesId,
        resolution: Resolution,
        existing: Option<Block>,
        pairs: &[Sample],
        offset: bool,
        fan_out: bool,
        fresh_base: impl FnOnce() -> Result<Value>,
    ) -> Result<(Block, Fanout)> {
        let mut fanout = Fanout::new();

        let block = match existing {
            Some(mut block) => {
                let samples = absolute_sorted(pairs, offset, block.end_value);
                if fan_out {
                    let accepted: Vec<Sample> = samples
                        .iter()
                        .copied()
                        .filter(|&(t, _)| t >= block.start_time)
                        .collect();
                    fanout.crossings(series_skew(series), block.end_time, &accepted);
                }
                let stale = block.append(&samples);
                if !stale.is_empty() {
                    warn!(
                        "Dropping {} samples of {} ({}) older than block start {}",
                        stale.len(),
                        series,
                        resolution,
                        block.start_time
                    );
                }
                block
            }
            None => {
                let base = if offset { fresh_base()? } else { 0 };
                let samples = absolute_sorted(pairs, offset, base);
                let (&first, rest) = samples
                    .split_first()
                    .ok_or_else(|| TagDbError::Internal("no samples to start a block".into()))?;
                if fan_out {
                    fanout.seed(first);
                    fanout.crossings(series_skew(series), first.0, rest);
                }
                let mut block = Block::new(resolution, first);
                block.append(rest);
                block
            }
        };

        Ok((block, fanout))
    }

    /// Split an over-age leading block, returning the samples to hand down.
    ///
    /// The newest sample always stays behind so the leading block is never
    /// empty.
    fn age_out(
        &self,
        series: &SeriesId,
        block: &mut Block,
        policy: CachePolicy,
    ) -> Result<Vec<Sample>> {
        let now = self.clock.now();
        let age = now.saturating_sub(block.start_time);
        if age <= policy.max_age {
            return Ok(Vec::new());
        }

        let split_time = now.saturating_sub(policy.min_age);
        let mut split = block.split_at(split_time)?;
        if split.newer.is_none() {
            let Some(&(newest, _)) = split.older.last() else {
                return Ok(Vec::new());
            };
            split = block.split_at(newest)?;
        }
        let TimeSplit {
            older,
            newer: Some(newer),
        } = split
        else {
            return Ok(Vec::new());
        };

        info!(
            "Leading block of {} ({}) is too old ({} > {}); handing down {} samples before {}",
            series,
            block.resolution,
            age,
            policy.max_age,
            older.len(),
            newer.start_time
        );
        *block = newer;
        Ok(older)
    }

    fn durable_end_value(&self, series: &SeriesId, resolution: Resolution) -> Result<Value> {
        Ok(self
            .store
            .latest_block_at_or_before(series, resolution, i64::MAX)?
            .map(|block| block.end_value)
            .unwrap_or(0))
    }
}

/// Latest sample time in `block`; `end_time` is only the last one written
fn newest_time(block: &Block) -> Result<Timestamp> {
    if block.payload.is_empty() {
        return Ok(block.end_time);
    }
    Ok(block
        .decode()?
        .last()
        .map_or(block.end_time, |&(t, _)| t.max(block.end_time)))
}

/// Samples of `group` not already in `block`, counting repeats
fn not_yet_stored(block: &Block, group: &[Sample]) -> Result<Vec<Sample>> {
    if group.is_empty() {
        return Ok(Vec::new());
    }
    let mut stored: HashMap<Sample, usize> = HashMap::new();
    for sample in block.decode()? {
        *stored.entry(sample).or_default() += 1;
    }
    Ok(group
        .iter()
        .copied()
        .filter(|sample| match stored.get_mut(sample) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect())
}

/// Resolve offsets against `base`, then order by time
fn absolute_sorted(pairs: &[Sample], offset: bool, base: Value) -> Vec<Sample> {
    let mut samples = pairs.to_vec();
    if offset {
        let mut running = base;
        for sample in &mut samples {
            running = running.wrapping_add(sample.1);
            sample.1 = running;
        }
    }
    samples.sort_by_key(|&(t, _)| t);
    samples
}
