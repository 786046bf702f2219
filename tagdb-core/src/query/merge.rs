//! K-way ascending-time merge

use crate::{Result, Sample};

struct Source<I> {
    iter: I,
    head: Option<Sample>,
    done: bool,
}

/// Merges ascending sample streams into one ascending stream.
///
/// Equal timestamps are yielded in source order. Error items are passed
/// through as soon as they are pulled.
pub struct Merge<I> {
    sources: Vec<Source<I>>,
}

impl<I> Merge<I>
where
    I: Iterator<Item = Result<Sample>>,
{
    pub fn new(sources: impl IntoIterator<Item = I>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|iter| Source {
                    iter,
                    head: None,
                    done: false,
                })
                .collect(),
        }
    }

    /// Number of sources not yet exhausted
    pub fn live_sources(&self) -> usize {
        self.sources.iter().filter(|s| !s.done).count()
    }
}

impl<I> Iterator for Merge<I>
where
    I: Iterator<Item = Result<Sample>>,
{
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        for source in &mut self.sources {
            if source.head.is_none() && !source.done {
                match source.iter.next() {
                    Some(Ok(sample)) => source.head = Some(sample),
                    Some(Err(e)) => return Some(Err(e)),
                    None => source.done = true,
                }
            }
        }
        self.sources.retain(|s| !s.done);

        let index = self
            .sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.head.map(|(t, _)| (t, i)))
            .min()
            .map(|(_, i)| i)?;
        self.sources[index].head.take().map(Ok)
    }
}
