use crate::{error::Error, rng::RNG};
use anyhow::Result;
use rand::seq::SliceRandom;

/// Splits `0..num_entries` into `num_mini_batches` batches of `ceil(M / K)` indices, the last
/// one possibly shorter. One sweep over the batches always partitions the index range.
#[derive(Debug, Clone)]
pub struct Batcher {
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Batcher {
    pub fn new(num_entries: usize, num_mini_batches: usize) -> Result<Self> {
        if num_mini_batches == 0 || num_mini_batches > num_entries {
            return Err(Error::InvalidBatching {
                entries: num_entries,
                mini_batches: num_mini_batches,
            }
            .into());
        }
        Ok(Self {
            indices: (0..num_entries).collect(),
            batch_size: num_entries.div_ceil(num_mini_batches),
            cursor: 0,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn shuffle(&mut self) {
        RNG.with_borrow_mut(|rng| self.indices.shuffle(rng));
        self.cursor = 0;
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&self) -> bool {
        self.cursor >= self.indices.len()
    }

    pub fn next_batch(&mut self) -> Option<&[usize]> {
        if self.end() {
            return None;
        }
        let start = self.cursor;
        self.cursor = (start + self.batch_size).min(self.indices.len());
        Some(&self.indices[start..self.cursor])
    }
}

impl Iterator for Batcher {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().map(<[usize]>::to_vec)
    }
}
