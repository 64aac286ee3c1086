use std::num::NonZeroUsize;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::dataset::{Batch, TokenDataset};
use super::shard::ShardSpec;

/// Shard-aware DataLoader producing owned batches.
///
/// Every epoch the whole dataset is permuted with a generator seeded from `(seed, epoch)` and
/// then sliced with the shard's range, so all ranks agree on the permutation and never share a
/// sample.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: TokenDataset,
    shard: ShardSpec,
    batch_size: NonZeroUsize,
    shuffle: bool,
    seed: u64,
    order: Vec<usize>,
}

impl DataLoader {
    pub fn new(
        dataset: TokenDataset,
        shard: ShardSpec,
        batch_size: NonZeroUsize,
        shuffle: bool,
        seed: u64,
    ) -> Self {
        let mut loader = Self {
            dataset,
            shard,
            batch_size,
            shuffle,
            seed,
            order: Vec::new(),
        };

        loader.set_epoch(0);
        loader
    }

    /// Recomputes this shard's sample order for `epoch`.
    pub fn set_epoch(&mut self, epoch: usize) {
        let mut order: Vec<_> = (0..self.dataset.len()).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }

        let range = self.shard.range(order.len());
        order.truncate(range.end);
        order.drain(..range.start);
        self.order = order;
    }

    /// The amount of batches per epoch, counting a last partial one.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len().div_ceil(self.batch_size.get())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The amount of samples this shard sees per epoch.
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn shard(&self) -> ShardSpec {
        self.shard
    }

    #[inline]
    pub fn dataset(&self) -> &TokenDataset {
        &self.dataset
    }

    /// Iterates over this epoch's batches.
    pub fn iter(&self) -> impl Iterator<Item = Batch> + '_ {
        self.order
            .chunks(self.batch_size.get())
            .map(|indices| self.dataset.batch(indices))
    }
}
