use std::num::NonZeroUsize;
use std::ops::Range;

/// Splits `total` samples among `world_size` ranks and returns the shard for `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and all of the same size.
/// - The last `total % world_size` samples are left out, so every rank runs the same amount of
///   steps and no rank waits on a collective the others never reach.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(world_size > 0);
    assert!(rank < world_size);

    let size = total / world_size;
    let start = rank * size;

    start..start + size
}

/// The slice of the data a rank trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl ShardSpec {
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Self {
        assert!(rank < world_size.get(), "rank out of range");
        Self { rank, world_size }
    }

    /// The shard covering every sample.
    pub fn whole() -> Self {
        Self::new(0, NonZeroUsize::MIN)
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_equal_sizes() {
        // total 10, ranks 3 => sizes 3,3,3 and sample 9 is dropped
        assert_eq!(shard_range(10, 0, 3), 0..3);
        assert_eq!(shard_range(10, 1, 3), 3..6);
        assert_eq!(shard_range(10, 2, 3), 6..9);
    }

    #[test]
    fn single_rank_covers_everything() {
        assert_eq!(ShardSpec::whole().range(7), 0..7);
    }

    #[test]
    fn fewer_samples_than_ranks() {
        assert!(shard_range(2, 0, 3).is_empty());
        assert!(shard_range(2, 2, 3).is_empty());
    }

    #[test]
    fn shard_spec_range_matches_function() {
        let spec = ShardSpec::new(1, NonZeroUsize::new(3).unwrap());
        assert_eq!(spec.range(10), 3..6);
    }
}
