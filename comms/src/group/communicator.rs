use std::io;

/// A group of ranks that take part in the same collective operations.
///
/// Every rank must call the same collectives in the same order with buffers of the same
/// length, otherwise the group either errors out or hangs.
#[allow(unused)]
#[trait_variant::make(Communicator: Send)]
pub trait CommunicatorTemplate {
    /// The id of this rank inside the group, in `0..world_size`.
    fn rank(&self) -> usize;

    /// The amount of ranks in the group.
    fn world_size(&self) -> usize;

    /// Whether this rank is the root of the group (rank 0).
    fn is_root(&self) -> bool {
        self.rank() == super::ROOT
    }

    /// Replaces `buf` on every rank with the element-wise mean of all the ranks' buffers.
    ///
    /// # Arguments
    /// * `buf` - This rank's contribution, overwritten with the result.
    ///
    /// # Returns
    /// An io error if the transport fails or the buffers' lengths differ.
    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> io::Result<()>;

    /// Replaces `buf` on every rank with the root's buffer.
    ///
    /// # Arguments
    /// * `buf` - The root's source buffer, or the destination on every other rank.
    ///
    /// # Returns
    /// An io error if the transport fails or the buffers' lengths differ.
    async fn broadcast(&mut self, buf: &mut [f32]) -> io::Result<()>;

    /// Waits until every rank of the group has reached this point.
    async fn barrier(&mut self) -> io::Result<()>;
}
