use std::{
    io,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::Barrier;

use super::{Communicator, ROOT, length_mismatch};

struct Shared {
    barrier: Barrier,
    acc: Mutex<Vec<f32>>,
    failed: AtomicBool,
}

/// A process group whose ranks all live inside this process, each one driven by its own task.
///
/// Collectives are phased with a barrier: the leader resets the shared accumulator, every rank
/// adds its contribution, the leader averages it and every rank copies the result back.
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Creates the handles for every rank of a new in-process group.
    ///
    /// # Arguments
    /// * `world_size` - The amount of ranks in the group.
    ///
    /// # Returns
    /// One handle per rank, ordered by rank.
    pub fn new(world_size: NonZeroUsize) -> Vec<Self> {
        let world_size = world_size.get();
        let shared = Arc::new(Shared {
            barrier: Barrier::new(world_size),
            acc: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
        });

        (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Creates a group with a single rank, every collective is the identity.
    pub fn solo() -> Self {
        Self::new(NonZeroUsize::MIN).remove(0)
    }

    /// Waits on the shared barrier, returning whether this rank was elected leader.
    async fn wait(&self) -> bool {
        self.shared.barrier.wait().await.is_leader()
    }

    fn reset(&self, len: usize) {
        let mut acc = self.shared.acc.lock();
        acc.clear();
        acc.resize(len, 0.0);
        self.shared.failed.store(false, Ordering::SeqCst);
    }

    fn accumulate(&self, buf: &[f32]) {
        let mut acc = self.shared.acc.lock();

        if acc.len() != buf.len() {
            self.shared.failed.store(true, Ordering::SeqCst);
            return;
        }

        acc.iter_mut().zip(buf).for_each(|(a, b)| *a += b);
    }

    fn scale(&self, factor: f32) {
        self.shared.acc.lock().iter_mut().for_each(|a| *a *= factor);
    }

    fn publish(&self, buf: &[f32]) {
        let mut acc = self.shared.acc.lock();
        acc.clear();
        acc.extend_from_slice(buf);
        self.shared.failed.store(false, Ordering::SeqCst);
    }

    fn pull(&self, buf: &mut [f32]) -> io::Result<()> {
        let acc = self.shared.acc.lock();

        if acc.len() != buf.len() {
            self.shared.failed.store(true, Ordering::SeqCst);
            return length_mismatch(buf.len(), acc.len());
        }

        buf.copy_from_slice(&acc);
        Ok(())
    }

    fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }
}

impl Communicator for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> io::Result<()> {
        if self.wait().await {
            self.reset(buf.len());
        }

        self.wait().await;
        self.accumulate(buf);

        if self.wait().await && !self.failed() {
            self.scale(1. / self.world_size as f32);
        }

        self.wait().await;
        let failed = self.failed();
        let pulled = if failed { Ok(()) } else { self.pull(buf) };

        // Nobody may reset the accumulator while another rank is still copying out of it.
        self.wait().await;

        if failed {
            let expected = self.shared.acc.lock().len();
            return length_mismatch(buf.len(), expected);
        }

        pulled
    }

    async fn broadcast(&mut self, buf: &mut [f32]) -> io::Result<()> {
        self.wait().await;

        if self.rank == ROOT {
            self.publish(buf);
        }

        self.wait().await;
        let pulled = if self.rank == ROOT {
            Ok(())
        } else {
            self.pull(buf)
        };

        self.wait().await;

        match pulled {
            Ok(()) if self.failed() => {
                let len = self.shared.acc.lock().len();
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("a rank rejected the root's buffer of length {len}"),
                ))
            }
            pulled => pulled,
        }
    }

    async fn barrier(&mut self) -> io::Result<()> {
        self.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(n: usize) -> Vec<LocalGroup> {
        LocalGroup::new(NonZeroUsize::new(n).unwrap())
    }

    #[tokio::test]
    async fn solo_all_reduce_is_identity() {
        let mut solo = LocalGroup::solo();
        let mut buf = [1.0, -2.0, 3.5];

        solo.all_reduce_mean(&mut buf).await.unwrap();

        assert_eq!(buf, [1.0, -2.0, 3.5]);
        assert!(solo.is_root());
        assert_eq!(solo.world_size(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_reduce_averages_across_ranks() {
        let handles = group(4).into_iter().map(|mut g| {
            tokio::spawn(async move {
                let r = g.rank() as f32;
                let mut buf = [r, 2.0 * r];
                g.all_reduce_mean(&mut buf).await.unwrap();

                // A second round must not see stale data from the first one.
                let mut again = [1.0, 1.0];
                g.all_reduce_mean(&mut again).await.unwrap();
                (buf, again)
            })
        });

        for h in handles.collect::<Vec<_>>() {
            let (buf, again) = h.await.unwrap();
            assert_eq!(buf, [1.5, 3.0]);
            assert_eq!(again, [1.0, 1.0]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn broadcast_copies_root_buffer() {
        let handles = group(3).into_iter().map(|mut g| {
            tokio::spawn(async move {
                let mut buf = [g.rank() as f32 + 10.0; 3];
                g.broadcast(&mut buf).await.unwrap();
                buf
            })
        });

        for h in handles.collect::<Vec<_>>() {
            assert_eq!(h.await.unwrap(), [10.0; 3]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mismatched_lengths_fail_on_every_rank() {
        let handles = group(2).into_iter().map(|mut g| {
            tokio::spawn(async move {
                let mut buf = vec![1.0; 2 + g.rank()];
                g.all_reduce_mean(&mut buf).await
            })
        });

        for h in handles.collect::<Vec<_>>() {
            let err = h.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_mismatch_fails_on_every_rank() {
        let handles = group(2).into_iter().map(|mut g| {
            tokio::spawn(async move {
                let mut buf = vec![1.0; 2 + g.rank()];
                g.broadcast(&mut buf).await
            })
        });

        for h in handles.collect::<Vec<_>>() {
            let err = h.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }
}
