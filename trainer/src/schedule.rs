use std::num::NonZeroUsize;

/// Defines when to report progress and when to validate and checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub log_every: NonZeroUsize,
    pub save_step: NonZeroUsize,
}

impl Cadence {
    pub fn new(log_every: NonZeroUsize, save_step: NonZeroUsize) -> Self {
        Self {
            log_every,
            save_step,
        }
    }

    /// Returns true if the batch at `step` (counted from 0 within the epoch) gets logged.
    #[inline]
    pub fn should_log(&self, step: usize) -> bool {
        step % self.log_every.get() == 0
    }

    /// Returns true if, after `step` batches of the epoch, it's time to validate and checkpoint.
    #[inline]
    pub fn should_save(&self, step: usize) -> bool {
        step % self.save_step.get() == 0
    }
}
