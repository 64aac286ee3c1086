use std::time::Duration;

use crate::validate::ValidationReport;

#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    pub compute_time: Duration,
    pub sync_time: Duration,

    pub steps: u64,
    pub samples: u64,
    pub checkpoints: u64,

    /// Mean local training loss of every epoch run.
    pub epoch_losses: Vec<f32>,
    pub validations: Vec<ValidationReport>,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn add_samples(&mut self, n: usize) {
        self.samples += n as u64;
    }

    #[inline]
    pub fn bump_checkpoints(&mut self) {
        self.checkpoints += 1;
    }
}
