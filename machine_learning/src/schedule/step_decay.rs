use std::num::NonZeroU64;

use super::LrScheduler;

/// Multiplies the learning rate by `gamma` every `step_size` steps.
#[derive(Debug, Clone)]
pub struct StepDecay {
    base_lr: f32,
    step_size: NonZeroU64,
    gamma: f32,
    steps: u64,
}

impl StepDecay {
    pub fn new(base_lr: f32, step_size: NonZeroU64, gamma: f32) -> Self {
        Self {
            base_lr,
            step_size,
            gamma,
            steps: 0,
        }
    }
}

impl LrScheduler for StepDecay {
    fn lr(&self) -> f32 {
        let decays = self.steps / self.step_size.get();
        self.base_lr * self.gamma.powi(decays.min(i32::MAX as u64) as i32)
    }

    fn steps(&self) -> u64 {
        self.steps
    }

    fn set_steps(&mut self, steps: u64) {
        self.steps = steps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_on_every_boundary() {
        let mut sched = StepDecay::new(1.0, NonZeroU64::new(2).unwrap(), 0.5);
        let mut lrs = Vec::new();

        for _ in 0..5 {
            lrs.push(sched.lr());
            sched.step();
        }

        assert_eq!(lrs, [1.0, 1.0, 0.5, 0.5, 0.25]);
    }
}
