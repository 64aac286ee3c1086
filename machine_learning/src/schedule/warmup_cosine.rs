use std::f32::consts::PI;

use super::LrScheduler;

/// Linear warm-up followed by a cosine decay down to a floor.
///
/// * `steps < warmup_steps`: `base_lr * (steps + 1) / warmup_steps`.
/// * `warmup_steps <= steps < total_steps`: half a cosine from `base_lr` to `min_lr`.
/// * `steps >= total_steps`: `min_lr`.
#[derive(Debug, Clone)]
pub struct WarmupCosine {
    base_lr: f32,
    min_lr: f32,
    warmup_steps: u64,
    total_steps: u64,
    steps: u64,
}

impl WarmupCosine {
    pub fn new(base_lr: f32, min_lr: f32, warmup_steps: u64, total_steps: u64) -> Self {
        Self {
            base_lr,
            min_lr,
            warmup_steps,
            total_steps,
            steps: 0,
        }
    }
}

impl LrScheduler for WarmupCosine {
    fn lr(&self) -> f32 {
        let Self {
            base_lr,
            min_lr,
            warmup_steps,
            total_steps,
            steps,
        } = *self;

        if steps < warmup_steps {
            return base_lr * (steps + 1) as f32 / warmup_steps as f32;
        }

        if steps >= total_steps {
            return min_lr;
        }

        let progress = (steps - warmup_steps) as f32 / (total_steps - warmup_steps) as f32;
        min_lr + 0.5 * (base_lr - min_lr) * (1. + (PI * progress).cos())
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
    fn warms_up_then_decays_to_floor() {
        let mut sched = WarmupCosine::new(1.0, 0.1, 4, 14);

        let warmup: Vec<f32> = (0..4)
            .map(|_| {
                let lr = sched.lr();
                sched.step();
                lr
            })
            .collect();
        assert_eq!(warmup, [0.25, 0.5, 0.75, 1.0]);

        // right after warm-up the cosine starts at its peak
        assert!((sched.lr() - 1.0).abs() < 1e-6);

        sched.set_steps(9);
        assert!((sched.lr() - 0.55).abs() < 1e-6);

        sched.set_steps(14);
        assert_eq!(sched.lr(), 0.1);
        sched.set_steps(1_000);
        assert_eq!(sched.lr(), 0.1);
    }

    #[test]
    fn lr_never_increases_after_warmup() {
        let mut sched = WarmupCosine::new(3e-4, 0.0, 10, 100);
        sched.set_steps(10);

        let mut last = sched.lr();
        for _ in 10..120 {
            sched.step();
            let lr = sched.lr();
            assert!(lr <= last);
            last = lr;
        }
    }
}
