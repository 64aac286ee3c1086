use super::LrScheduler;

/// Keeps the learning rate fixed.
#[derive(Debug, Clone)]
pub struct Constant {
    lr: f32,
    steps: u64,
}

impl Constant {
    pub fn new(lr: f32) -> Self {
        Self { lr, steps: 0 }
    }
}

impl LrScheduler for Constant {
    fn lr(&self) -> f32 {
        self.lr
    }

    fn steps(&self) -> u64 {
        self.steps
    }

    fn set_steps(&mut self, steps: u64) {
        self.steps = steps;
    }
}
