use super::{Optimizer, OptimizerState, optimizer::check_lengths};
use crate::Result;

const KIND: &str = "gradient_descent";

/// Gradient descent optimization algorithm.
#[derive(Debug)]
pub struct GradientDescent {
    len: usize,
    learning_rate: f32,
    step: u64,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance updates.
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self {
            len,
            learning_rate,
            step: 0,
        }
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params, self.len)?;
        let lr = self.learning_rate;

        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        self.step += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState {
            kind: KIND.into(),
            step: self.step,
            learning_rate: self.learning_rate,
            buffers: Default::default(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        self.step = state.step;
        self.learning_rate = state.learning_rate;
        Ok(())
    }
}
