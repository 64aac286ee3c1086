use super::{Optimizer, OptimizerState, optimizer::check_lengths};
use crate::Result;

const KIND: &str = "gradient_descent_with_momentum";
const VELOCITY: &str = "velocity";

/// Gradient descent with a momentum term.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
    step: u64,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - How much of the previous velocity is kept on each step.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
            step: 0,
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params, self.velocity.len())?;

        let Self {
            learning_rate: lr,
            momentum: mu,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = mu * *v + g;
                *p -= lr * *v;
            });

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
            buffers: [(VELOCITY.to_string(), self.velocity.to_vec())].into(),
        }
    }

    fn load_state(&mut self, mut state: OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        self.velocity = state.take_buffer(VELOCITY, self.velocity.len())?;
        self.step = state.step;
        self.learning_rate = state.learning_rate;
        Ok(())
    }
}
