use super::{Optimizer, OptimizerState, optimizer::check_lengths};
use crate::Result;

const KIND: &str = "adam_w";
const EXP_AVG: &str = "exp_avg";
const EXP_AVG_SQ: &str = "exp_avg_sq";

/// Adam with decoupled weight decay.
#[derive(Debug)]
pub struct AdamW {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    step: u64,
    v: Box<[f32]>,
    s: Box<[f32]>,
}

impl AdamW {
    /// Creates a new `AdamW` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    /// * `weight_decay` - The fraction of every parameter removed on each step, scaled by the
    ///   learning rate.
    ///
    /// # Returns
    /// A new `AdamW` instance.
    pub fn new(
        len: usize,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            step: 0,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for AdamW {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params, self.v.len())?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
            ..
        } = *self;

        self.step += 1;
        let t = self.step.min(i32::MAX as u64) as i32;

        let bc1 = 1. - b1.powi(t);
        let bc2 = 1. - b2.powi(t);
        let step_size = lr * (bc2.sqrt() / bc1);
        let decay = 1. - lr * wd;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *p *= decay;
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

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
            buffers: [
                (EXP_AVG.to_string(), self.v.to_vec()),
                (EXP_AVG_SQ.to_string(), self.s.to_vec()),
            ]
            .into(),
        }
    }

    fn load_state(&mut self, mut state: OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        let v = state.take_buffer(EXP_AVG, self.v.len())?;
        let s = state.take_buffer(EXP_AVG_SQ, self.s.len())?;

        self.v = v;
        self.s = s;
        self.step = state.step;
        self.learning_rate = state.learning_rate;
        Ok(())
    }
}
