use std::collections::BTreeMap;

use crate::{MlErr, Result};

/// Everything an optimizer needs to pick up where it left off.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptimizerState {
    pub kind: String,
    pub step: u64,
    pub learning_rate: f32,
    pub buffers: BTreeMap<String, Vec<f32>>,
}

impl OptimizerState {
    /// Checks this state was produced by an optimizer of kind `expected`.
    pub(super) fn expect_kind(&self, expected: &'static str) -> Result<()> {
        if self.kind != expected {
            return Err(MlErr::StateKindMismatch {
                got: self.kind.clone(),
                expected,
            });
        }

        Ok(())
    }

    /// Takes the buffer called `name`, which must hold exactly `len` values.
    pub(super) fn take_buffer(&mut self, name: &'static str, len: usize) -> Result<Box<[f32]>> {
        let buf = self
            .buffers
            .remove(name)
            .ok_or(MlErr::MissingStateBuffer(name))?;

        if buf.len() != len {
            return Err(MlErr::SizeMismatch {
                what: name,
                got: buf.len(),
                expected: len,
            });
        }

        Ok(buf.into_boxed_slice())
    }
}

/// A rule for turning a gradient into a parameter update.
pub trait Optimizer: Send {
    /// Updates the parameters according to the algorithm's learning rule.
    ///
    /// # Arguments
    /// * `grad` - The gradient used for taking the step.
    /// * `params` - The parameters that are going to be modified.
    ///
    /// # Returns
    /// An error if `grad` and `params` differ in length from each other or from the optimizer.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    /// Overrides the learning rate, used by the schedulers between steps.
    fn set_learning_rate(&mut self, lr: f32);

    /// Snapshots the optimizer's internal state.
    fn state(&self) -> OptimizerState;

    /// Restores a snapshot taken with `state`.
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }

    fn learning_rate(&self) -> f32 {
        (**self).learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f32) {
        (**self).set_learning_rate(lr)
    }

    fn state(&self) -> OptimizerState {
        (**self).state()
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        (**self).load_state(state)
    }
}

pub(super) fn check_lengths(grad: &[f32], params: &[f32], expected: usize) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    if params.len() != expected {
        return Err(MlErr::SizeMismatch {
            what: "params",
            got: params.len(),
            expected,
        });
    }

    Ok(())
}
