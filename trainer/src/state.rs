use machine_learning::{
    MlErr,
    arch::{
        LanguageModel,
        loss::{CrossEntropy, LossFn},
    },
};

use crate::{Result, data::Batch};

/// Persistent buffers reused across steps to avoid per-iteration allocations.
#[derive(Debug)]
pub struct TrainState {
    pub model: LanguageModel,

    /// Parameters (flat), laid out as described by `model.param_specs()`.
    pub params: Vec<f32>,

    /// Gradient buffer (flat).
    pub grads: Vec<f32>,

    loss_fn: CrossEntropy,
}

impl TrainState {
    /// Creates a new `TrainState`.
    ///
    /// # Arguments
    /// * `model` - The model being trained.
    /// * `params` - Its initial parameters.
    ///
    /// # Returns
    /// The state, or an error if `params` doesn't fit the model.
    pub fn new(model: LanguageModel, params: Vec<f32>) -> Result<Self> {
        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                what: "params",
                got: params.len(),
                expected: model.size(),
            }
            .into());
        }

        Ok(Self {
            grads: vec![0.0; params.len()],
            model,
            params,
            loss_fn: CrossEntropy::new(),
        })
    }

    #[inline]
    pub fn zero_grads(&mut self) {
        self.grads.fill(0.0);
    }

    /// Runs the forward and backward passes over `batch`, accumulating into `grads`.
    ///
    /// # Returns
    /// The batch's mean cross-entropy loss.
    pub fn compute(&mut self, batch: &Batch) -> Result<f32> {
        let logits = self.model.forward(&self.params, batch.inputs.view())?;
        let targets = batch.flat_targets();
        let (loss, d_logits) = self.loss_fn.loss_and_grad(logits.view(), &targets)?;
        self.model.backward(&self.params, &mut self.grads, d_logits)?;
        Ok(loss)
    }

    /// Forward pass only, returns the batch's mean cross-entropy loss.
    pub fn evaluate(&mut self, batch: &Batch) -> Result<f32> {
        let logits = self.model.forward(&self.params, batch.inputs.view())?;
        Ok(self.loss_fn.loss(logits.view(), &batch.flat_targets())?)
    }
}
