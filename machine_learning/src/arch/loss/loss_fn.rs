use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A loss over per-token logits and the expected token ids.
pub trait LossFn {
    fn loss(&self, logits: ArrayView2<f32>, targets: &[u32]) -> Result<f32>;

    /// Computes the loss together with its derivative with respect to `logits`.
    fn loss_and_grad(&self, logits: ArrayView2<f32>, targets: &[u32]) -> Result<(f32, Array2<f32>)>;
}
