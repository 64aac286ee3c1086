use ndarray::Array2;

use super::{ContextMix, Dense};
use crate::Result;

/// The layers stacked on top of the embeddings.
#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
    ContextMix(ContextMix),
}

impl Layer {
    pub fn size(&self) -> usize {
        match self {
            Layer::Dense(l) => l.size(),
            Layer::ContextMix(_) => 0,
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>, seq_len: usize) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.forward(params, x),
            Layer::ContextMix(l) => l.forward(x, seq_len),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.backward(params, grad, d),
            Layer::ContextMix(l) => l.backward(d),
        }
    }
}
