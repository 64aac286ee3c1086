use std::ops::Range;

use ndarray::{Array2, ArrayView2};

use super::{
    ActFn,
    layers::{ContextMix, Dense, Embeddings, Layer},
};
use crate::{MlErr, Result};

/// Where a named tensor lives inside the flat parameter buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

/// A small causal language model.
///
/// Tokens are embedded (token + position), mixed with their prefix mean, pushed through the
/// hidden dense layers and projected back onto the vocabulary. Parameters and gradients are
/// never owned by the model: they live in flat buffers handed in on every call, which is what
/// gets all-reduced, optimized and checkpointed.
#[derive(Clone, Debug)]
pub struct LanguageModel {
    embeddings: Embeddings,
    layers: Vec<Layer>,
    vocab_size: usize,
    context: usize,
}

impl LanguageModel {
    /// Creates a new `LanguageModel`.
    ///
    /// # Arguments
    /// * `vocab_size` - The amount of distinct token ids.
    /// * `context` - The longest sequence the model accepts.
    /// * `embed_dim` - The width of the embeddings.
    /// * `hidden_dims` - The width of every hidden dense layer.
    /// * `act_fn` - The activation of the hidden layers.
    ///
    /// # Returns
    /// The model, or an error if any dimension is zero.
    pub fn new(
        vocab_size: usize,
        context: usize,
        embed_dim: usize,
        hidden_dims: &[usize],
        act_fn: ActFn,
    ) -> Result<Self> {
        let dims = [
            ("vocab_size", vocab_size),
            ("context", context),
            ("embed_dim", embed_dim),
        ];

        if let Some((name, _)) = dims.iter().find(|(_, d)| *d == 0) {
            return Err(MlErr::InvalidHyperparameter(format!("{name} must be > 0")));
        }

        if hidden_dims.contains(&0) {
            return Err(MlErr::InvalidHyperparameter(
                "hidden layer widths must be > 0".into(),
            ));
        }

        let mix = ContextMix::new(embed_dim);
        let mut n_in = mix.out_dim();
        let mut layers = vec![Layer::ContextMix(mix)];

        for &n_out in hidden_dims {
            layers.push(Layer::Dense(Dense::new((n_in, n_out), Some(act_fn))));
            n_in = n_out;
        }

        layers.push(Layer::Dense(Dense::new((n_in, vocab_size), None)));

        Ok(Self {
            embeddings: Embeddings::new(vocab_size, context, embed_dim),
            layers,
            vocab_size,
            context,
        })
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.embeddings.size() + self.layers.iter().map(Layer::size).sum::<usize>()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn context_length(&self) -> usize {
        self.context
    }

    /// Names every tensor of the model and locates it inside the flat parameter buffer.
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        let dim = self.embeddings.size() / (self.vocab_size + self.context);
        let wte = self.embeddings.token_table_size();

        let mut specs = vec![
            ParamSpec {
                name: "wte.weight".into(),
                shape: vec![self.vocab_size, dim],
                range: 0..wte,
            },
            ParamSpec {
                name: "wpe.weight".into(),
                shape: vec![self.context, dim],
                range: wte..self.embeddings.size(),
            },
        ];

        for (i, (layer, range)) in self.layers.iter().zip(self.layer_ranges()).enumerate() {
            let Layer::Dense(dense) = layer else {
                continue;
            };

            let (n_in, n_out) = dense.dim();
            let split = range.start + n_in * n_out;

            specs.push(ParamSpec {
                name: format!("layers.{i}.weight"),
                shape: vec![n_in, n_out],
                range: range.start..split,
            });
            specs.push(ParamSpec {
                name: format!("layers.{i}.bias"),
                shape: vec![n_out],
                range: split..range.end,
            });
        }

        specs
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `tokens` - A `(batch, seq_len)` matrix of token ids.
    ///
    /// # Returns
    /// The `(batch * seq_len, vocab_size)` logits, rows ordered batch-major.
    pub fn forward(&mut self, params: &[f32], tokens: ArrayView2<u32>) -> Result<Array2<f32>> {
        self.check_len("params", params.len())?;

        let emb_size = self.embeddings.size();
        let ranges = Self::ranges(emb_size, &self.layer_sizes());
        let seq_len = tokens.ncols();
        let mut x = self.embeddings.forward(&params[..emb_size], tokens)?;

        for (layer, range) in self.layers.iter_mut().zip(ranges) {
            x = layer.forward(&params[range], x, seq_len)?;
        }

        Ok(x)
    }

    /// Backpropagates the loss derivative of the last forward pass, accumulating into `grad`.
    ///
    /// # Arguments
    /// * `params` - The model's parameters, the same ones given to `forward`.
    /// * `grad` - The gradient buffer, same length as `params`.
    /// * `d_logits` - The loss derivative with respect to the logits.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d_logits: Array2<f32>) -> Result<()> {
        self.check_len("params", params.len())?;
        self.check_len("grad", grad.len())?;

        let emb_size = self.embeddings.size();
        let ranges = Self::ranges(emb_size, &self.layer_sizes());
        let mut d = d_logits;

        for (layer, range) in self.layers.iter_mut().zip(ranges).rev() {
            d = layer.backward(&params[range.clone()], &mut grad[range], d)?;
        }

        self.embeddings.backward(&mut grad[..emb_size], d.view())
    }

    fn layer_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(Layer::size).collect()
    }

    fn layer_ranges(&self) -> Vec<Range<usize>> {
        Self::ranges(self.embeddings.size(), &self.layer_sizes())
    }

    fn ranges(start: usize, sizes: &[usize]) -> Vec<Range<usize>> {
        let mut offset = start;

        sizes
            .iter()
            .map(|size| {
                let range = offset..offset + size;
                offset += size;
                range
            })
            .collect()
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.size();

        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}
