use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Token and position embeddings summed together.
///
/// Parameters are the `(vocab_size, dim)` token table followed by the `(context, dim)`
/// position table.
#[derive(Clone, Debug)]
pub struct Embeddings {
    vocab_size: usize,
    context: usize,
    dim: usize,

    // Forward metadata
    tokens: Array2<u32>,
}

impl Embeddings {
    pub fn new(vocab_size: usize, context: usize, dim: usize) -> Self {
        Self {
            vocab_size,
            context,
            dim,
            tokens: Array2::zeros((0, 0)),
        }
    }

    pub fn size(&self) -> usize {
        (self.vocab_size + self.context) * self.dim
    }

    /// The size of the token table, the position table comes right after it.
    pub fn token_table_size(&self) -> usize {
        self.vocab_size * self.dim
    }

    /// Looks up the embeddings of every token.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of the parameters.
    /// * `tokens` - A `(batch, seq_len)` matrix of token ids.
    ///
    /// # Returns
    /// A `(batch * seq_len, dim)` matrix, rows ordered batch-major.
    pub fn forward(&mut self, params: &[f32], tokens: ArrayView2<u32>) -> Result<Array2<f32>> {
        let (batch, seq_len) = tokens.dim();

        if batch == 0 || seq_len == 0 {
            return Err(MlErr::EmptyBatch);
        }

        if seq_len > self.context {
            return Err(MlErr::SequenceTooLong {
                got: seq_len,
                max: self.context,
            });
        }

        if let Some(&token) = tokens.iter().find(|&&t| t as usize >= self.vocab_size) {
            return Err(MlErr::TokenOutOfRange {
                token,
                vocab_size: self.vocab_size,
            });
        }

        let (wte, wpe) = self.view_tables(params)?;
        let mut x = Array2::zeros((batch * seq_len, self.dim));

        for ((b, t), &token) in tokens.indexed_iter() {
            let mut row = x.row_mut(b * seq_len + t);
            row.assign(&wte.row(token as usize));
            row += &wpe.row(t);
        }

        self.tokens = tokens.to_owned();
        Ok(x)
    }

    /// Scatters the incoming derivative into the rows of both tables that were looked up.
    pub fn backward(&mut self, grad: &mut [f32], d: ArrayView2<f32>) -> Result<()> {
        let seq_len = self.tokens.ncols();
        let (wte_raw, wpe_raw) = grad.split_at_mut(self.token_table_size());
        let mut dwte = ArrayViewMut2::from_shape((self.vocab_size, self.dim), wte_raw)?;
        let mut dwpe = ArrayViewMut2::from_shape((self.context, self.dim), wpe_raw)?;

        for ((b, t), &token) in self.tokens.indexed_iter() {
            let row = d.row(b * seq_len + t);
            let mut tok = dwte.row_mut(token as usize);
            tok += &row;
            let mut pos = dwpe.row_mut(t);
            pos += &row;
        }

        Ok(())
    }

    fn view_tables<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView2<'a, f32>)> {
        let (wte_raw, wpe_raw) = params.split_at(self.token_table_size());
        let wte = ArrayView2::from_shape((self.vocab_size, self.dim), wte_raw)?;
        let wpe = ArrayView2::from_shape((self.context, self.dim), wpe_raw)?;
        Ok((wte, wpe))
    }
}
