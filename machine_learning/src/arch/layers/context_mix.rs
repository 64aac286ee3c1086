use ndarray::{prelude::*, s};

use crate::{MlErr, Result};

/// Causal context mixing: every position sees itself next to the running mean of its prefix.
///
/// For an input row `x_t` of width `dim` the output row is `[x_t, mean(x_0..=x_t)]`, so the
/// layer doubles the width and never looks at later positions. It has no parameters.
#[derive(Clone, Debug)]
pub struct ContextMix {
    dim: usize,
    seq_len: usize,
}

impl ContextMix {
    pub fn new(dim: usize) -> Self {
        Self { dim, seq_len: 0 }
    }

    pub fn out_dim(&self) -> usize {
        2 * self.dim
    }

    /// # Arguments
    /// * `x` - A `(batch * seq_len, dim)` matrix, rows ordered batch-major.
    /// * `seq_len` - The length of every sequence in the batch.
    pub fn forward(&mut self, x: Array2<f32>, seq_len: usize) -> Result<Array2<f32>> {
        self.check(x.dim(), self.dim, seq_len)?;

        let mut out = Array2::zeros((x.nrows(), self.out_dim()));
        out.slice_mut(s![.., ..self.dim]).assign(&x);

        for (seq, mut mixed) in x
            .axis_chunks_iter(Axis(0), seq_len)
            .zip(out.axis_chunks_iter_mut(Axis(0), seq_len))
        {
            let mut running = Array1::<f32>::zeros(self.dim);

            for (t, row) in seq.rows().into_iter().enumerate() {
                running += &row;
                let mean = &running / (t + 1) as f32;
                mixed.slice_mut(s![t, self.dim..]).assign(&mean);
            }
        }

        self.seq_len = seq_len;
        Ok(out)
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        let seq_len = self.seq_len;
        self.check(d.dim(), self.out_dim(), seq_len)?;

        let mut dx = d.slice(s![.., ..self.dim]).to_owned();

        for (seq, mut dseq) in d
            .axis_chunks_iter(Axis(0), seq_len)
            .zip(dx.axis_chunks_iter_mut(Axis(0), seq_len))
        {
            // dx_s += sum over t >= s of dmean_t / (t + 1)
            let mut suffix = Array1::<f32>::zeros(self.dim);

            for t in (0..seq_len).rev() {
                suffix.scaled_add(1. / (t + 1) as f32, &seq.slice(s![t, self.dim..]));
                let mut row = dseq.row_mut(t);
                row += &suffix;
            }
        }

        Ok(dx)
    }

    fn check(&self, (rows, cols): (usize, usize), width: usize, seq_len: usize) -> Result<()> {
        if cols != width {
            return Err(MlErr::SizeMismatch {
                what: "context mix width",
                got: cols,
                expected: width,
            });
        }

        if seq_len == 0 || rows % seq_len != 0 {
            return Err(MlErr::SizeMismatch {
                what: "context mix rows",
                got: rows,
                expected: seq_len,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn forward_appends_prefix_mean_per_sequence() {
        let mut mix = ContextMix::new(1);
        // two sequences of length 2
        let out = mix.forward(array![[1.], [3.], [10.], [20.]], 2).unwrap();
        assert_eq!(out, array![[1., 1.], [3., 2.], [10., 10.], [20., 15.]]);
    }

    #[test]
    fn backward_spreads_mean_derivative_over_prefix() {
        let mut mix = ContextMix::new(1);
        mix.forward(array![[1.], [3.], [5.]], 3).unwrap();

        let dx = mix
            .backward(array![[0., 1.], [0., 2.], [1., 3.]])
            .unwrap();

        // x_0: 1/1 + 2/2 + 3/3, x_1: 2/2 + 3/3, x_2: 1 + 3/3
        assert_eq!(dx, array![[3.], [2.], [2.]]);
    }

    #[test]
    fn rejects_ragged_batches() {
        let mut mix = ContextMix::new(1);
        assert!(mix.forward(array![[1.], [2.], [3.]], 2).is_err());
    }
}
