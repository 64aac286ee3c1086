use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};

use super::LossFn;
use crate::{MlErr, Result};

/// Mean cross-entropy between softmax(logits) and the target token of every row.
#[derive(Default, Clone, Copy, Debug)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    fn check(logits: &ArrayView2<f32>, targets: &[u32]) -> Result<()> {
        let (rows, vocab_size) = logits.dim();

        if rows == 0 {
            return Err(MlErr::EmptyBatch);
        }

        if rows != targets.len() {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: targets.len(),
                expected: rows,
            });
        }

        if let Some(&token) = targets.iter().find(|&&t| t as usize >= vocab_size) {
            return Err(MlErr::TokenOutOfRange { token, vocab_size });
        }

        Ok(())
    }
}

/// `log(sum(exp(row)))`, shifted by the row's max so that it never overflows.
fn log_sum_exp(row: ArrayView1<f32>) -> f32 {
    let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    max + row.fold(0., |acc, &x| acc + (x - max).exp()).ln()
}

impl LossFn for CrossEntropy {
    fn loss(&self, logits: ArrayView2<f32>, targets: &[u32]) -> Result<f32> {
        Self::check(&logits, targets)?;

        let mut losses = Array1::<f32>::zeros(targets.len());
        Zip::from(&mut losses)
            .and(logits.rows())
            .and(ArrayView1::from(targets))
            .par_for_each(|loss, row, &t| *loss = log_sum_exp(row) - row[t as usize]);

        Ok(losses.sum() / targets.len() as f32)
    }

    fn loss_and_grad(&self, logits: ArrayView2<f32>, targets: &[u32]) -> Result<(f32, Array2<f32>)> {
        Self::check(&logits, targets)?;

        let scale = 1. / targets.len() as f32;
        let mut grad = logits.to_owned();
        let mut losses = Array1::<f32>::zeros(targets.len());

        // d/dlogits = (softmax - onehot) / rows
        Zip::from(grad.rows_mut())
            .and(&mut losses)
            .and(ArrayView1::from(targets))
            .par_for_each(|mut row, loss, &t| {
                let t = t as usize;
                let lse = log_sum_exp(row.view());
                *loss = lse - row[t];
                row.mapv_inplace(|x| (x - lse).exp() * scale);
                row[t] -= scale;
            });

        Ok((losses.sum() * scale, grad))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn uniform_logits_give_log_vocab() {
        let logits = Array2::<f32>::zeros((3, 4));
        let loss = CrossEntropy::new().loss(logits.view(), &[0, 1, 3]).unwrap();
        assert!((loss - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn large_logits_do_not_overflow() {
        let logits = array![[1000., 0.], [0., 1000.]];
        let loss = CrossEntropy::new().loss(logits.view(), &[0, 1]).unwrap();
        assert!(loss.is_finite());
        assert!(loss < 1e-6);
    }

    #[test]
    fn grad_rows_sum_to_zero_and_loss_matches() {
        let logits = array![[0.5, -1.0, 2.0], [0.0, 0.3, -0.2]];
        let targets = [2, 0];
        let ce = CrossEntropy::new();

        let (loss, grad) = ce.loss_and_grad(logits.view(), &targets).unwrap();
        assert!((loss - ce.loss(logits.view(), &targets).unwrap()).abs() < 1e-6);

        for row in grad.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
        assert!(grad[[0, 2]] < 0.);
        assert!(grad[[1, 0]] < 0.);
    }

    #[test]
    fn mismatched_or_invalid_targets_are_rejected() {
        let logits = Array2::<f32>::zeros((2, 3));
        let ce = CrossEntropy::new();

        assert!(matches!(
            ce.loss(logits.view(), &[0]),
            Err(MlErr::SizeMismatch { what: "targets", .. })
        ));
        assert!(matches!(
            ce.loss(logits.view(), &[0, 3]),
            Err(MlErr::TokenOutOfRange { token: 3, .. })
        ));
        assert!(matches!(
            ce.loss(Array2::<f32>::zeros((0, 3)).view(), &[]),
            Err(MlErr::EmptyBatch)
        ));
    }
}
