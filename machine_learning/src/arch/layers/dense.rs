use ndarray::{linalg, prelude::*};

use crate::{Result, arch::ActFn};

/// A fully connected layer: `a = act(x · W + b)`.
///
/// Parameters are laid out as the row-major `(n_in, n_out)` weights followed by the `n_out`
/// biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output widths.
    /// * `act_fn` - The activation applied to the output, if any.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            act_fn,
            size: (dim.0 + 1) * dim.1,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The input and output widths.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Makes a forward pass, caching what the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of the parameters.
    /// * `x` - The input, one row per token.
    ///
    /// # Returns
    /// The activations, one row per token.
    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        let (w, b) = self.view_params(params)?;

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let a = match self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.x = x;
        self.z = z;
        Ok(a)
    }

    /// Makes a backward pass, accumulating this layer's gradient.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of the parameters.
    /// * `grad` - This layer's slice of the gradient.
    /// * `d` - The loss derivative with respect to this layer's output.
    ///
    /// # Returns
    /// The loss derivative with respect to this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (w_raw, b_raw) = params.split_at(w_size);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn forward_is_affine_without_activation() {
        // w = [[1, 2], [3, 4]], b = [0.5, -0.5]
        let params = [1., 2., 3., 4., 0.5, -0.5];
        let mut dense = Dense::new((2, 2), None);

        let x = array![[1., 1.], [0., 2.]];
        let a = dense.forward(&params, x).unwrap();

        assert_eq!(a, array![[4.5, 5.5], [6.5, 7.5]]);
    }

    #[test]
    fn backward_accumulates_weight_and_bias_grads() {
        let params = [1., 2., 3., 4., 0., 0.];
        let mut grad = [0.; 6];
        let mut dense = Dense::new((2, 2), None);

        dense.forward(&params, array![[1., 2.]]).unwrap();
        let dx = dense
            .backward(&params, &mut grad, array![[1., -1.]])
            .unwrap();

        // dW = x^T d, db = d, dx = d W^T
        assert_eq!(grad, [1., -1., 2., -2., 1., -1.]);
        assert_eq!(dx, array![[-1., -1.]]);
    }
}
