use std::f32::consts::PI;

const GELU_COEF: f32 = 0.044_715;

/// Element-wise activation functions for dense layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActFn {
    /// Gaussian error linear unit, tanh approximation.
    Gelu,
    Relu,
    Sigmoid,
}

use ActFn::*;

impl ActFn {
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Gelu => {
                let k = (2. / PI).sqrt();
                0.5 * x * (1. + (k * (x + GELU_COEF * x.powi(3))).tanh())
            }
            Relu => x.max(0.),
            Sigmoid => 1. / (1. + (-x).exp()),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Gelu => {
                let k = (2. / PI).sqrt();
                let t = (k * (x + GELU_COEF * x.powi(3))).tanh();
                0.5 * (1. + t) + 0.5 * x * (1. - t * t) * k * (1. + 3. * GELU_COEF * x * x)
            }
            Relu => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
            Sigmoid => {
                let s = 1. / (1. + (-x).exp());
                s * (1. - s)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_df(act: ActFn, x: f32) -> f32 {
        let h = 1e-3;
        (act.f(x + h) - act.f(x - h)) / (2. * h)
    }

    #[test]
    fn derivatives_match_finite_differences() {
        for act in [Gelu, Relu, Sigmoid] {
            for x in [-2.5, -0.7, 0.3, 1.9] {
                let diff = (act.df(x) - numeric_df(act, x)).abs();
                assert!(diff < 1e-2, "{act:?} at {x}: {diff}");
            }
        }
    }

    #[test]
    fn gelu_is_close_to_identity_for_large_inputs() {
        assert!((Gelu.f(6.) - 6.).abs() < 1e-3);
        assert!(Gelu.f(-6.).abs() < 1e-3);
        assert_eq!(Gelu.f(0.), 0.);
    }
}
