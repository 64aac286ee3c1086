mod adam_w;
mod clip;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;

pub use adam_w::AdamW;
pub use clip::clip_grad_norm;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::{Optimizer, OptimizerState};
