mod activations;
pub mod layers;
pub mod loss;
mod model;

pub use activations::ActFn;
pub use model::{LanguageModel, ParamSpec};
