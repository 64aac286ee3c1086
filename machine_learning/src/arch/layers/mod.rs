mod context_mix;
mod dense;
mod embeddings;
mod layer;

pub use context_mix::ContextMix;
pub use dense::Dense;
pub use embeddings::Embeddings;
pub use layer::Layer;
