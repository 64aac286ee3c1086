//! Learning rate schedulers, stepped once per optimizer step.

mod constant;
mod scheduler;
mod step_decay;
mod warmup_cosine;

pub use constant::Constant;
pub use scheduler::LrScheduler;
pub use step_decay::StepDecay;
pub use warmup_cosine::WarmupCosine;
