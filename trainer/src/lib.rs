pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod schedule;
pub mod state;
pub mod trainer;
pub mod validate;

pub use builder::TrainerBuilder;
pub use checkpoint::{Checkpoint, save_checkpoint};
pub use config::TrainerConfig;
pub use error::{Result, TrainErr};
pub use trainer::{TrainReport, Trainer, run};
pub use validate::{ValidationReport, validate};
