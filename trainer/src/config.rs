use std::{
    fs,
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
};

use machine_learning::arch::ActFn;
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

pub const DEFAULT_CHECKPOINT_PATH: &str = "checkpoint/GPT2_TinyStory.pth";
const DEFAULT_LOG_EVERY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

/// The whole description of a training run, read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    pub model: ModelConfig,
    pub data: DataConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub context_length: usize,
    pub embed_dim: usize,
    #[serde(default)]
    pub hidden_dims: Vec<usize>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_init_std")]
    pub init_std: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Gelu,
    Relu,
    Sigmoid,
}

impl From<Activation> for ActFn {
    fn from(value: Activation) -> Self {
        match value {
            Activation::Gelu => ActFn::Gelu,
            Activation::Relu => ActFn::Relu,
            Activation::Sigmoid => ActFn::Sigmoid,
        }
    }
}

/// How a token file is laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// Raw bytes, every byte is a token.
    #[default]
    Text,
    /// Little endian `u16` token ids.
    U16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub train_path: PathBuf,
    #[serde(default)]
    pub val_path: Option<PathBuf>,
    #[serde(default)]
    pub format: DataFormat,
    /// Tail of the training tokens held out for validation when there's no `val_path`.
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f32,
    /// Distance between consecutive windows, defaults to the context length.
    #[serde(default)]
    pub stride: Option<NonZeroUsize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub num_epochs: usize,
    #[serde(default)]
    pub start_epoch: usize,
    pub batch_size: NonZeroUsize,
    pub save_step: NonZeroUsize,
    #[serde(default = "default_log_every")]
    pub log_every: NonZeroUsize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub max_grad_norm: Option<f32>,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent {
        lr: f32,
    },
    GradientDescentWithMomentum {
        lr: f32,
        #[serde(default = "default_momentum")]
        mu: f32,
    },
    AdamW {
        lr: f32,
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_eps")]
        eps: f32,
        #[serde(default = "default_weight_decay")]
        weight_decay: f32,
    },
}

impl OptimizerConfig {
    /// The learning rate the schedule starts from.
    pub fn lr(&self) -> f32 {
        match *self {
            OptimizerConfig::GradientDescent { lr }
            | OptimizerConfig::GradientDescentWithMomentum { lr, .. }
            | OptimizerConfig::AdamW { lr, .. } => lr,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    #[default]
    Constant,
    StepDecay {
        step_size: NonZeroU64,
        gamma: f32,
    },
    WarmupCosine {
        warmup_steps: u64,
        /// Defaults to every step of the run.
        #[serde(default)]
        total_steps: Option<u64>,
        #[serde(default)]
        min_lr: f32,
    },
}

fn default_init_std() -> f32 {
    0.02
}

fn default_val_fraction() -> f32 {
    0.1
}

fn default_log_every() -> NonZeroUsize {
    DEFAULT_LOG_EVERY
}

fn default_shuffle() -> bool {
    true
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_PATH)
}

fn default_momentum() -> f32 {
    0.9
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_eps() -> f32 {
    1e-8
}

fn default_weight_decay() -> f32 {
    0.01
}

impl TrainerConfig {
    /// Reads and validates a config file.
    ///
    /// # Arguments
    /// * `path` - A JSON file holding a `TrainerConfig`.
    ///
    /// # Returns
    /// The config, or an error if the file can't be read, parsed or is inconsistent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants serde can't express on its own.
    pub fn validate(&self) -> Result<()> {
        let ModelConfig {
            vocab_size,
            context_length,
            embed_dim,
            ref hidden_dims,
            init_std,
            ..
        } = self.model;

        if vocab_size == 0 || context_length == 0 || embed_dim == 0 || hidden_dims.contains(&0) {
            return Err(config_err("model dimensions must be > 0"));
        }

        if self.data.format == DataFormat::Text && vocab_size < 256 {
            return Err(config_err(format!(
                "text data needs a vocab_size of at least 256, got {vocab_size}"
            )));
        }

        if !init_std.is_finite() || init_std < 0. {
            return Err(config_err(format!("init_std must be >= 0, got {init_std}")));
        }

        let val_fraction = self.data.val_fraction;
        if self.data.val_path.is_none() && !(val_fraction > 0. && val_fraction < 1.) {
            return Err(config_err(format!(
                "val_fraction must be in (0, 1) without a val_path, got {val_fraction}"
            )));
        }

        let training = &self.training;
        if training.start_epoch > training.num_epochs {
            return Err(config_err(format!(
                "start_epoch ({}) is past num_epochs ({})",
                training.start_epoch, training.num_epochs
            )));
        }

        if let Some(max) = training.max_grad_norm
            && !(max.is_finite() && max > 0.)
        {
            return Err(config_err(format!("max_grad_norm must be > 0, got {max}")));
        }

        let lr = training.optimizer.lr();
        if !lr.is_finite() || lr <= 0. {
            return Err(config_err(format!("lr must be > 0, got {lr}")));
        }

        Ok(())
    }
}

fn config_err(reason: impl Into<String>) -> TrainErr {
    TrainErr::Config(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "model": { "vocab_size": 256, "context_length": 8, "embed_dim": 4 },
        "data": { "train_path": "data/tiny.txt" },
        "training": {
            "num_epochs": 2,
            "batch_size": 4,
            "save_step": 100,
            "optimizer": { "kind": "adam_w", "lr": 0.001 }
        }
    }"#;

    #[test]
    fn defaults_are_filled_in() {
        let config: TrainerConfig = serde_json::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.training.log_every.get(), 10);
        assert_eq!(config.training.start_epoch, 0);
        assert!(config.training.shuffle);
        assert!(!config.training.resume);
        assert_eq!(
            config.training.checkpoint_path,
            PathBuf::from("checkpoint/GPT2_TinyStory.pth")
        );
        assert!(matches!(config.training.scheduler, SchedulerConfig::Constant));
        assert_eq!(config.model.activation, Activation::Gelu);
        assert_eq!(config.data.format, DataFormat::Text);

        match config.training.optimizer {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                weight_decay,
                ..
            } => {
                assert_eq!(lr, 0.001);
                assert_eq!(beta1, 0.9);
                assert_eq!(weight_decay, 0.01);
            }
            other => panic!("unexpected optimizer: {other:?}"),
        }
    }

    #[test]
    fn zero_save_step_is_rejected() {
        let raw = MINIMAL.replace("\"save_step\": 100", "\"save_step\": 0");
        assert!(serde_json::from_str::<TrainerConfig>(&raw).is_err());
    }

    #[test]
    fn start_epoch_past_the_end_is_rejected() {
        let mut config: TrainerConfig = serde_json::from_str(MINIMAL).unwrap();
        config.training.start_epoch = 3;
        assert!(matches!(config.validate(), Err(TrainErr::Config(_))));
    }

    #[test]
    fn text_data_needs_byte_vocab() {
        let mut config: TrainerConfig = serde_json::from_str(MINIMAL).unwrap();
        config.model.vocab_size = 100;
        assert!(matches!(config.validate(), Err(TrainErr::Config(_))));

        config.data.format = DataFormat::U16;
        config.validate().unwrap();
    }

    #[test]
    fn scheduler_is_tagged_by_kind() {
        let raw = MINIMAL.replace(
            "\"save_step\": 100,",
            r#""save_step": 100, "scheduler": { "kind": "warmup_cosine", "warmup_steps": 5 },"#,
        );
        let config: TrainerConfig = serde_json::from_str(&raw).unwrap();

        match config.training.scheduler {
            SchedulerConfig::WarmupCosine {
                warmup_steps,
                total_steps,
                min_lr,
            } => {
                assert_eq!(warmup_steps, 5);
                assert_eq!(total_steps, None);
                assert_eq!(min_lr, 0.);
            }
            other => panic!("unexpected scheduler: {other:?}"),
        }
    }
}
