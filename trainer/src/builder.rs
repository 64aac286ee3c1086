use std::num::NonZeroUsize;

use log::{info, warn};
use machine_learning::{
    arch::LanguageModel,
    initialization::normal_init,
    optimization::{AdamW, GradientDescent, GradientDescentWithMomentum, Optimizer},
    schedule::{Constant, LrScheduler, StepDecay, WarmupCosine},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result, TrainErr,
    checkpoint::Checkpoint,
    config::{OptimizerConfig, SchedulerConfig, TrainerConfig},
    data::{DataLoader, ShardSpec, TokenDataset, read_tokens},
    schedule::Cadence,
    state::TrainState,
    trainer::{LoopConfig, Trainer},
};

pub struct OptimizerBuilder;

impl OptimizerBuilder {
    /// Builds the optimizer described by `config` for `len` parameters.
    pub fn build(config: &OptimizerConfig, len: usize) -> Box<dyn Optimizer> {
        match *config {
            OptimizerConfig::GradientDescent { lr } => Box::new(GradientDescent::new(len, lr)),
            OptimizerConfig::GradientDescentWithMomentum { lr, mu } => {
                Box::new(GradientDescentWithMomentum::new(len, lr, mu))
            }
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Box::new(AdamW::new(len, lr, beta1, beta2, eps, weight_decay)),
        }
    }
}

pub struct SchedulerBuilder;

impl SchedulerBuilder {
    /// Builds the learning rate schedule described by `config`.
    ///
    /// # Arguments
    /// * `config` - The schedule.
    /// * `base_lr` - The optimizer's configured learning rate.
    /// * `run_steps` - The amount of optimizer steps in the whole run.
    pub fn build(config: &SchedulerConfig, base_lr: f32, run_steps: u64) -> Box<dyn LrScheduler> {
        match *config {
            SchedulerConfig::Constant => Box::new(Constant::new(base_lr)),
            SchedulerConfig::StepDecay { step_size, gamma } => {
                Box::new(StepDecay::new(base_lr, step_size, gamma))
            }
            SchedulerConfig::WarmupCosine {
                warmup_steps,
                total_steps,
                min_lr,
            } => Box::new(WarmupCosine::new(
                base_lr,
                min_lr,
                warmup_steps,
                total_steps.unwrap_or(run_steps),
            )),
        }
    }
}

/// Turns a `TrainerConfig` into the loaders and the `Trainer` of one rank.
pub struct TrainerBuilder {
    config: TrainerConfig,
}

impl TrainerBuilder {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Reads the token files and builds the training loader for `shard` and the validation
    /// loader, which always covers the whole validation set.
    ///
    /// # Returns
    /// `(train, val)`, or an error if the data can't be read, holds tokens outside the vocabulary
    /// or is too short to fill every rank.
    pub fn build_loaders(&self, shard: ShardSpec) -> Result<(DataLoader, DataLoader)> {
        let TrainerConfig {
            model,
            data,
            training,
        } = &self.config;

        let seq_len = NonZeroUsize::new(model.context_length)
            .ok_or_else(|| TrainErr::Config("context_length must be > 0".into()))?;
        let stride = data.stride.unwrap_or(seq_len);

        let tokens = read_tokens(&data.train_path, data.format)?;
        check_vocab(&tokens, model.vocab_size)?;
        let train = TokenDataset::new(tokens, seq_len, stride);

        let (train, val) = match &data.val_path {
            Some(path) => {
                let tokens = read_tokens(path, data.format)?;
                check_vocab(&tokens, model.vocab_size)?;
                (train, TokenDataset::new(tokens, seq_len, seq_len))
            }
            None => train.split(data.val_fraction),
        };

        for (what, dataset) in [("training", &train), ("validation", &val)] {
            if dataset.is_empty() {
                return Err(TrainErr::EmptyDataset {
                    what,
                    tokens: dataset.num_tokens(),
                    needed: seq_len.get() + 1,
                });
            }
        }

        let world_size = shard.world_size.get();
        if train.len() < world_size {
            return Err(TrainErr::Config(format!(
                "{} training windows can't be split among {world_size} ranks",
                train.len()
            )));
        }

        let train = DataLoader::new(
            train,
            shard,
            training.batch_size,
            training.shuffle,
            training.seed,
        );
        let val = DataLoader::new(val, ShardSpec::whole(), training.batch_size, false, 0);

        info!(
            "rank {} trains on {} windows ({} batches per epoch), validates on {}",
            shard.rank,
            train.num_samples(),
            train.len(),
            val.num_samples()
        );

        Ok((train, val))
    }

    /// Builds the model, its parameters, optimizer and schedule, resuming from the configured
    /// checkpoint when asked to and one exists.
    ///
    /// # Arguments
    /// * `steps_per_epoch` - The amount of batches of the training loader.
    pub fn build(&self, steps_per_epoch: usize) -> Result<Trainer> {
        let TrainerConfig {
            model: model_cfg,
            training,
            ..
        } = &self.config;

        let model = LanguageModel::new(
            model_cfg.vocab_size,
            model_cfg.context_length,
            model_cfg.embed_dim,
            &model_cfg.hidden_dims,
            model_cfg.activation.into(),
        )?;

        let mut rng = StdRng::seed_from_u64(training.seed);
        let mut params = normal_init(&model.param_specs(), &mut rng, model_cfg.init_std)?;

        let run_steps = (training.num_epochs * steps_per_epoch) as u64;
        let mut optimizer = OptimizerBuilder::build(&training.optimizer, model.size());
        let mut scheduler =
            SchedulerBuilder::build(&training.scheduler, training.optimizer.lr(), run_steps);
        let mut start_epoch = training.start_epoch;

        let path = &training.checkpoint_path;
        if training.resume {
            if path.exists() {
                let checkpoint = Checkpoint::load(path, &model.param_specs())?;
                params = checkpoint.params;
                optimizer.load_state(checkpoint.optimizer)?;
                scheduler.set_steps(checkpoint.scheduler_steps);
                start_epoch = checkpoint.epoch + 1;
                info!(
                    "resuming from {} at epoch {start_epoch}, scheduler step {}",
                    path.display(),
                    scheduler.steps()
                );
            } else {
                warn!("no checkpoint at {}, starting from scratch", path.display());
            }
        }

        optimizer.set_learning_rate(scheduler.lr());

        let cfg = LoopConfig {
            start_epoch,
            num_epochs: training.num_epochs,
            cadence: Cadence::new(training.log_every, training.save_step),
            max_grad_norm: training.max_grad_norm,
            checkpoint_path: path.clone(),
        };

        info!(
            "model has {} parameters, epochs {start_epoch}..{}",
            model.size(),
            training.num_epochs
        );

        let state = TrainState::new(model, params)?;
        Ok(Trainer::new(cfg, state, optimizer, scheduler))
    }
}

fn check_vocab(tokens: &[u32], vocab_size: usize) -> Result<()> {
    match tokens.iter().find(|&&t| t as usize >= vocab_size) {
        Some(t) => Err(TrainErr::Config(format!(
            "token {t} is outside the vocabulary of size {vocab_size}"
        ))),
        None => Ok(()),
    }
}
