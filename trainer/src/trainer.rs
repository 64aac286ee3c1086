use std::{num::NonZeroUsize, path::PathBuf, time::Instant};

use comms::Communicator;
use log::{debug, info, warn};
use machine_learning::{
    optimization::{Optimizer, clip_grad_norm},
    schedule::LrScheduler,
};
use tokio::task;

use crate::{
    Result, TrainErr,
    builder::TrainerBuilder,
    checkpoint::save_checkpoint,
    config::TrainerConfig,
    data::{DataLoader, ShardSpec},
    metrics::TrainMetrics,
    schedule::Cadence,
    state::TrainState,
    validate::validate,
};

/// Immutable execution bounds for a training run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub start_epoch: usize,
    pub num_epochs: usize,
    pub cadence: Cadence,
    pub max_grad_norm: Option<f32>,
    pub checkpoint_path: PathBuf,
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub params: Vec<f32>,
    pub metrics: TrainMetrics,
}

/// Orchestrates the training of one rank.
///
/// Design:
/// - Keeps the model, parameters and gradients in a persistent `TrainState`.
/// - Computes the gradient of each local batch, averages it across the group and lets every
///   rank apply the same update, so parameters never diverge between ranks.
/// - Only the root logs progress, validates and writes checkpoints.
///
/// Concurrency note:
/// - Compute is CPU-bound and runs on Tokio's blocking pool via `spawn_blocking`.
/// - The state is moved into the blocking task and back (O(1) moves) to satisfy `'static`.
pub struct Trainer {
    cfg: LoopConfig,
    state: TrainState,
    optimizer: Box<dyn Optimizer>,
    scheduler: Box<dyn LrScheduler>,
    metrics: TrainMetrics,
}

impl Trainer {
    pub fn new(
        cfg: LoopConfig,
        state: TrainState,
        optimizer: Box<dyn Optimizer>,
        scheduler: Box<dyn LrScheduler>,
    ) -> Self {
        Self {
            cfg,
            state,
            optimizer,
            scheduler,
            metrics: TrainMetrics::default(),
        }
    }

    pub fn state(&self) -> &TrainState {
        &self.state
    }

    pub fn start_epoch(&self) -> usize {
        self.cfg.start_epoch
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    /// Runs epochs `start_epoch..num_epochs` over `train_loader`.
    ///
    /// Every rank of `comm` must call this with loaders of the same length.
    ///
    /// # Arguments
    /// * `comm` - The process group gradients are averaged over.
    /// * `train_loader` - This rank's shard of the training data.
    /// * `val_loader` - The validation data, only read by the root.
    ///
    /// # Returns
    /// The final parameters and the run's metrics.
    pub async fn train<C: Communicator>(
        self,
        comm: &mut C,
        train_loader: &mut DataLoader,
        val_loader: &DataLoader,
    ) -> Result<TrainReport> {
        let Self {
            cfg,
            mut state,
            mut optimizer,
            mut scheduler,
            mut metrics,
        } = self;

        let is_root = comm.is_root();
        comm.broadcast(&mut state.params).await?;

        let num_batches = train_loader.len();
        let start = Instant::now();

        for epoch in cfg.start_epoch..cfg.num_epochs {
            train_loader.set_epoch(epoch);
            let mut step = 0;
            let mut epoch_loss = 0.;

            for batch in train_loader.iter() {
                let samples = batch.len();
                state.zero_grads();

                let compute_start = Instant::now();
                let (state_back, loss) = task::spawn_blocking(move || {
                    let loss = state.compute(&batch);
                    (state, loss)
                })
                .await?;

                state = state_back;
                let loss = loss?;
                metrics.compute_time += compute_start.elapsed();

                if !loss.is_finite() {
                    warn!("non-finite loss at epoch {epoch}, step {step}: {loss}");
                }

                let sync_start = Instant::now();
                comm.all_reduce_mean(&mut state.grads).await?;
                metrics.sync_time += sync_start.elapsed();

                if let Some(max_norm) = cfg.max_grad_norm {
                    let norm = clip_grad_norm(&mut state.grads, max_norm);
                    debug!(norm = norm; "clipped gradient");
                }

                optimizer.update_params(&state.grads, &mut state.params)?;

                if is_root && cfg.cadence.should_log(step) {
                    info!(
                        "Epoch {epoch}, Step {step}/{num_batches}: Loss = {loss:.4}, Time elapsed = {:.2} sec",
                        start.elapsed().as_secs_f64()
                    );
                }

                step += 1;
                epoch_loss += loss;
                metrics.bump_step();
                metrics.add_samples(samples);

                if is_root && cfg.cadence.should_save(step) {
                    let loader = val_loader.clone();
                    let (state_back, report) = task::spawn_blocking(move || {
                        let report = validate(&mut state, &loader);
                        (state, report)
                    })
                    .await?;

                    state = state_back;
                    metrics.validations.push(report?);
                }

                scheduler.step();
                optimizer.set_learning_rate(scheduler.lr());

                if cfg.cadence.should_save(step)
                    && save_checkpoint(
                        &*comm,
                        &state,
                        &*optimizer,
                        &*scheduler,
                        epoch,
                        &cfg.checkpoint_path,
                    )?
                {
                    metrics.bump_checkpoints();
                }
            }

            if step > 0 {
                metrics.epoch_losses.push(epoch_loss / step as f32);
            }
        }

        debug!(
            steps = metrics.steps,
            samples = metrics.samples;
            "training finished in {:.2} sec",
            start.elapsed().as_secs_f64()
        );

        Ok(TrainReport {
            params: state.params,
            metrics,
        })
    }
}

/// Builds everything one rank needs from `config` and trains it.
///
/// # Arguments
/// * `config` - The run's description, the same on every rank.
/// * `comm` - This rank's handle on the process group.
///
/// # Returns
/// The rank's final parameters and metrics.
pub async fn run<C: Communicator>(config: TrainerConfig, comm: &mut C) -> Result<TrainReport> {
    let world_size = NonZeroUsize::new(comm.world_size())
        .ok_or_else(|| TrainErr::Config("the process group is empty".into()))?;
    let shard = ShardSpec::new(comm.rank(), world_size);

    let builder = TrainerBuilder::new(config);
    let (mut train_loader, val_loader) = builder.build_loaders(shard)?;
    let trainer = builder.build(train_loader.len())?;

    trainer.train(comm, &mut train_loader, &val_loader).await
}
