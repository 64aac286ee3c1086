use std::{env, fs, num::NonZeroUsize, path::PathBuf};

use comms::LocalGroup;
use trainer::{
    Checkpoint, TrainErr, TrainerBuilder, TrainerConfig,
    config::{
        Activation, DataConfig, DataFormat, ModelConfig, OptimizerConfig, SchedulerConfig,
        TrainingConfig,
    },
    data::ShardSpec,
};

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("trainer-it-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A periodic text, easy enough to learn in a handful of steps.
fn write_corpus(dir: &PathBuf, len: usize) -> PathBuf {
    let path = dir.join("corpus.txt");
    let text: String = "the cat sat. ".chars().cycle().take(len).collect();
    fs::write(&path, text).unwrap();
    path
}

fn config(dir: &PathBuf, num_epochs: usize, save_step: usize) -> TrainerConfig {
    TrainerConfig {
        model: ModelConfig {
            vocab_size: 256,
            context_length: 8,
            embed_dim: 8,
            hidden_dims: vec![16],
            activation: Activation::Gelu,
            init_std: 0.05,
        },
        data: DataConfig {
            train_path: write_corpus(dir, 800),
            val_path: None,
            format: DataFormat::Text,
            val_fraction: 0.1,
            stride: None,
        },
        training: TrainingConfig {
            num_epochs,
            start_epoch: 0,
            batch_size: nz(4),
            save_step: nz(save_step),
            log_every: nz(10),
            seed: 11,
            shuffle: true,
            max_grad_norm: Some(1.0),
            optimizer: OptimizerConfig::AdamW {
                lr: 0.03,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                weight_decay: 0.0,
            },
            scheduler: SchedulerConfig::Constant,
            checkpoint_path: dir.join("checkpoint").join("model.pth"),
            resume: false,
        },
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ranks_stay_in_sync_and_loss_goes_down() {
    let dir = scratch_dir("sync");
    let config = config(&dir, 4, 1000);

    let handles: Vec<_> = LocalGroup::new(nz(2))
        .into_iter()
        .map(|mut group| {
            let config = config.clone();
            tokio::spawn(async move { trainer::run(config, &mut group).await })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(reports[0].params, reports[1].params);
    assert_eq!(reports[0].metrics.steps, reports[1].metrics.steps);

    let losses = &reports[0].metrics.epoch_losses;
    assert_eq!(losses.len(), 4);
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(losses[3] < losses[0], "losses didn't go down: {losses:?}");

    // save_step is never reached
    assert!(reports[0].metrics.validations.is_empty());
    assert_eq!(reports[0].metrics.checkpoints, 0);
    assert!(!config.training.checkpoint_path.exists());

    fs::remove_dir_all(dir).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_the_root_validates_and_checkpoints() {
    const EPOCHS: usize = 2;
    const SAVE_STEP: usize = 2;

    let dir = scratch_dir("root-only");
    let config = config(&dir, EPOCHS, SAVE_STEP);
    let path = config.training.checkpoint_path.clone();

    let handles: Vec<_> = LocalGroup::new(nz(2))
        .into_iter()
        .map(|mut group| {
            let config = config.clone();
            tokio::spawn(async move { trainer::run(config, &mut group).await })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap().unwrap());
    }

    let (root, other) = (&reports[0].metrics, &reports[1].metrics);
    assert_eq!(root.steps, other.steps);
    assert_eq!(reports[0].params, reports[1].params);

    let per_epoch = root.steps / EPOCHS as u64;
    assert!(per_epoch >= SAVE_STEP as u64, "too few batches per epoch: {per_epoch}");
    let saves_per_epoch = per_epoch / SAVE_STEP as u64;

    assert_eq!(root.validations.len() as u64, EPOCHS as u64 * saves_per_epoch);
    assert_eq!(root.checkpoints, EPOCHS as u64 * saves_per_epoch);
    assert!(other.validations.is_empty());
    assert_eq!(other.checkpoints, 0);

    let builder = TrainerBuilder::new(config.clone());
    let (train_loader, _) = builder.build_loaders(ShardSpec::new(0, nz(2))).unwrap();
    let trainer = builder.build(train_loader.len()).unwrap();
    let checkpoint = Checkpoint::load(&path, &trainer.state().model.param_specs()).unwrap();

    let last_save = (EPOCHS as u64 - 1) * per_epoch + saves_per_epoch * SAVE_STEP as u64;
    assert_eq!(checkpoint.epoch, EPOCHS - 1);
    assert_eq!(checkpoint.scheduler_steps, last_save);
    assert_eq!(checkpoint.optimizer.step, last_save);

    fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn checkpoints_are_written_and_resumed() {
    let dir = scratch_dir("resume");
    let config = config(&dir, 1, 1);
    let path = config.training.checkpoint_path.clone();

    let mut group = LocalGroup::solo();
    let report = trainer::run(config.clone(), &mut group).await.unwrap();

    // every step validates and saves on the only rank
    assert!(report.metrics.steps > 0);
    assert_eq!(report.metrics.checkpoints, report.metrics.steps);
    assert_eq!(report.metrics.validations.len() as u64, report.metrics.steps);
    assert!(path.exists());

    let builder = TrainerBuilder::new(config.clone());
    let (train_loader, _) = builder.build_loaders(ShardSpec::whole()).unwrap();
    let trainer = builder.build(train_loader.len()).unwrap();
    let specs = trainer.state().model.param_specs();

    let checkpoint = Checkpoint::load(&path, &specs).unwrap();
    assert_eq!(checkpoint.epoch, 0);
    assert_eq!(checkpoint.params, report.params);
    assert_eq!(checkpoint.optimizer.kind, "adam_w");
    assert_eq!(checkpoint.optimizer.step, report.metrics.steps);
    assert_eq!(checkpoint.scheduler_steps, report.metrics.steps);

    let mut resumed = config.clone();
    resumed.training.resume = true;
    resumed.training.num_epochs = 2;

    let builder = TrainerBuilder::new(resumed);
    let trainer = builder.build(train_loader.len()).unwrap();
    assert_eq!(trainer.start_epoch(), 1);
    assert_eq!(trainer.state().params, report.params);
    assert_eq!(trainer.learning_rate(), 0.03);

    fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn finished_run_is_a_noop_when_resumed() {
    let dir = scratch_dir("noop");
    let config = config(&dir, 1, 1);

    let mut group = LocalGroup::solo();
    let first = trainer::run(config.clone(), &mut group).await.unwrap();

    let mut resumed = config.clone();
    resumed.training.resume = true;
    let second = trainer::run(resumed, &mut group).await.unwrap();

    assert_eq!(second.metrics.steps, 0);
    assert_eq!(second.params, first.params);

    fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn missing_data_is_reported() {
    let dir = scratch_dir("missing");
    let mut config = config(&dir, 1, 1);
    config.data.train_path = dir.join("nope.txt");

    let mut group = LocalGroup::solo();
    let err = trainer::run(config, &mut group).await.unwrap_err();
    assert!(matches!(err, TrainErr::Io(_)));

    fs::remove_dir_all(dir).unwrap();
}
