use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use comms::Communicator;
use log::info;
use machine_learning::{
    arch::ParamSpec,
    optimization::{Optimizer, OptimizerState},
    schedule::LrScheduler,
};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{Result, TrainErr, state::TrainState};

const MODEL_PREFIX: &str = "model.";
const OPTIMIZER_PREFIX: &str = "optimizer.";

const EPOCH_KEY: &str = "epoch";
const OPTIMIZER_KIND_KEY: &str = "optimizer.kind";
const OPTIMIZER_STEP_KEY: &str = "optimizer.step";
const OPTIMIZER_LR_KEY: &str = "optimizer.lr";
const SCHEDULER_STEP_KEY: &str = "scheduler.step";

/// Everything needed to resume a run after the end of `epoch`'s last saved step.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub epoch: usize,
    pub params: Vec<f32>,
    pub optimizer: OptimizerState,
    pub scheduler_steps: u64,
}

impl Checkpoint {
    /// Writes the checkpoint as a safetensors file.
    ///
    /// The model's tensors are stored as `model.<name>`, the optimizer's buffers as
    /// `optimizer.<name>` and the scalars in the file's metadata. The file is first written
    /// next to `path` and then renamed over it, so a crash never leaves a torn checkpoint.
    ///
    /// # Arguments
    /// * `specs` - The layout of `params`.
    /// * `path` - Where to write, missing parent directories are created.
    pub fn save(&self, specs: &[ParamSpec], path: &Path) -> Result<()> {
        let mut tensors = Vec::with_capacity(specs.len() + self.optimizer.buffers.len());

        for spec in specs {
            let data = self.params.get(spec.range.clone()).ok_or_else(|| {
                TrainErr::checkpoint(path, format!("no parameters for {}", spec.name))
            })?;

            let view = TensorView::new(Dtype::F32, spec.shape.clone(), bytemuck::cast_slice(data))?;
            tensors.push((format!("{MODEL_PREFIX}{}", spec.name), view));
        }

        for (name, buf) in &self.optimizer.buffers {
            let view = TensorView::new(Dtype::F32, vec![buf.len()], bytemuck::cast_slice(buf.as_slice()))?;
            tensors.push((format!("{OPTIMIZER_PREFIX}{name}"), view));
        }

        let metadata = HashMap::from([
            (EPOCH_KEY.to_string(), self.epoch.to_string()),
            (OPTIMIZER_KIND_KEY.to_string(), self.optimizer.kind.clone()),
            (OPTIMIZER_STEP_KEY.to_string(), self.optimizer.step.to_string()),
            (
                OPTIMIZER_LR_KEY.to_string(),
                self.optimizer.learning_rate.to_string(),
            ),
            (SCHEDULER_STEP_KEY.to_string(), self.scheduler_steps.to_string()),
        ]);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = tmp_path(path);
        safetensors::serialize_to_file(tensors, &Some(metadata), &tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads a checkpoint written by `save`.
    ///
    /// # Arguments
    /// * `path` - The checkpoint file.
    /// * `specs` - The layout of the model the checkpoint is loaded into.
    ///
    /// # Returns
    /// The checkpoint, or an error if the file is unreadable or doesn't match the model.
    pub fn load(path: &Path, specs: &[ParamSpec]) -> Result<Self> {
        let bytes = fs::read(path)?;
        let (_, header) = SafeTensors::read_metadata(&bytes)?;
        let metadata = header.metadata().clone().unwrap_or_default();
        let tensors = SafeTensors::deserialize(&bytes)?;

        let size = specs.iter().map(|spec| spec.range.end).max().unwrap_or_default();
        let mut params = vec![0.; size];

        for spec in specs {
            let name = format!("{MODEL_PREFIX}{}", spec.name);
            let view = tensors
                .tensor(&name)
                .map_err(|_| TrainErr::checkpoint(path, format!("missing tensor {name}")))?;

            params[spec.range.clone()].copy_from_slice(&read_f32(path, &name, &view, &spec.shape)?);
        }

        let mut buffers = BTreeMap::new();
        for name in tensors.names() {
            let Some(buf_name) = name.strip_prefix(OPTIMIZER_PREFIX) else {
                continue;
            };

            let view = tensors.tensor(name)?;
            let len = view.shape().iter().product();
            buffers.insert(buf_name.to_string(), read_f32(path, name, &view, &[len])?);
        }

        let optimizer = OptimizerState {
            kind: meta(path, &metadata, OPTIMIZER_KIND_KEY)?,
            step: meta(path, &metadata, OPTIMIZER_STEP_KEY)?,
            learning_rate: meta(path, &metadata, OPTIMIZER_LR_KEY)?,
            buffers,
        };

        Ok(Self {
            epoch: meta(path, &metadata, EPOCH_KEY)?,
            params,
            optimizer,
            scheduler_steps: meta(path, &metadata, SCHEDULER_STEP_KEY)?,
        })
    }
}

/// Saves a checkpoint of the run at the end of a step, only on the root rank.
///
/// # Arguments
/// * `comm` - The process group, every rank but the root returns right away.
/// * `state` - The model and its parameters.
/// * `optimizer` - The optimizer whose state gets saved.
/// * `scheduler` - The learning rate schedule whose position gets saved.
/// * `epoch` - The epoch being run.
/// * `path` - Where to write the checkpoint.
///
/// # Returns
/// Whether this rank wrote the checkpoint.
pub fn save_checkpoint<C: Communicator>(
    comm: &C,
    state: &TrainState,
    optimizer: &dyn Optimizer,
    scheduler: &dyn LrScheduler,
    epoch: usize,
    path: &Path,
) -> Result<bool> {
    if !comm.is_root() {
        return Ok(false);
    }

    let checkpoint = Checkpoint {
        epoch,
        params: state.params.clone(),
        optimizer: optimizer.state(),
        scheduler_steps: scheduler.steps(),
    };

    checkpoint.save(&state.model.param_specs(), path)?;
    info!("Checkpoint saved at {}", path.display());
    Ok(true)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn read_f32(path: &Path, name: &str, view: &TensorView<'_>, shape: &[usize]) -> Result<Vec<f32>> {
    if view.dtype() != Dtype::F32 {
        return Err(TrainErr::checkpoint(
            path,
            format!("{name} is {:?}, expected F32", view.dtype()),
        ));
    }

    if view.shape() != shape {
        return Err(TrainErr::checkpoint(
            path,
            format!("{name} has shape {:?}, expected {shape:?}", view.shape()),
        ));
    }

    Ok(bytemuck::pod_collect_to_vec(view.data()))
}

fn meta<T: FromStr>(path: &Path, metadata: &HashMap<String, String>, key: &str) -> Result<T> {
    let raw = metadata
        .get(key)
        .ok_or_else(|| TrainErr::checkpoint(path, format!("missing metadata {key}")))?;

    raw.parse()
        .map_err(|_| TrainErr::checkpoint(path, format!("bad metadata {key}={raw}")))
}
