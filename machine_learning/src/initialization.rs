use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{MlErr, Result, arch::ParamSpec};

/// Samples a fresh parameter buffer: normally distributed weights and zeroed biases.
///
/// # Arguments
/// * `specs` - The model's tensors, as returned by `LanguageModel::param_specs`.
/// * `rng` - A random number generator.
/// * `std_dev` - The standard deviation of the weights.
///
/// # Returns
/// The parameters, or an error if `std_dev` is not finite or negative.
pub fn normal_init<R: Rng>(specs: &[ParamSpec], rng: &mut R, std_dev: f32) -> Result<Vec<f32>> {
    if !(std_dev >= 0.) {
        return Err(MlErr::InvalidHyperparameter(format!(
            "init_std must be >= 0, got {std_dev}"
        )));
    }

    let normal = Normal::new(0., std_dev)
        .map_err(|e| MlErr::InvalidHyperparameter(format!("init_std {std_dev}: {e}")))?;

    let size = specs.iter().map(|spec| spec.range.end).max().unwrap_or_default();
    let mut params = vec![0.; size];

    for spec in specs.iter().filter(|spec| !spec.name.ends_with(".bias")) {
        params[spec.range.clone()]
            .iter_mut()
            .for_each(|p| *p = normal.sample(rng));
    }

    Ok(params)
}
