use log::info;

use crate::{Result, TrainErr, data::DataLoader, state::TrainState};

/// The outcome of a pass over the validation data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationReport {
    /// Mean cross-entropy per token.
    pub loss: f32,
    pub perplexity: f32,
    pub batches: usize,
}

/// Evaluates the model over every batch of `loader` without touching the gradients.
///
/// # Arguments
/// * `state` - The model and the parameters to evaluate.
/// * `loader` - The validation data.
///
/// # Returns
/// The token-weighted mean loss and its perplexity, or an error if `loader` has no batches.
pub fn validate(state: &mut TrainState, loader: &DataLoader) -> Result<ValidationReport> {
    let mut total = 0f64;
    let mut tokens = 0;
    let mut batches = 0;

    for batch in loader.iter() {
        let loss = state.evaluate(&batch)?;
        total += loss as f64 * batch.num_tokens() as f64;
        tokens += batch.num_tokens();
        batches += 1;
    }

    if batches == 0 {
        let dataset = loader.dataset();
        return Err(TrainErr::EmptyDataset {
            what: "validation",
            tokens: dataset.num_tokens(),
            needed: dataset.seq_len() + 1,
        });
    }

    let loss = (total / tokens as f64) as f32;
    let report = ValidationReport {
        loss,
        perplexity: loss.exp(),
        batches,
    };

    info!(
        "Validation Loss = {:.4}, Perplexity = {:.2}",
        report.loss, report.perplexity
    );

    Ok(report)
}
