//! Held-out evaluation of a model.

use ndarray::Axis;

use crate::data::Dataset;
use crate::error::{FedError, Result};
use crate::math::{argmax_rows, softmax_cross_entropy};
use crate::model::Model;

/// Rows evaluated per forward pass.
const EVAL_CHUNK: usize = 1024;

/// Accuracy and mean loss on a dataset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    /// Fraction of correctly classified items, in `[0, 1]`
    pub accuracy: f32,
    /// Mean cross-entropy
    pub loss: f32,
}

/// Evaluate `model` on every item of `dataset`.
pub fn evaluate<M: Model + ?Sized>(model: &M, dataset: &Dataset) -> Result<Evaluation> {
    if dataset.is_empty() {
        return Err(FedError::InvalidConfig(
            "cannot evaluate on an empty test set".to_string(),
        ));
    }
    if model.num_classes() != dataset.num_classes() {
        return Err(FedError::Training(format!(
            "model predicts {} classes but the test set has {}",
            model.num_classes(),
            dataset.num_classes()
        )));
    }

    let x = dataset.features();
    let labels = dataset.labels();
    let mut correct = 0usize;
    let mut loss_sum = 0.0f64;

    for (chunk_idx, chunk) in x.axis_chunks_iter(Axis(0), EVAL_CHUNK).enumerate() {
        let start = chunk_idx * EVAL_CHUNK;
        let chunk_labels = &labels[start..start + chunk.nrows()];
        let logits = model.forward(chunk)?;
        correct += argmax_rows(logits.view())
            .iter()
            .zip(chunk_labels)
            .filter(|(p, y)| p == y)
            .count();
        let (loss, _) = softmax_cross_entropy(logits.view(), chunk_labels);
        loss_sum += loss as f64 * chunk.nrows() as f64;
    }

    let n = dataset.len();
    Ok(Evaluation {
        accuracy: correct as f32 / n as f32,
        loss: (loss_sum / n as f64) as f32,
    })
}
