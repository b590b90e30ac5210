//! Trainable models.
//!
//! The simulator treats a model as a fixed set of `f32` parameter arrays
//! enumerated in a stable order, plus a forward pass producing class logits
//! and a backward pass producing gradients in that same order. The
//! [`codec`] turns those arrays into the flat parameter vector that clients
//! exchange with the server.
//!
//! | Kind | Parameters |
//! |------|------------|
//! | [`ModelKind::Logistic`] | `W: d×c`, `b: c` |
//! | [`ModelKind::Mlp`] | `W1: d×h`, `b1: h`, `W2: h×c`, `b2: c` |

pub mod codec;
pub mod logistic;
pub mod mlp;

pub use codec::{flatten, num_params, unflatten};
pub use logistic::Logistic;
pub use mlp::Mlp;

use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::config::ModelKind;
use crate::error::{FedError, Result};
use crate::seed::{rng_for, SeedStream};

/// A classifier with enumerable trainable parameters.
pub trait Model: Send + Sync {
    /// Width of one input row.
    fn input_dim(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Read views of every parameter array, in stable order.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>>;

    /// Mutable views of every parameter array, in the same order as
    /// [`Model::parameters`].
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Class logits for a batch of rows.
    fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>>;

    /// Mean cross-entropy over the batch and its gradient for each
    /// parameter array, in parameter order.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f32>,
        labels: &[usize],
    ) -> Result<(f32, Vec<ArrayD<f32>>)>;
}

impl ModelKind {
    /// Build a fresh, seeded instance.
    ///
    /// The same `(input_dim, num_classes, seed)` always yields identical
    /// initial weights.
    pub fn build(&self, input_dim: usize, num_classes: usize, seed: u64) -> Box<dyn Model> {
        let mut rng = rng_for(seed, SeedStream::ModelInit, 0, 0);
        match *self {
            ModelKind::Logistic => Box::new(Logistic::new(input_dim, num_classes, &mut rng)),
            ModelKind::Mlp { hidden } => {
                Box::new(Mlp::new(input_dim, hidden, num_classes, &mut rng))
            }
        }
    }
}

/// Glorot-uniform weight matrix.
pub(crate) fn glorot<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (rows + cols).max(1) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((rows, cols), |_| dist.sample(rng))
}

/// Zero bias vector.
pub(crate) fn zeros(len: usize) -> Array1<f32> {
    Array1::zeros(len)
}

/// Reject batches the model cannot consume.
///
/// Reshaping is the caller's job; a wrong width is an error, never
/// silently fixed here.
pub(crate) fn check_batch(model: &dyn Model, x: ArrayView2<'_, f32>, labels: Option<&[usize]>) -> Result<()> {
    if x.ncols() != model.input_dim() {
        return Err(FedError::Training(format!(
            "batch rows have {} features but the model expects {}",
            x.ncols(),
            model.input_dim()
        )));
    }
    if let Some(labels) = labels {
        if labels.len() != x.nrows() {
            return Err(FedError::Training(format!(
                "batch has {} rows but {} labels",
                x.nrows(),
                labels.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= model.num_classes()) {
            return Err(FedError::Training(format!(
                "label {} is outside the model's {} classes",
                bad,
                model.num_classes()
            )));
        }
    }
    Ok(())
}
