//! Stochastic gradient descent with optional heavy-ball momentum.

use ndarray::{ArrayD, ArrayViewMutD, Zip};

use crate::error::{FedError, Result};

/// SGD optimizer.
///
/// With `momentum = μ > 0` the update is `v ← μ·v + g; w ← w − η·v`,
/// otherwise `w ← w − η·g`. Velocity buffers are created on the first
/// step and live only as long as the optimizer, i.e. one client's local
/// training.
#[derive(Clone, Debug)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<ArrayD<f32>>,
}

impl Sgd {
    /// Create an optimizer.
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: Vec::new(),
        }
    }

    /// Step size.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Apply one update. `grads` must follow the order and shapes of
    /// `params`.
    pub fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, grads: &[ArrayD<f32>]) -> Result<()> {
        if params.len() != grads.len() {
            return Err(FedError::Training(format!(
                "{} gradient arrays for {} parameter arrays",
                grads.len(),
                params.len()
            )));
        }
        if let Some((p, g)) = params.iter().zip(grads).find(|(p, g)| p.shape() != g.shape()) {
            return Err(FedError::Training(format!(
                "gradient shape {:?} does not match parameter shape {:?}",
                g.shape(),
                p.shape()
            )));
        }

        let lr = self.learning_rate;
        if self.momentum == 0.0 {
            for (mut p, g) in params.into_iter().zip(grads) {
                p.zip_mut_with(g, |w, &g| *w -= lr * g);
            }
            return Ok(());
        }

        if self.velocity.is_empty() {
            self.velocity = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
        }
        let mu = self.momentum;
        for ((p, g), v) in params.into_iter().zip(grads).zip(&mut self.velocity) {
            Zip::from(p).and(g).and(v).for_each(|w, &g, v| {
                *v = mu * *v + g;
                *w -= lr * *v;
            });
        }
        Ok(())
    }
}
