//! Seeded synthetic classification data.
//!
//! Each class gets a Gaussian centroid; items are that centroid plus
//! isotropic noise. Labels cycle through the classes before shuffling, so
//! every class has the same number of items (up to one) and label-sorted
//! shard splits see balanced classes.

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{FedError, Result};
use crate::seed::{rng_for, SeedStream};

/// Parameters of a synthetic train/test pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSpec {
    /// Number of classes
    pub num_classes: usize,
    /// Width of a feature row
    pub feature_dim: usize,
    /// Training items (split across clients)
    pub train_items: usize,
    /// Held-out test items
    pub test_items: usize,
    /// Standard deviation of the class centroids
    pub separation: f32,
    /// Standard deviation of the per-item noise
    pub noise: f32,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            num_classes: 10,
            feature_dim: 20,
            train_items: 6000,
            test_items: 1000,
            separation: 1.5,
            noise: 1.0,
        }
    }
}

impl SyntheticSpec {
    /// Check the generator parameters.
    pub fn validate(&self) -> Result<()> {
        if self.num_classes < 1 || self.feature_dim < 1 {
            return Err(FedError::InvalidConfig(
                "synthetic data needs at least one class and one feature".to_string(),
            ));
        }
        if self.train_items < 1 || self.test_items < 1 {
            return Err(FedError::InvalidConfig(
                "synthetic data needs at least one train and one test item".to_string(),
            ));
        }
        if !(self.separation.is_finite() && self.separation > 0.0)
            || !(self.noise.is_finite() && self.noise >= 0.0)
        {
            return Err(FedError::InvalidConfig(format!(
                "synthetic separation must be positive and noise non-negative, got {} and {}",
                self.separation, self.noise
            )));
        }
        Ok(())
    }

    /// Generate `(train, test)` from `seed`.
    pub fn generate(&self, seed: u64) -> Result<(Dataset, Dataset)> {
        self.validate()?;
        let invalid = |e: rand_distr::NormalError| FedError::InvalidConfig(e.to_string());
        let centroid_dist = Normal::new(0.0f32, self.separation).map_err(invalid)?;
        let noise_dist = Normal::new(0.0f32, self.noise).map_err(invalid)?;

        let mut rng = rng_for(seed, SeedStream::Data, 0, 0);
        let centroids = Array2::from_shape_fn((self.num_classes, self.feature_dim), |_| {
            centroid_dist.sample(&mut rng)
        });

        let split = |n: usize, part: usize| -> Result<Dataset> {
            let mut rng = rng_for(seed, SeedStream::Data, part, 0);
            let mut labels: Vec<usize> = (0..n).map(|i| i % self.num_classes).collect();
            labels.shuffle(&mut rng);
            let features = Array2::from_shape_fn((n, self.feature_dim), |(i, j)| {
                centroids[[labels[i], j]] + noise_dist.sample(&mut rng)
            });
            Dataset::new(features, labels, self.num_classes)
        };

        let train = split(self.train_items, 1)?;
        let test = split(self.test_items, 2)?;
        Ok((train, test))
    }
}
