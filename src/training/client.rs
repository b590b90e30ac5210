//! Local training on one client.

use log::debug;

use crate::config::{BatchSize, ModelKind};
use crate::data::Dataset;
use crate::error::{FedError, Result};
use crate::math::l2_distance;
use crate::model::{flatten, unflatten};
use crate::seed::{rng_for, SeedStream};
use crate::training::Sgd;

/// Hyper-parameters of one client's local training.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalSchedule {
    /// Local epochs `E`
    pub epochs: usize,
    /// Local batch size `B`
    pub batch_size: BatchSize,
    /// SGD step size
    pub learning_rate: f32,
    /// SGD momentum, `0.0` for plain SGD
    pub momentum: f32,
}

/// Result of one client's local training.
#[derive(Clone, Debug)]
pub struct LocalUpdate {
    /// Client identity
    pub client: usize,
    /// Parameters after training
    pub params: Vec<f32>,
    /// Local items, the client's aggregation weight
    pub sample_count: usize,
    /// Mean training loss over the last local epoch
    pub loss: f32,
}

/// Trains fresh local model copies on slices of a shared dataset.
///
/// Holds no mutable state, so one trainer can serve every client of a
/// round concurrently.
#[derive(Clone, Copy, Debug)]
pub struct ClientTrainer<'a> {
    model: ModelKind,
    dataset: &'a Dataset,
}

impl<'a> ClientTrainer<'a> {
    /// Trainer for `model` over `dataset`.
    pub fn new(model: ModelKind, dataset: &'a Dataset) -> Self {
        Self { model, dataset }
    }

    /// Run `schedule` on the items at `indices`, starting from
    /// `init_params`.
    ///
    /// Batches are shuffled with an RNG derived from
    /// `(seed, round, client)`, so the result does not depend on which
    /// thread runs the client or when.
    pub fn train(
        &self,
        client: usize,
        indices: &[usize],
        init_params: &[f32],
        schedule: &LocalSchedule,
        seed: u64,
        round: usize,
    ) -> Result<LocalUpdate> {
        if indices.is_empty() {
            return Err(FedError::Training(format!(
                "client {} has no local data",
                client
            )));
        }
        if schedule.epochs == 0 {
            return Err(FedError::Training("local epochs must be >= 1".to_string()));
        }

        let data = self.dataset.subset(indices)?;
        let mut model = self
            .model
            .build(self.dataset.feature_dim(), self.dataset.num_classes(), 0);
        unflatten(model.as_mut(), init_params)?;

        let mut optimizer = Sgd::new(schedule.learning_rate, schedule.momentum);
        let mut rng = rng_for(seed, SeedStream::ClientTraining, round, client);
        let shuffle = matches!(schedule.batch_size, BatchSize::Bounded(_));

        let mut loss = 0.0f32;
        for _ in 0..schedule.epochs {
            let mut epoch_loss = 0.0f32;
            let mut n_batches = 0usize;
            let batches = if shuffle {
                data.batches(schedule.batch_size, Some(&mut rng))
            } else {
                data.batches(schedule.batch_size, None::<&mut rand::rngs::StdRng>)
            };
            for batch in batches {
                let (batch_loss, grads) = model.loss_and_gradients(batch.x.view(), &batch.labels)?;
                optimizer.step(model.parameters_mut(), &grads)?;
                epoch_loss += batch_loss;
                n_batches += 1;
            }
            loss = epoch_loss / n_batches.max(1) as f32;
        }

        let params = flatten(model.as_ref());
        debug!(
            "client {} round {}: {} samples, loss {:.4}, update norm {:.4}",
            client,
            round,
            data.len(),
            loss,
            l2_distance(&params, init_params)
        );

        Ok(LocalUpdate {
            client,
            params,
            sample_count: data.len(),
            loss,
        })
    }
}
