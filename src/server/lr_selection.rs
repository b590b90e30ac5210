//! One-time learning-rate search.
//!
//! Each candidate trains a copy of the initial global parameters for one
//! local epoch on a small fixed set of clients; the aggregate with the
//! best test accuracy wins. The result is held for the whole experiment.

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::aggregators::fedavg_with;
use crate::config::ExperimentConfig;
use crate::data::{sample_n, ClientPartition, Dataset};
use crate::error::{FedError, Result};
use crate::math::all_finite;
use crate::model::unflatten;
use crate::seed::{derive_seed, SeedStream};
use crate::training::{evaluate, ClientTrainer, LocalSchedule, LocalUpdate};

/// Round index used for the warm-up's training seeds; real rounds start at 1.
const WARMUP_ROUND: usize = 0;

/// Score of one learning-rate candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateScore {
    /// Candidate learning rate
    pub learning_rate: f32,
    /// Test accuracy after the warm-up round, `0` if training diverged
    pub accuracy: f32,
}

/// Pick the learning rate from `config.lr_grid`.
///
/// Ties go to the smaller rate. A candidate whose warm-up produces
/// non-finite parameters scores zero.
pub fn select_learning_rate(
    config: &ExperimentConfig,
    train: &Dataset,
    test: &Dataset,
    partitions: &[ClientPartition],
    init_params: &[f32],
) -> Result<f32> {
    let scores = score_candidates(config, train, test, partitions, init_params)?;
    let best = scores
        .iter()
        .copied()
        .reduce(|best, c| {
            if c.accuracy > best.accuracy
                || (c.accuracy == best.accuracy && c.learning_rate < best.learning_rate)
            {
                c
            } else {
                best
            }
        })
        .ok_or_else(|| FedError::InvalidConfig("learning-rate grid must not be empty".to_string()))?;

    info!(
        "selected learning rate {} (warm-up accuracy {:.4})",
        best.learning_rate, best.accuracy
    );
    Ok(best.learning_rate)
}

/// Warm-up accuracy of every candidate, in grid order.
pub fn score_candidates(
    config: &ExperimentConfig,
    train: &Dataset,
    test: &Dataset,
    partitions: &[ClientPartition],
    init_params: &[f32],
) -> Result<Vec<CandidateScore>> {
    let clients = sample_n(
        partitions.len(),
        config.lr_selection_clients(),
        derive_seed(config.seed, SeedStream::LrSelection, 0, 0),
    );
    let trainer = ClientTrainer::new(config.model, train);
    let mut model = config.model.build(train.feature_dim(), train.num_classes(), 0);

    let mut scores = Vec::with_capacity(config.lr_grid.len());
    for &learning_rate in &config.lr_grid {
        let schedule = LocalSchedule {
            epochs: 1,
            batch_size: config.batch_size,
            learning_rate,
            momentum: config.momentum,
        };
        let updates = clients
            .par_iter()
            .map(|&c| {
                trainer.train(c, &partitions[c], init_params, &schedule, config.seed, WARMUP_ROUND)
            })
            .collect::<Result<Vec<LocalUpdate>>>()?;

        if let Some(bad) = updates.iter().find(|u| !all_finite(&u.params)) {
            warn!(
                "learning rate {} diverged on client {} during warm-up, scoring 0",
                learning_rate, bad.client
            );
            scores.push(CandidateScore {
                learning_rate,
                accuracy: 0.0,
            });
            continue;
        }

        let params: Vec<&[f32]> = updates.iter().map(|u| u.params.as_slice()).collect();
        let weights: Vec<f64> = updates.iter().map(|u| u.sample_count as f64).collect();
        let averaged = fedavg_with(config.aggregation, &params, &weights)?;
        unflatten(model.as_mut(), &averaged)?;
        let eval = evaluate(model.as_ref(), test)?;
        let accuracy = if eval.accuracy.is_finite() { eval.accuracy } else { 0.0 };

        debug!("learning rate {}: warm-up accuracy {:.4}", learning_rate, accuracy);
        scores.push(CandidateScore {
            learning_rate,
            accuracy,
        });
    }
    Ok(scores)
}
