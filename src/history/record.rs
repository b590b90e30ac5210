//! One row of the training history.

use serde::{Deserialize, Serialize};

use crate::config::{BatchSize, ConfigKey, ExperimentConfig};
use crate::convergence::RoundsToTarget;

/// A completed round, as written to the Round Record log.
///
/// Field order is the column order of the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Dataset label
    pub dataset: String,
    /// Model label
    pub model: String,
    /// Partition label (`iid` or `non_iid`)
    pub partition: String,
    /// Method label (`FedAvg` or `FedSGD`)
    pub method: String,
    /// 1-based round number
    pub round: usize,
    /// Global test accuracy after aggregation
    pub test_accuracy: f32,
    /// Learning rate fixed before round 1
    pub chosen_learning_rate: f32,
    /// Local epochs
    #[serde(rename = "E")]
    pub epochs: usize,
    /// Local batch size, `inf` when unbounded
    #[serde(rename = "B")]
    pub batch_size: BatchSize,
    /// Client fraction `C`
    pub client_fraction: f64,
    /// Clients trained this round
    pub clients_selected: usize,
    /// Communication-cost statistic `u`
    pub u: f64,
    /// Target accuracy
    pub target: f32,
    /// Rounds-to-target over the history up to and including this round
    pub rounds_to_target: RoundsToTarget,
    /// RFC 3339 wall-clock time the round finished
    pub timestamp: String,
    /// Global test loss after aggregation
    pub test_loss: f32,
}

impl RoundRecord {
    /// Record for `round` of `config`.
    pub fn new(
        config: &ExperimentConfig,
        round: usize,
        test_accuracy: f32,
        test_loss: f32,
        chosen_learning_rate: f32,
        clients_selected: usize,
        rounds_to_target: RoundsToTarget,
    ) -> Self {
        let key = config.key();
        Self {
            dataset: key.dataset,
            model: key.model,
            partition: key.partition,
            method: key.method,
            round,
            test_accuracy,
            chosen_learning_rate,
            epochs: config.local_epochs,
            batch_size: config.batch_size,
            client_fraction: config.client_fraction,
            clients_selected,
            u: config.comm_cost(),
            target: config.target_accuracy,
            rounds_to_target,
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_loss,
        }
    }

    /// Whether this row belongs to the configuration identified by `key`.
    pub fn matches(&self, key: &ConfigKey) -> bool {
        self.dataset == key.dataset
            && self.model == key.model
            && self.partition == key.partition
            && self.method == key.method
            && self.epochs == key.epochs
            && self.batch_size == key.batch_size
    }
}
