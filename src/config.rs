//! Experiment configuration.
//!
//! An [`ExperimentConfig`] is immutable for the duration of one experiment.
//! It deserializes from JSON with paper defaults for every omitted field
//! and is checked by [`ExperimentConfig::validate`] before any training
//! starts.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::aggregators::AggregationStrategy;
use crate::data::SyntheticSpec;
use crate::error::{FedError, Result};

/// Literal used for an unbounded batch size in configs and logs.
pub const UNBOUNDED_LITERAL: &str = "inf";

/// Local mini-batch size.
///
/// `Unbounded` treats a client's whole partition as one batch; together
/// with one local epoch this is FedSGD.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchSize {
    /// Batches of at most `n` items
    Bounded(NonZeroUsize),
    /// The full local partition as a single batch
    Unbounded,
}

impl BatchSize {
    /// Bounded batch size, `None` when `n == 0`.
    pub fn bounded(n: usize) -> Option<Self> {
        NonZeroUsize::new(n).map(BatchSize::Bounded)
    }

    /// Number of items per batch for a partition of `len` items.
    pub fn effective(&self, len: usize) -> usize {
        match self {
            BatchSize::Bounded(n) => n.get().min(len),
            BatchSize::Unbounded => len,
        }
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchSize::Bounded(n) => write!(f, "{}", n),
            BatchSize::Unbounded => f.write_str(UNBOUNDED_LITERAL),
        }
    }
}

impl FromStr for BatchSize {
    type Err = FedError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(UNBOUNDED_LITERAL)
            || s.eq_ignore_ascii_case("infinity")
            || s.eq_ignore_ascii_case("unbounded")
            || s == "∞"
        {
            return Ok(BatchSize::Unbounded);
        }
        s.parse::<usize>()
            .ok()
            .and_then(BatchSize::bounded)
            .ok_or_else(|| {
                FedError::InvalidConfig(format!(
                    "batch size must be a positive integer or '{}', got '{}'",
                    UNBOUNDED_LITERAL, s
                ))
            })
    }
}

impl Serialize for BatchSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            BatchSize::Bounded(n) => serializer.serialize_u64(n.get() as u64),
            BatchSize::Unbounded => serializer.serialize_str(UNBOUNDED_LITERAL),
        }
    }
}

struct BatchSizeVisitor;

impl<'de> Visitor<'de> for BatchSizeVisitor {
    type Value = BatchSize;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a positive integer or \"{}\"", UNBOUNDED_LITERAL)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<BatchSize, E> {
        BatchSize::bounded(v as usize).ok_or_else(|| E::custom("batch size must be positive"))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<BatchSize, E> {
        if v <= 0 {
            return Err(E::custom("batch size must be positive"));
        }
        self.visit_u64(v as u64)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<BatchSize, E> {
        // "inf" parses as a float in self-describing formats such as CSV
        if v.is_infinite() && v > 0.0 {
            Ok(BatchSize::Unbounded)
        } else if v.fract() == 0.0 && v >= 1.0 {
            self.visit_u64(v as u64)
        } else {
            Err(E::custom(format!("invalid batch size {}", v)))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<BatchSize, E> {
        v.parse().map_err(|e: FedError| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for BatchSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(BatchSizeVisitor)
    }
}

/// Policy for splitting a non-divisible item count into shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardRemainder {
    /// The final shard absorbs the leftover items
    #[default]
    LastShard,
    /// Non-divisible counts are a configuration error
    Strict,
}

/// How the training set is distributed across clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionKind {
    /// Uniformly random equal-size groups
    Iid,
    /// Label-sorted shards, `shards_per_client` per client
    Shards {
        /// Shards handed to each client (paper default 2)
        shards_per_client: usize,
        /// Remainder policy
        #[serde(default)]
        remainder: ShardRemainder,
    },
}

impl PartitionKind {
    /// Paper-default label-skewed split: two shards per client.
    pub fn non_iid() -> Self {
        PartitionKind::Shards {
            shards_per_client: 2,
            remainder: ShardRemainder::LastShard,
        }
    }

    /// Short label used in logs and checkpoint names.
    pub fn label(&self) -> &'static str {
        match self {
            PartitionKind::Iid => "iid",
            PartitionKind::Shards { .. } => "non_iid",
        }
    }
}

/// Architecture of the shared model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    /// Multinomial logistic regression
    Logistic,
    /// One hidden ReLU layer ("2NN" uses two; this keeps one of `hidden` units)
    Mlp {
        /// Hidden units
        hidden: usize,
    },
}

impl ModelKind {
    /// Short label used in logs and checkpoint names.
    pub fn label(&self) -> String {
        match self {
            ModelKind::Logistic => "logistic".to_string(),
            ModelKind::Mlp { hidden } => format!("mlp{}", hidden),
        }
    }
}

/// Label distinguishing FedAvg runs from the FedSGD baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Federated Averaging
    #[default]
    FedAvg,
    /// Federated SGD: one full-batch step per client per round
    #[serde(rename = "FedSGD")]
    FedSgd,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::FedAvg => f.write_str("FedAvg"),
            Method::FedSgd => f.write_str("FedSGD"),
        }
    }
}

/// Behaviour when a resume is requested but no checkpoint exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Fail with [`FedError::UnsafeResume`]
    Refuse,
    /// Start again at round 1, warning that the log may get duplicate rows
    #[default]
    RestartFromScratch,
}

/// Identity of a configuration for checkpoints and log matching.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Dataset label
    pub dataset: String,
    /// Model label
    pub model: String,
    /// Partition label
    pub partition: String,
    /// Method label
    pub method: String,
    /// Local epochs
    pub epochs: usize,
    /// Local batch size
    pub batch_size: BatchSize,
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_E{}_B{}",
            self.dataset, self.model, self.partition, self.method, self.epochs, self.batch_size
        )
    }
}

fn default_dataset() -> String {
    "synthetic".to_string()
}

fn default_num_clients() -> usize {
    100
}

fn default_client_fraction() -> f64 {
    0.1
}

fn default_local_epochs() -> usize {
    5
}

fn default_batch_size() -> BatchSize {
    BatchSize::Bounded(NonZeroUsize::MIN.saturating_add(9))
}

fn default_lr_grid() -> Vec<f32> {
    vec![0.01, 0.02, 0.05, 0.1, 0.2]
}

fn default_target() -> f32 {
    0.97
}

fn default_total_rounds() -> usize {
    100
}

fn default_seed() -> u64 {
    42
}

fn default_model() -> ModelKind {
    ModelKind::Mlp { hidden: 200 }
}

fn default_partition() -> PartitionKind {
    PartitionKind::Iid
}

/// Fixed parameters of one experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Dataset label written to the Round Record log
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Synthetic data generator standing in for dataset loading
    #[serde(default)]
    pub data: SyntheticSpec,
    /// Model architecture
    #[serde(default = "default_model")]
    pub model: ModelKind,
    /// Partition scheme
    #[serde(default = "default_partition")]
    pub partition: PartitionKind,
    /// Total clients `K`
    #[serde(default = "default_num_clients")]
    pub num_clients: usize,
    /// Fraction `C` of clients sampled per round
    #[serde(default = "default_client_fraction")]
    pub client_fraction: f64,
    /// Local epochs `E`
    #[serde(default = "default_local_epochs")]
    pub local_epochs: usize,
    /// Local batch size `B`
    #[serde(default = "default_batch_size")]
    pub batch_size: BatchSize,
    /// Learning-rate candidates tried once before round 1
    #[serde(default = "default_lr_grid")]
    pub lr_grid: Vec<f32>,
    /// SGD momentum, `0.0` for plain SGD
    #[serde(default)]
    pub momentum: f32,
    /// Clients used by the learning-rate search, default `min(m, 5)`
    #[serde(default)]
    pub lr_selection_clients: Option<usize>,
    /// Target test accuracy for rounds-to-target
    #[serde(default = "default_target")]
    pub target_accuracy: f32,
    /// Rounds to run
    #[serde(default = "default_total_rounds")]
    pub total_rounds: usize,
    /// Experiment seed
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Method label
    #[serde(default)]
    pub method: Method,
    /// Aggregation path selection
    #[serde(default)]
    pub aggregation: AggregationStrategy,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            data: SyntheticSpec::default(),
            model: default_model(),
            partition: default_partition(),
            num_clients: default_num_clients(),
            client_fraction: default_client_fraction(),
            local_epochs: default_local_epochs(),
            batch_size: default_batch_size(),
            lr_grid: default_lr_grid(),
            momentum: 0.0,
            lr_selection_clients: None,
            target_accuracy: default_target(),
            total_rounds: default_total_rounds(),
            seed: default_seed(),
            method: Method::FedAvg,
            aggregation: AggregationStrategy::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load a config from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Turn this config into the FedSGD baseline: `B = inf`, `E = 1`.
    pub fn fedsgd(mut self) -> Self {
        self.batch_size = BatchSize::Unbounded;
        self.local_epochs = 1;
        self.method = Method::FedSgd;
        self
    }

    /// Clients sampled per round: `max(1, ⌊C·K⌋)`.
    pub fn clients_per_round(&self) -> usize {
        clients_per_round(self.num_clients, self.client_fraction)
    }

    /// Clients used by the one-time learning-rate search.
    pub fn lr_selection_clients(&self) -> usize {
        self.lr_selection_clients
            .unwrap_or_else(|| self.clients_per_round().min(5))
            .clamp(1, self.num_clients.max(1))
    }

    /// Communication-cost statistic `u`: `6·E/B`, or `1` for unbounded `B`.
    pub fn comm_cost(&self) -> f64 {
        match self.batch_size {
            BatchSize::Bounded(b) => 6.0 * self.local_epochs as f64 / b.get() as f64,
            BatchSize::Unbounded => 1.0,
        }
    }

    /// Key identifying this configuration's checkpoint and log rows.
    pub fn key(&self) -> ConfigKey {
        ConfigKey {
            dataset: self.dataset.clone(),
            model: self.model.label(),
            partition: self.partition.label().to_string(),
            method: self.method.to_string(),
            epochs: self.local_epochs,
            batch_size: self.batch_size,
        }
    }

    /// Check constraints that do not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(FedError::InvalidConfig(msg));

        if self.num_clients < 1 {
            return fail("K (num_clients) must be >= 1".to_string());
        }
        if !(self.client_fraction > 0.0 && self.client_fraction <= 1.0) {
            return fail(format!(
                "C (client_fraction) must be in (0, 1], got {}",
                self.client_fraction
            ));
        }
        if self.local_epochs < 1 {
            return fail("E (local_epochs) must be >= 1".to_string());
        }
        if self.lr_grid.is_empty() {
            return fail("learning-rate grid must not be empty".to_string());
        }
        if let Some(lr) = self.lr_grid.iter().find(|lr| !(lr.is_finite() && **lr > 0.0)) {
            return fail(format!("learning rates must be positive and finite, got {}", lr));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return fail(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if !(self.target_accuracy > 0.0 && self.target_accuracy <= 1.0) {
            return fail(format!(
                "target accuracy must be in (0, 1], got {}",
                self.target_accuracy
            ));
        }
        if self.total_rounds < 1 {
            return fail("total_rounds must be >= 1".to_string());
        }
        if self.lr_selection_clients == Some(0) {
            return fail("lr_selection_clients must be >= 1".to_string());
        }
        if let PartitionKind::Shards {
            shards_per_client, ..
        } = self.partition
        {
            if shards_per_client < 1 {
                return fail("shards_per_client must be >= 1".to_string());
            }
        }
        if let ModelKind::Mlp { hidden } = self.model {
            if hidden < 1 {
                return fail("MLP hidden width must be >= 1".to_string());
            }
        }
        self.data.validate()
    }

    /// Check constraints that depend on a training set of `n_items`.
    pub fn validate_for_dataset(&self, n_items: usize) -> Result<()> {
        if self.num_clients > n_items {
            return Err(FedError::InvalidConfig(format!(
                "K = {} clients exceeds the {} training items",
                self.num_clients, n_items
            )));
        }
        if let PartitionKind::Shards {
            shards_per_client,
            remainder,
        } = self.partition
        {
            let n_shards = self.num_clients * shards_per_client;
            if n_shards > n_items {
                return Err(FedError::InvalidConfig(format!(
                    "{} shards requested for {} training items",
                    n_shards, n_items
                )));
            }
            if remainder == ShardRemainder::Strict && n_items % n_shards != 0 {
                return Err(FedError::InvalidConfig(format!(
                    "{} training items do not divide into {} shards",
                    n_items, n_shards
                )));
            }
        }
        Ok(())
    }
}

/// `max(1, ⌊C·K⌋)`, tolerant of float error in `C·K`.
pub fn clients_per_round(num_clients: usize, client_fraction: f64) -> usize {
    let m = (client_fraction * num_clients as f64 + 1e-9).floor() as usize;
    m.clamp(1, num_clients.max(1))
}

/// Per-run options that do not change the experiment's identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOptions {
    /// Directory for checkpoint files; checkpointing is off when `None`
    pub checkpoint_dir: Option<PathBuf>,
    /// Append-only Round Record log; logging is off when `None`
    pub log_path: Option<PathBuf>,
    /// First round to run, `1` for a fresh start
    pub start_round: usize,
    /// What to do when resuming without a checkpoint
    pub resume_policy: ResumePolicy,
}

impl RunOptions {
    /// Options for a fresh run with no persistence.
    pub fn new() -> Self {
        Self {
            start_round: 1,
            ..Self::default()
        }
    }
}
