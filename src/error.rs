//! Error types for the FedAvg simulator

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FedError>;

/// All possible errors in the simulator.
///
/// Every message names the component that failed and the condition it
/// found violated. Missing the accuracy target is not an error; see
/// [`RoundsToTarget::NotReached`](crate::convergence::RoundsToTarget).
#[derive(Error, Debug)]
pub enum FedError {
    /// The experiment configuration violates a constraint
    #[error("Config: {0}")]
    InvalidConfig(String),

    /// A flat parameter vector does not fit the model
    #[error("Codec: parameter vector has {actual} values but the model has {expected}")]
    ShapeMismatch {
        /// Parameter count of the model
        expected: usize,
        /// Length of the offending vector
        actual: usize,
    },

    /// Local training could not run a batch through the model
    #[error("ClientTrainer: {0}")]
    Training(String),

    /// Aggregation inputs are invalid
    #[error("Aggregator: {0}")]
    InvalidAggregationInput(#[from] AggregationInputError),

    /// A checkpoint was written for a different configuration
    #[error("Checkpoint: written for {found}, cannot resume into {expected}")]
    CheckpointMismatch {
        /// Key of the configuration being resumed
        expected: String,
        /// Key stored in the checkpoint
        found: String,
    },

    /// Resuming past round 1 without a checkpoint
    #[error("Orchestrator: cannot resume at round {start_round}, no checkpoint for {key}")]
    UnsafeResume {
        /// Requested starting round
        start_round: usize,
        /// Configuration key that has no checkpoint
        key: String,
    },

    /// A chunk failed twice in a row
    #[error("ChunkRunner: rounds {start_round}..={end_round} failed after {attempts} attempts: {reason}")]
    ChunkFailed {
        /// First round of the chunk
        start_round: usize,
        /// Last round of the chunk
        end_round: usize,
        /// How many times the chunk was attempted
        attempts: usize,
        /// Last failure reason
        reason: String,
    },

    /// A chunk worker process exited unsuccessfully
    #[error("ChunkWorker: {0}")]
    Worker(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Round Record log failure
    #[error("RoundLog: {0}")]
    Csv(#[from] csv::Error),

    /// Checkpoint or config (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The specific reason an aggregation was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationInputError {
    /// No client vectors were supplied
    #[error("no client parameter vectors provided")]
    NoClients,

    /// A client vector differs in length from the first one
    #[error("parameter vectors must have equal length (client {client} has {actual}, expected {expected})")]
    LengthMismatch {
        /// Position of the offending client
        client: usize,
        /// Length of the first vector
        expected: usize,
        /// Length of the offending vector
        actual: usize,
    },

    /// A client vector contains NaN or infinity
    #[error("parameter vectors must be finite (client {client}, index {index})")]
    NonFiniteParameter {
        /// Position of the offending client
        client: usize,
        /// Coordinate holding the non-finite value
        index: usize,
    },

    /// `weights` and `params` differ in length
    #[error("weights must match parameter vectors in count ({weights} weights for {params} vectors)")]
    WeightCountMismatch {
        /// Number of parameter vectors
        params: usize,
        /// Number of weights
        weights: usize,
    },

    /// A weight is below zero
    #[error("weights must be non-negative (client {client})")]
    NegativeWeight {
        /// Position of the offending client
        client: usize,
    },

    /// A weight is NaN or infinite
    #[error("weights must be finite (client {client})")]
    NonFiniteWeight {
        /// Position of the offending client
        client: usize,
    },

    /// All weights are zero
    #[error("weights must sum to a positive value")]
    ZeroWeightSum,

    /// The weights are finite but their sum overflows
    #[error("weights must have a finite sum")]
    WeightSumOverflow,
}

impl From<ndarray::ShapeError> for FedError {
    fn from(e: ndarray::ShapeError) -> Self {
        FedError::Training(format!("array shape error: {}", e))
    }
}
