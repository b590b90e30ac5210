//! Orchestrator state threaded from round to round.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::history::RoundRecord;

/// Lifecycle of one experiment.
///
/// ```text
/// Initializing -> SelectingLr -> RoundActive -> Evaluating -> Logging -> RoundActive | Terminated
/// Resuming     ---------------^
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Built, nothing run yet
    Initializing,
    /// Restoring from a checkpoint instead of initialising
    Resuming,
    /// One-time learning-rate search before round 1
    SelectingLr,
    /// Sampling, local training and aggregation
    RoundActive,
    /// Measuring the new global model on the test set
    Evaluating,
    /// Writing the Round Record and checkpoint
    Logging,
    /// Every configured round has completed
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Initializing => "INITIALIZING",
            Phase::Resuming => "RESUMING",
            Phase::SelectingLr => "SELECTING_LR",
            Phase::RoundActive => "ROUND_ACTIVE",
            Phase::Evaluating => "EVALUATING",
            Phase::Logging => "LOGGING",
            Phase::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Everything a round needs from the rounds before it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundState {
    /// Last completed round, `0` before round 1
    pub last_round: usize,
    /// Global parameter vector
    pub params: Vec<f32>,
    /// Learning rate fixed for the whole experiment
    pub learning_rate: f32,
}

impl RoundState {
    /// Round that runs next.
    pub fn next_round(&self) -> usize {
        self.last_round + 1
    }
}

/// Result of running a contiguous range of rounds.
#[derive(Clone, Debug)]
pub struct ChunkOutcome {
    /// State after the last round of the chunk
    pub state: RoundState,
    /// One record per round run, in round order
    pub records: Vec<RoundRecord>,
}
