//! Round Orchestrator: the server side of the simulation.
//!
//! - [`orchestrator`] — the per-round protocol and its state machine
//! - [`lr_selection`] — one-time learning-rate search before round 1
//! - [`state`] — phases and the state carried between rounds

pub mod lr_selection;
pub mod orchestrator;
pub mod state;

pub use lr_selection::{score_candidates, select_learning_rate, CandidateScore};
pub use orchestrator::Orchestrator;
pub use state::{ChunkOutcome, Phase, RoundState};
