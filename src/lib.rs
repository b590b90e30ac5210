//! # fedavg-sim: a Federated Averaging simulator
//!
//! Simulates the FedAvg protocol of McMahan et al. (2017) in a single
//! process: each round a random fraction of clients trains the shared
//! model locally with SGD, and the server replaces the global model with
//! the sample-weighted average of the results.
//!
//! ## Building blocks
//!
//! - [`data`] - datasets, IID and label-sharded partitions, client sampling
//! - [`model`] - the trainable model abstraction and the parameter codec
//! - [`training`] - local SGD on one client, held-out evaluation
//! - [`aggregators`] - [`fedavg()`] with dense and streaming paths
//! - [`convergence`] - interpolated rounds-to-target
//!
//! ## Running experiments
//!
//! [`Orchestrator`] drives the round loop for one [`ExperimentConfig`].
//! Long runs go through [`runner::ChunkRunner`], which executes bounded
//! chunks of rounds, resumes from [`checkpoint`]s and the append-only
//! [`history::RoundLog`], and retries a failed chunk once.
//!
//! ```rust
//! use fedavg_sim::data::SyntheticSpec;
//! use fedavg_sim::{ExperimentConfig, ModelKind, Orchestrator};
//!
//! let config = ExperimentConfig {
//!     model: ModelKind::Logistic,
//!     num_clients: 4,
//!     client_fraction: 0.5,
//!     total_rounds: 2,
//!     data: SyntheticSpec { train_items: 200, test_items: 50, ..SyntheticSpec::default() },
//!     ..ExperimentConfig::default()
//! };
//! let mut orchestrator = Orchestrator::from_config(config).unwrap();
//! let outcome = orchestrator.run().unwrap();
//! assert_eq!(outcome.records.len(), 2);
//! ```

#![deny(missing_docs)]

pub mod aggregators;
pub mod checkpoint;
pub mod config;
pub mod convergence;
pub mod data;
pub mod error;
pub mod history;
pub mod math;
pub mod model;
pub mod runner;
pub mod seed;
pub mod server;
pub mod training;

// Re-exports
pub use aggregators::{fedavg, AggregationStrategy};
pub use config::{BatchSize, ExperimentConfig, Method, ModelKind, PartitionKind, ResumePolicy, RunOptions};
pub use convergence::{rounds_to_target, RoundsToTarget};
pub use error::{AggregationInputError, FedError, Result};
pub use history::RoundRecord;
pub use server::{Orchestrator, Phase};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
