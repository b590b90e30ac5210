//! Data handling for simulated clients.
//!
//! - [`dataset`] — labelled feature rows and zero-copy client views
//! - [`partition`] — IID and label-sharded client splits, client sampling
//! - [`synthetic`] — seeded Gaussian-cluster data for experiments and tests

pub mod dataset;
pub mod partition;
pub mod synthetic;

pub use dataset::{Batch, Batches, ClientData, Dataset};
pub use partition::{iid_split, sample_clients, sample_n, shard_split, split, ClientPartition};
pub use synthetic::SyntheticSpec;
