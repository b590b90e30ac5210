//! Crash-tolerant execution of long experiments.
//!
//! An experiment runs as a sequence of round chunks. Before each chunk the
//! [`ChunkRunner`] reads the round log to find where the configuration
//! stopped, then hands the range to a [`ChunkExecutor`]: in process, or
//! in a fresh `fedavg chunk` child so that memory is released between
//! chunks. State crosses chunk boundaries only through the checkpoint and
//! the log.

pub mod executor;
pub mod plan;
pub mod queue;
pub mod supervisor;

pub use executor::{ChunkExecutor, InProcessExecutor, ProcessExecutor};
pub use plan::ChunkPlan;
pub use queue::{run_queue, QueueEntry};
pub use supervisor::{ChunkRunner, RunSummary, DEFAULT_BACKOFF, DEFAULT_CHUNK_SIZE, MAX_ATTEMPTS};
