//! Running many experiment configurations in sequence.

use log::{error, info};

use crate::config::{ExperimentConfig, RunOptions};
use crate::error::FedError;
use crate::runner::{ChunkExecutor, ChunkRunner, RunSummary};

/// Outcome of one queued configuration.
#[derive(Debug)]
pub struct QueueEntry {
    /// Configuration key
    pub key: String,
    /// Summary on success, the error that stopped it otherwise
    pub result: Result<RunSummary, FedError>,
}

impl QueueEntry {
    /// Whether the configuration ran to completion.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every configuration in `configs` with `runner`.
///
/// A failing configuration is logged and skipped; the rest of the queue
/// still runs.
pub fn run_queue<E: ChunkExecutor>(
    runner: &ChunkRunner<E>,
    configs: &[ExperimentConfig],
    options: &RunOptions,
) -> Vec<QueueEntry> {
    let mut entries = Vec::with_capacity(configs.len());
    for (i, config) in configs.iter().enumerate() {
        let key = config.key().to_string();
        info!("experiment {}/{}: {}", i + 1, configs.len(), key);
        let result = runner.run(config, options);
        if let Err(e) = &result {
            error!("experiment {} failed and is skipped: {}", key, e);
        }
        entries.push(QueueEntry { key, result });
    }

    let failed = entries.iter().filter(|e| !e.is_ok()).count();
    info!(
        "queue finished: {} succeeded, {} failed",
        entries.len() - failed,
        failed
    );
    entries
}
