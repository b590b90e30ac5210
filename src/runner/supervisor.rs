//! Supervised chunked execution of one experiment.

use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::{ExperimentConfig, RunOptions};
use crate::error::{FedError, Result};
use crate::history::RoundLog;
use crate::runner::{ChunkExecutor, ChunkPlan};

/// Default rounds per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Default pause before retrying a failed chunk.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Attempts per chunk: the first run and one retry.
pub const MAX_ATTEMPTS: usize = 2;

/// What a chunked run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Chunks that completed
    pub chunks: usize,
    /// Failed attempts that were retried
    pub retries: usize,
    /// Last round known complete
    pub last_round: usize,
}

/// Runs an experiment chunk by chunk, resolving the starting round from
/// the round log before every attempt.
///
/// A failed chunk is retried once after a fixed backoff; a second
/// consecutive failure ends the run with [`FedError::ChunkFailed`].
pub struct ChunkRunner<E> {
    executor: E,
    chunk_size: usize,
    backoff: Duration,
}

impl<E: ChunkExecutor> ChunkRunner<E> {
    /// Runner with the default chunk size and backoff.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            chunk_size: DEFAULT_CHUNK_SIZE,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Set the rounds per chunk.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the pause before a retry.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The executor running each chunk.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run every round of `config` not yet in the log.
    pub fn run(&self, config: &ExperimentConfig, options: &RunOptions) -> Result<RunSummary> {
        config.validate()?;
        let total = config.total_rounds;
        let mut summary = RunSummary::default();
        let mut next = self.resolve_start(config, options, options.start_round.max(1))?;
        summary.last_round = next - 1;

        while let Some(range) = ChunkPlan::new(next, total, self.chunk_size)?.next() {
            let end = *range.end();
            let mut attempt = 0;
            loop {
                attempt += 1;
                let start = self.resolve_start(config, options, *range.start())?.max(*range.start());
                if start > end {
                    // the failed attempt logged every round before exiting
                    info!("{}: rounds {}..={} already logged", config.key(), range.start(), end);
                    break;
                }
                let chunk_options = RunOptions {
                    start_round: start,
                    ..options.clone()
                };
                info!(
                    "{}: rounds {}..={} (attempt {}/{})",
                    config.key(),
                    start,
                    end,
                    attempt,
                    MAX_ATTEMPTS
                );
                match self.executor.execute(config, &chunk_options, start, end) {
                    Ok(()) => break,
                    Err(e) if attempt < MAX_ATTEMPTS => {
                        warn!(
                            "{}: chunk {}..={} failed ({}), retrying in {:?}",
                            config.key(),
                            start,
                            end,
                            e,
                            self.backoff
                        );
                        summary.retries += 1;
                        thread::sleep(self.backoff);
                    }
                    Err(e) => {
                        error!(
                            "{}: chunk {}..={} failed twice, stopping: {}",
                            config.key(),
                            start,
                            end,
                            e
                        );
                        return Err(FedError::ChunkFailed {
                            start_round: start,
                            end_round: end,
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            summary.chunks += 1;
            let resolved = self.resolve_start(config, options, end + 1)?;
            next = if resolved <= end {
                warn!(
                    "{}: log shows round {} as next after chunk ending at {}; moving on to round {}",
                    config.key(),
                    resolved,
                    end,
                    end + 1
                );
                end + 1
            } else {
                resolved
            };
            summary.last_round = next - 1;
        }
        Ok(summary)
    }

    /// `last logged round + 1`, or `fallback` when there is no log or no
    /// row for this configuration.
    fn resolve_start(&self, config: &ExperimentConfig, options: &RunOptions, fallback: usize) -> Result<usize> {
        let logged = match &options.log_path {
            Some(path) => RoundLog::last_completed_round(path, &config.key())?,
            None => None,
        };
        Ok(logged.map_or(fallback, |r| r + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::RoundsToTarget;
    use crate::history::RoundRecord;
    use std::cell::RefCell;

    /// Fails the listed attempts (1-based, counted across the run) and
    /// records every call.
    struct Scripted {
        fail_on: Vec<usize>,
        calls: RefCell<Vec<(usize, usize)>>,
    }

    impl Scripted {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                fail_on,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChunkExecutor for Scripted {
        fn execute(&self, _: &ExperimentConfig, _: &RunOptions, start: usize, end: usize) -> Result<()> {
            let mut calls = self.calls.borrow_mut();
            calls.push((start, end));
            if self.fail_on.contains(&calls.len()) {
                Err(FedError::Worker("exit status: 137".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn config(total_rounds: usize) -> ExperimentConfig {
        ExperimentConfig {
            total_rounds,
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn test_runs_all_chunks() {
        let runner = ChunkRunner::new(Scripted::new(vec![])).chunk_size(4);
        let summary = runner.run(&config(10), &RunOptions::new()).unwrap();
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.last_round, 10);
        assert_eq!(
            *runner.executor().calls.borrow(),
            vec![(1, 4), (5, 8), (9, 10)]
        );
    }

    #[test]
    fn test_single_failure_is_retried() {
        let runner = ChunkRunner::new(Scripted::new(vec![2]))
            .chunk_size(5)
            .backoff(Duration::ZERO);
        let summary = runner.run(&config(10), &RunOptions::new()).unwrap();
        assert_eq!(summary.retries, 1);
        assert_eq!(
            *runner.executor().calls.borrow(),
            vec![(1, 5), (6, 10), (6, 10)]
        );
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let runner = ChunkRunner::new(Scripted::new(vec![2, 3]))
            .chunk_size(5)
            .backoff(Duration::ZERO);
        let err = runner.run(&config(20), &RunOptions::new()).unwrap_err();
        match err {
            FedError::ChunkFailed {
                start_round,
                end_round,
                attempts,
                ..
            } => {
                assert_eq!((start_round, end_round, attempts), (6, 10, 2));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // no later chunk ran
        assert_eq!(runner.executor().calls.borrow().len(), 3);
    }

    /// Logs every round of its chunk, then fails the first call as a worker
    /// killed during teardown would.
    struct FailsAfterLogging {
        calls: RefCell<usize>,
    }

    impl ChunkExecutor for FailsAfterLogging {
        fn execute(&self, config: &ExperimentConfig, options: &RunOptions, start: usize, end: usize) -> Result<()> {
            *self.calls.borrow_mut() += 1;
            if let Some(path) = &options.log_path {
                let mut log = RoundLog::open_append(path)?;
                for round in start..=end {
                    log.append(&RoundRecord::new(
                        config,
                        round,
                        0.5,
                        1.0,
                        0.1,
                        10,
                        RoundsToTarget::NotReached,
                    ))?;
                }
            }
            if *self.calls.borrow() == 1 {
                Err(FedError::Worker("exit status: 137".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failure_after_completed_chunk_moves_on() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            log_path: Some(dir.path().join("rounds.csv")),
            ..RunOptions::new()
        };
        let runner = ChunkRunner::new(FailsAfterLogging {
            calls: RefCell::new(0),
        })
        .chunk_size(2)
        .backoff(Duration::ZERO);

        let summary = runner.run(&config(4), &options).unwrap();
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.last_round, 4);
        // the failed chunk is not run again
        assert_eq!(*runner.executor().calls.borrow(), 2);
    }
}
