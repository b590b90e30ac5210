//! The round loop.

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::aggregators::fedavg_with;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{ExperimentConfig, ResumePolicy, RunOptions};
use crate::convergence::{ConvergenceTracker, RoundsToTarget};
use crate::data::{sample_clients, split, ClientPartition, Dataset};
use crate::error::{FedError, Result};
use crate::history::{RoundLog, RoundRecord};
use crate::model::{flatten, unflatten, Model};
use crate::seed::{derive_seed, SeedStream};
use crate::server::lr_selection::select_learning_rate;
use crate::server::{ChunkOutcome, Phase, RoundState};
use crate::training::{evaluate, ClientTrainer, LocalSchedule, LocalUpdate};

/// Drives one experiment through its rounds.
///
/// The orchestrator owns the global parameter vector. Clients receive a
/// copy each round, and the aggregate replaces it only after every
/// sampled client has returned.
///
/// # Example
///
/// ```rust,no_run
/// use fedavg_sim::{ExperimentConfig, Orchestrator};
///
/// let config = ExperimentConfig::default();
/// let (train, test) = config.data.generate(config.seed).unwrap();
/// let mut orchestrator = Orchestrator::new(config, train, test).unwrap();
/// let outcome = orchestrator.run().unwrap();
/// println!("{:?}", orchestrator.rounds_to_target());
/// # let _ = outcome;
/// ```
pub struct Orchestrator {
    config: ExperimentConfig,
    options: RunOptions,
    train: Dataset,
    test: Dataset,
    partitions: Vec<ClientPartition>,
    model: Box<dyn Model>,
    phase: Phase,
    state: RoundState,
    tracker: ConvergenceTracker,
    history: Vec<RoundRecord>,
    store: Option<CheckpointStore>,
    log: Option<RoundLog>,
}

impl Orchestrator {
    /// Validate `config` against the data and partition the training set.
    pub fn new(config: ExperimentConfig, train: Dataset, test: Dataset) -> Result<Self> {
        config.validate()?;
        config.validate_for_dataset(train.len())?;
        if train.feature_dim() != test.feature_dim() || train.num_classes() != test.num_classes() {
            return Err(FedError::InvalidConfig(format!(
                "train ({} features, {} classes) and test ({} features, {} classes) disagree",
                train.feature_dim(),
                train.num_classes(),
                test.feature_dim(),
                test.num_classes()
            )));
        }
        if test.is_empty() {
            return Err(FedError::InvalidConfig("test set is empty".to_string()));
        }

        let partitions = split(
            &config.partition,
            train.labels(),
            config.num_clients,
            derive_seed(config.seed, SeedStream::Partition, 0, 0),
        )?;
        if let Some(k) = partitions.iter().position(|p| p.is_empty()) {
            return Err(FedError::InvalidConfig(format!(
                "Partitioner: client {} received no items",
                k
            )));
        }

        let model = config
            .model
            .build(train.feature_dim(), train.num_classes(), config.seed);
        let tracker = ConvergenceTracker::new(config.target_accuracy);
        Ok(Self {
            config,
            options: RunOptions::new(),
            train,
            test,
            partitions,
            model,
            phase: Phase::Initializing,
            state: RoundState {
                last_round: 0,
                params: Vec::new(),
                learning_rate: 0.0,
            },
            tracker,
            history: Vec::new(),
            store: None,
            log: None,
        })
    }

    /// Build with the synthetic data described by `config.data`.
    pub fn from_config(config: ExperimentConfig) -> Result<Self> {
        let (train, test) = config.data.generate(config.seed)?;
        Self::new(config, train, test)
    }

    /// Set persistence and resume options; call before the first round.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.store = options.checkpoint_dir.clone().map(CheckpointStore::new);
        self.options = options;
        self
    }

    /// Enter the first round: resume from a checkpoint when
    /// `start_round > 1`, otherwise initialise and select the learning
    /// rate.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Initializing {
            return Ok(());
        }

        let requested = self.options.start_round.max(1);
        if requested > 1 {
            self.phase = Phase::Resuming;
            let key = self.config.key();
            let checkpoint = match &self.store {
                Some(store) => store.load(&key)?,
                None => None,
            };
            match (checkpoint, self.options.resume_policy) {
                (Some(checkpoint), _) => return self.resume(checkpoint, requested),
                (None, ResumePolicy::Refuse) => {
                    return Err(FedError::UnsafeResume {
                        start_round: requested,
                        key: key.to_string(),
                    });
                }
                (None, ResumePolicy::RestartFromScratch) => {
                    warn!(
                        "no checkpoint for {} to resume round {}; restarting from round 1, \
                         the round log may now hold duplicate rows for rounds 1..{}",
                        key,
                        requested,
                        requested - 1
                    );
                }
            }
        }

        self.phase = Phase::Initializing;
        let params = flatten(self.model.as_ref());
        self.phase = Phase::SelectingLr;
        let learning_rate = select_learning_rate(
            &self.config,
            &self.train,
            &self.test,
            &self.partitions,
            &params,
        )?;
        self.state = RoundState {
            last_round: 0,
            params,
            learning_rate,
        };
        self.open_log()?;
        self.phase = Phase::RoundActive;
        Ok(())
    }

    fn resume(&mut self, checkpoint: Checkpoint, requested: usize) -> Result<()> {
        let expected = self.num_params();
        if checkpoint.parameters.len() != expected {
            return Err(FedError::ShapeMismatch {
                expected,
                actual: checkpoint.parameters.len(),
            });
        }

        let mut last_logged = 0;
        if let Some(path) = &self.options.log_path {
            let key = self.config.key();
            for record in RoundLog::records_for(path, &key)? {
                if record.round <= checkpoint.last_round {
                    self.tracker.record(record.round, record.test_accuracy);
                    last_logged = last_logged.max(record.round);
                }
            }
        }
        // A crash between the checkpoint write and the log append leaves the
        // checkpoint one round ahead of the log.
        let unlogged = self.options.log_path.is_some() && last_logged < checkpoint.last_round;
        if checkpoint.last_round + 1 != requested && !(unlogged && requested == checkpoint.last_round) {
            warn!(
                "requested start at round {} but the checkpoint for {} ends at round {}; continuing from round {}",
                requested,
                checkpoint.key,
                checkpoint.last_round,
                checkpoint.last_round + 1
            );
        }

        info!(
            "resuming {} after round {} with learning rate {}",
            checkpoint.key, checkpoint.last_round, checkpoint.learning_rate
        );
        self.state = RoundState {
            last_round: checkpoint.last_round,
            params: checkpoint.parameters,
            learning_rate: checkpoint.learning_rate,
        };
        self.open_log()?;
        if unlogged {
            if last_logged + 1 < checkpoint.last_round {
                warn!(
                    "{}: rounds {}..={} have no record in the log and cannot be recovered",
                    checkpoint.key,
                    last_logged + 1,
                    checkpoint.last_round - 1
                );
            }
            self.backfill_record()?;
        }
        self.phase = if self.state.last_round >= self.config.total_rounds {
            Phase::Terminated
        } else {
            Phase::RoundActive
        };
        Ok(())
    }

    /// Log the record of the checkpointed round, re-evaluating its
    /// parameters. Evaluation is deterministic, so the accuracy and loss
    /// match what the interrupted round measured.
    fn backfill_record(&mut self) -> Result<()> {
        let round = self.state.last_round;
        self.phase = Phase::Evaluating;
        unflatten(self.model.as_mut(), &self.state.params)?;
        let eval = evaluate(self.model.as_ref(), &self.test)?;

        self.phase = Phase::Logging;
        self.tracker.record(round, eval.accuracy);
        let record = RoundRecord::new(
            &self.config,
            round,
            eval.accuracy,
            eval.loss,
            self.state.learning_rate,
            self.config.clients_per_round(),
            self.tracker.rounds_to_target(),
        );
        if let Some(log) = &mut self.log {
            log.append(&record)?;
        }
        info!(
            "round {}: checkpoint was ahead of the log, wrote its record (accuracy {:.4})",
            round, eval.accuracy
        );
        Ok(())
    }

    fn open_log(&mut self) -> Result<()> {
        if let Some(path) = &self.options.log_path {
            self.log = Some(RoundLog::open_append(path)?);
        }
        Ok(())
    }

    /// Run the next round and return its record.
    pub fn run_round(&mut self) -> Result<RoundRecord> {
        self.start()?;
        let round = self.state.next_round();
        if round > self.config.total_rounds {
            return Err(FedError::InvalidConfig(format!(
                "round {} is past total_rounds = {}",
                round, self.config.total_rounds
            )));
        }

        self.phase = Phase::RoundActive;
        let clients = sample_clients(
            self.config.num_clients,
            self.config.client_fraction,
            derive_seed(self.config.seed, SeedStream::Sampling, round, 0),
        );
        let schedule = LocalSchedule {
            epochs: self.config.local_epochs,
            batch_size: self.config.batch_size,
            learning_rate: self.state.learning_rate,
            momentum: self.config.momentum,
        };
        let trainer = ClientTrainer::new(self.config.model, &self.train);
        let global = &self.state.params;
        let partitions = &self.partitions;
        let seed = self.config.seed;

        let updates = clients
            .par_iter()
            .map(|&c| trainer.train(c, &partitions[c], global, &schedule, seed, round))
            .collect::<Result<Vec<LocalUpdate>>>()?;

        let params: Vec<&[f32]> = updates.iter().map(|u| u.params.as_slice()).collect();
        let weights: Vec<f64> = updates.iter().map(|u| u.sample_count as f64).collect();
        let aggregated = fedavg_with(self.config.aggregation, &params, &weights)?;
        let mean_loss =
            updates.iter().map(|u| u.loss).sum::<f32>() / updates.len().max(1) as f32;
        debug!(
            "round {}: aggregated {} clients, mean local loss {:.4}",
            round,
            updates.len(),
            mean_loss
        );

        self.phase = Phase::Evaluating;
        unflatten(self.model.as_mut(), &aggregated)?;
        let eval = evaluate(self.model.as_ref(), &self.test)?;

        self.phase = Phase::Logging;
        self.tracker.record(round, eval.accuracy);
        let record = RoundRecord::new(
            &self.config,
            round,
            eval.accuracy,
            eval.loss,
            self.state.learning_rate,
            clients.len(),
            self.tracker.rounds_to_target(),
        );
        self.state = RoundState {
            last_round: round,
            params: aggregated,
            learning_rate: self.state.learning_rate,
        };
        if let Some(store) = &self.store {
            store.save(&Checkpoint {
                key: self.config.key(),
                parameters: self.state.params.clone(),
                learning_rate: self.state.learning_rate,
                last_round: round,
            })?;
        }
        if let Some(log) = &mut self.log {
            log.append(&record)?;
        }

        info!(
            "round {}/{}: accuracy {:.4}, loss {:.4}, lr {}, clients {}",
            round,
            self.config.total_rounds,
            eval.accuracy,
            eval.loss,
            self.state.learning_rate,
            clients.len()
        );
        self.history.push(record.clone());
        self.phase = if round == self.config.total_rounds {
            Phase::Terminated
        } else {
            Phase::RoundActive
        };
        Ok(record)
    }

    /// Run rounds `start..=end` (clamped to `total_rounds`).
    ///
    /// On a fresh orchestrator `start` becomes the requested starting
    /// round; afterwards it must be the next round due.
    pub fn run_chunk(&mut self, start: usize, end: usize) -> Result<ChunkOutcome> {
        if start == 0 || end < start {
            return Err(FedError::InvalidConfig(format!(
                "invalid round range {}..={}",
                start, end
            )));
        }
        if self.phase == Phase::Initializing {
            self.options.start_round = start;
            self.start()?;
        } else if start != self.state.next_round() {
            return Err(FedError::InvalidConfig(format!(
                "chunk starts at round {} but round {} is next",
                start,
                self.state.next_round()
            )));
        }

        let end = end.min(self.config.total_rounds);
        let mut records = Vec::new();
        while self.state.last_round < end {
            records.push(self.run_round()?);
        }
        Ok(ChunkOutcome {
            state: self.state.clone(),
            records,
        })
    }

    /// Run every remaining round.
    pub fn run(&mut self) -> Result<ChunkOutcome> {
        let start = if self.phase == Phase::Initializing {
            self.options.start_round.max(1)
        } else {
            self.state.next_round()
        };
        self.run_chunk(start, self.config.total_rounds.max(start))
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current global parameter vector.
    pub fn params(&self) -> &[f32] {
        &self.state.params
    }

    /// State carried into the next round.
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// Records of the rounds run by this orchestrator.
    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Rounds-to-target over every round seen, including rounds reloaded
    /// from the log on resume.
    pub fn rounds_to_target(&self) -> RoundsToTarget {
        self.tracker.rounds_to_target()
    }

    /// The experiment configuration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Client partitions, indexed by client.
    pub fn partitions(&self) -> &[ClientPartition] {
        &self.partitions
    }

    /// Length of the global parameter vector.
    pub fn num_params(&self) -> usize {
        crate::model::num_params(self.model.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchSize, ModelKind, PartitionKind};
    use crate::data::SyntheticSpec;

    fn tiny_config() -> ExperimentConfig {
        ExperimentConfig {
            model: ModelKind::Logistic,
            num_clients: 4,
            client_fraction: 0.5,
            local_epochs: 1,
            batch_size: BatchSize::bounded(8).unwrap(),
            lr_grid: vec![0.05, 0.1],
            total_rounds: 3,
            target_accuracy: 0.5,
            data: SyntheticSpec {
                num_classes: 3,
                feature_dim: 4,
                train_items: 80,
                test_items: 30,
                ..SyntheticSpec::default()
            },
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn test_phases_through_a_run() {
        let mut orch = Orchestrator::from_config(tiny_config()).unwrap();
        assert_eq!(orch.phase(), Phase::Initializing);
        orch.start().unwrap();
        assert_eq!(orch.phase(), Phase::RoundActive);
        assert_eq!(orch.state().last_round, 0);

        let outcome = orch.run().unwrap();
        assert_eq!(orch.phase(), Phase::Terminated);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.state.last_round, 3);
        let rounds: Vec<usize> = outcome.records.iter().map(|r| r.round).collect();
        assert_eq!(rounds, vec![1, 2, 3]);
    }

    #[test]
    fn test_learning_rate_fixed_across_rounds() {
        let mut orch = Orchestrator::from_config(tiny_config()).unwrap();
        let outcome = orch.run().unwrap();
        let lr = outcome.records[0].chosen_learning_rate;
        assert!(outcome.records.iter().all(|r| r.chosen_learning_rate == lr));
        assert!(tiny_config().lr_grid.contains(&lr));
    }

    #[test]
    fn test_runs_are_reproducible() {
        let mut a = Orchestrator::from_config(tiny_config()).unwrap();
        let mut b = Orchestrator::from_config(tiny_config()).unwrap();
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_round_past_total_is_error() {
        let mut orch = Orchestrator::from_config(tiny_config()).unwrap();
        orch.run().unwrap();
        assert!(orch.run_round().is_err());
    }

    #[test]
    fn test_unsafe_resume_refused() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            start_round: 2,
            resume_policy: ResumePolicy::Refuse,
            ..RunOptions::new()
        };
        let mut orch = Orchestrator::from_config(tiny_config())
            .unwrap()
            .with_options(options);
        let err = orch.start().unwrap_err();
        assert!(matches!(err, FedError::UnsafeResume { start_round: 2, .. }));
    }

    #[test]
    fn test_unsafe_resume_restarts() {
        let options = RunOptions {
            start_round: 2,
            resume_policy: ResumePolicy::RestartFromScratch,
            ..RunOptions::new()
        };
        let mut orch = Orchestrator::from_config(tiny_config())
            .unwrap()
            .with_options(options);
        let outcome = orch.run().unwrap();
        assert_eq!(outcome.records.first().map(|r| r.round), Some(1));
    }

    #[test]
    fn test_chunk_must_continue_from_next_round() {
        let mut orch = Orchestrator::from_config(tiny_config()).unwrap();
        orch.run_chunk(1, 1).unwrap();
        assert!(orch.run_chunk(3, 3).is_err());
        let outcome = orch.run_chunk(2, 10).unwrap();
        assert_eq!(outcome.state.last_round, 3);
    }

    #[test]
    fn test_too_many_shards_rejected() {
        let config = ExperimentConfig {
            num_clients: 50,
            partition: PartitionKind::non_iid(),
            ..tiny_config()
        };
        assert!(matches!(
            Orchestrator::from_config(config),
            Err(FedError::InvalidConfig(_))
        ));
    }
}
