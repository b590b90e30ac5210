//! Ways of running one chunk of rounds.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::config::{ExperimentConfig, ResumePolicy, RunOptions};
use crate::error::{FedError, Result};
use crate::server::Orchestrator;

/// Runs rounds `start..=end` of an experiment to completion.
///
/// Results reach the caller through the checkpoint and the round log
/// named in the options, never through memory shared with the executor.
pub trait ChunkExecutor {
    /// Run one chunk; `options.start_round` is set to `start`.
    fn execute(&self, config: &ExperimentConfig, options: &RunOptions, start: usize, end: usize) -> Result<()>;
}

/// Runs the chunk on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InProcessExecutor;

impl ChunkExecutor for InProcessExecutor {
    fn execute(&self, config: &ExperimentConfig, options: &RunOptions, start: usize, end: usize) -> Result<()> {
        let mut orchestrator = Orchestrator::from_config(config.clone())?.with_options(options.clone());
        let outcome = orchestrator.run_chunk(start, end)?;
        debug!(
            "in-process chunk {}..={} finished at round {}",
            start, end, outcome.state.last_round
        );
        Ok(())
    }
}

/// Runs the chunk in a child `fedavg chunk` process, so all memory the
/// chunk allocated is returned to the OS when it exits.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    program: PathBuf,
}

impl ProcessExecutor {
    /// Executor spawning `program`, which must accept the `chunk`
    /// subcommand.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Executor re-running the current executable.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    fn command(&self, config_path: &Path, options: &RunOptions, start: usize, end: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("chunk")
            .arg("--config")
            .arg(config_path)
            .arg("--start")
            .arg(start.to_string())
            .arg("--end")
            .arg(end.to_string());
        if let Some(dir) = &options.checkpoint_dir {
            cmd.arg("--checkpoint-dir").arg(dir);
        }
        if let Some(log) = &options.log_path {
            cmd.arg("--log-path").arg(log);
        }
        if options.resume_policy == ResumePolicy::Refuse {
            cmd.arg("--refuse-unsafe-resume");
        }
        cmd
    }
}

impl ChunkExecutor for ProcessExecutor {
    fn execute(&self, config: &ExperimentConfig, options: &RunOptions, start: usize, end: usize) -> Result<()> {
        let dir = options
            .checkpoint_dir
            .clone()
            .ok_or_else(|| {
                FedError::InvalidConfig(
                    "ChunkRunner: process isolation needs a checkpoint directory".to_string(),
                )
            })?;
        std::fs::create_dir_all(&dir)?;
        let config_path = dir.join(format!("{}.config.json", config.key()));
        std::fs::write(&config_path, serde_json::to_string_pretty(config)?)?;

        let mut cmd = self.command(&config_path, options, start, end);
        info!("spawning chunk worker for rounds {}..={}: {:?}", start, end, cmd);
        let status = cmd.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(FedError::Worker(format!(
                "worker for rounds {}..={} exited with {}",
                start, end, status
            )))
        }
    }
}
