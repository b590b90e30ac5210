//! Durable orchestrator snapshots.
//!
//! One JSON file per configuration key, replaced atomically: the snapshot
//! is written to a temporary sibling and renamed over the old file, so a
//! crash leaves either the previous checkpoint or the new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ConfigKey;
use crate::error::{FedError, Result};

/// Snapshot taken after a completed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Configuration the snapshot belongs to
    pub key: ConfigKey,
    /// Global parameter vector after `last_round`
    pub parameters: Vec<f32>,
    /// Learning rate chosen before round 1
    pub learning_rate: f32,
    /// Last completed round
    pub last_round: usize,
}

/// Directory of checkpoint files.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the checkpoint for `key`.
    pub fn path_for(&self, key: &ConfigKey) -> PathBuf {
        self.dir.join(format!("{}.ckpt.json", key))
    }

    /// Write `checkpoint`, replacing any earlier one for the same key.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&checkpoint.key);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, checkpoint)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(
            "checkpoint for {} at round {} written to {}",
            checkpoint.key,
            checkpoint.last_round,
            path.display()
        );
        Ok(())
    }

    /// Checkpoint for `key`, `None` when there is none.
    ///
    /// A file whose stored key differs from `key` is a
    /// [`FedError::CheckpointMismatch`].
    pub fn load(&self, key: &ConfigKey) -> Result<Option<Checkpoint>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&text)?;
        if &checkpoint.key != key {
            return Err(FedError::CheckpointMismatch {
                expected: key.to_string(),
                found: checkpoint.key.to_string(),
            });
        }
        Ok(Some(checkpoint))
    }

    /// Delete the checkpoint for `key`, if any.
    pub fn remove(&self, key: &ConfigKey) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
