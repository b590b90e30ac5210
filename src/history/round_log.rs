//! Append-only CSV log of Round Records.
//!
//! The header is written once, when the file is empty; after that every
//! [`RoundLog::append`] adds and flushes exactly one row, so a crash loses
//! at most the row being written.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::warn;

use crate::config::ConfigKey;
use crate::error::Result;
use crate::history::RoundRecord;

/// Writer appending rows to a Round Record log file.
pub struct RoundLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl RoundLog {
    /// Open `path` for appending, creating it if needed.
    ///
    /// A last line without its newline is a row torn by a crash; it is cut
    /// off so the next row starts on a line of its own.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let is_empty = trim_torn_tail(&mut file, &path)? == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);
        Ok(Self { path, writer })
    }

    /// Append one row and flush it to disk.
    pub fn append(&mut self, record: &RoundRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable row of the log at `path`.
    ///
    /// A missing file is an empty log. Rows that do not parse, such as a
    /// row cut short by a crash, are skipped with a warning.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<RoundRecord>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<RoundRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "skipping unreadable row {} of {}: {}",
                    line + 2,
                    path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    /// Rows belonging to the configuration identified by `key`, in file
    /// order.
    pub fn records_for(path: impl AsRef<Path>, key: &ConfigKey) -> Result<Vec<RoundRecord>> {
        Ok(Self::read_all(path)?
            .into_iter()
            .filter(|r| r.matches(key))
            .collect())
    }

    /// Highest round logged for `key`, `None` when there is none.
    pub fn last_completed_round(path: impl AsRef<Path>, key: &ConfigKey) -> Result<Option<usize>> {
        Ok(Self::records_for(path, key)?
            .iter()
            .map(|r| r.round)
            .max())
    }
}

/// Truncate `file` after its last newline and return the new length.
fn trim_torn_tail(file: &mut File, path: &Path) -> Result<u64> {
    const BLOCK: u64 = 4096;
    let len = file.metadata()?.len();
    let mut end = len;
    let mut buf = vec![0u8; BLOCK as usize];
    while end > 0 {
        let start = end.saturating_sub(BLOCK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            end = start + pos as u64 + 1;
            break;
        }
        end = start;
    }
    if end < len {
        warn!(
            "dropping {} bytes of a torn row at the end of {}",
            len - end,
            path.display()
        );
        file.set_len(end)?;
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchSize, ExperimentConfig};
    use crate::convergence::RoundsToTarget;
    use std::io::Write;

    fn record(cfg: &ExperimentConfig, round: usize) -> RoundRecord {
        RoundRecord::new(cfg, round, 0.5, 1.0, 0.05, 10, RoundsToTarget::NotReached)
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.csv");
        let cfg = ExperimentConfig::default();

        let mut log = RoundLog::open_append(&path).unwrap();
        log.append(&record(&cfg, 1)).unwrap();
        drop(log);
        let mut log = RoundLog::open_append(&path).unwrap();
        log.append(&record(&cfg, 2)).unwrap();
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        let headers = text.lines().filter(|l| l.starts_with("dataset,")).count();
        assert_eq!(headers, 1);
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().contains(",E,B,"));
    }

    #[test]
    fn test_unbounded_batch_round_trips_as_inf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.csv");
        let cfg = ExperimentConfig::default().fedsgd();

        let mut log = RoundLog::open_append(&path).unwrap();
        let mut rec = record(&cfg, 1);
        rec.rounds_to_target = RoundsToTarget::Reached(1.5);
        log.append(&rec).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().contains(",inf,"));

        let rows = RoundLog::read_all(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_size, BatchSize::Unbounded);
        assert_eq!(rows[0].rounds_to_target, RoundsToTarget::Reached(1.5));
    }

    #[test]
    fn test_last_completed_round_matches_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.csv");
        let fedavg = ExperimentConfig::default();
        let fedsgd = fedavg.clone().fedsgd();

        let mut log = RoundLog::open_append(&path).unwrap();
        for r in 1..=3 {
            log.append(&record(&fedavg, r)).unwrap();
        }
        for r in 1..=7 {
            log.append(&record(&fedsgd, r)).unwrap();
        }

        assert_eq!(RoundLog::last_completed_round(&path, &fedavg.key()).unwrap(), Some(3));
        assert_eq!(RoundLog::last_completed_round(&path, &fedsgd.key()).unwrap(), Some(7));
        let other = ExperimentConfig {
            local_epochs: 20,
            ..fedavg
        };
        assert_eq!(RoundLog::last_completed_round(&path, &other.key()).unwrap(), None);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(RoundLog::read_all(&path).unwrap().is_empty());
        let key = ExperimentConfig::default().key();
        assert_eq!(RoundLog::last_completed_round(&path, &key).unwrap(), None);
    }

    #[test]
    fn test_truncated_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.csv");
        let cfg = ExperimentConfig::default();
        let mut log = RoundLog::open_append(&path).unwrap();
        log.append(&record(&cfg, 1)).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "synthetic,mlp200,iid,FedAvg,2,0.6").unwrap();
        drop(file);

        assert_eq!(RoundLog::last_completed_round(&path, &cfg.key()).unwrap(), Some(1));

        let mut log = RoundLog::open_append(&path).unwrap();
        log.append(&record(&cfg, 2)).unwrap();
        drop(log);

        let rounds: Vec<usize> = RoundLog::read_all(&path)
            .unwrap()
            .iter()
            .map(|r| r.round)
            .collect();
        assert_eq!(rounds, vec![1, 2]);
    }

    #[test]
    fn test_torn_header_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.csv");
        std::fs::write(&path, "dataset,mod").unwrap();

        let cfg = ExperimentConfig::default();
        let mut log = RoundLog::open_append(&path).unwrap();
        log.append(&record(&cfg, 1)).unwrap();
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("dataset,model,"));
        assert_eq!(RoundLog::last_completed_round(&path, &cfg.key()).unwrap(), Some(1));
    }
}
