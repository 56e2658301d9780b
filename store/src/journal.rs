//! Write-ahead journal: append/checkpoint/recover for crash-safe durability.
//!
//! Mirrors a conventional WAL file: a sequence of length-prefixed JSON
//! records appended to `{name}.db-wal`, periodically folded back into the
//! main store by [`Journal::checkpoint`] and truncated. The main store
//! itself is opened and owned by [`crate::engine::Engine`]; the journal
//! only ever touches the WAL file and a small `.db-shm` marker file that
//! records the last checkpoint boundary.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Result, StoreError};

const PAGE_SIZE: u64 = 4096;

/// How durably [`Journal::append`] must land before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityLevel {
    /// fsync every append.
    Full,
    /// a weaker flush is acceptable; OS buffers may still hold the write.
    Normal,
}

/// Checkpoint strategy, escalating from least to most disruptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Passive,
    Restart,
    Truncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalState {
    Closed,
    Initializing,
    Ready,
    Checkpointing,
    Closing,
}

/// One entry appended to the WAL: an opaque mutation payload plus the
/// collection it targets, so recovery can replay it generically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub collection: String,
    pub key: String,
    /// `None` marks a tombstone (delete).
    pub payload: Option<String>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointStats {
    pub size_before: u64,
    pub size_after: u64,
    pub mode: CheckpointMode,
    pub attempts: u32,
}

/// Owns the `.db-wal` file and a small checkpoint-marker file.
pub struct Journal {
    wal_path: PathBuf,
    marker_path: PathBuf,
    durability: DurabilityLevel,
    max_size_bytes: u64,
    state: JournalState,
    next_sequence: u64,
}

impl Journal {
    /// Open (creating if absent) the WAL at `{base_dir}/{name}.db-wal`.
    pub fn open(base_dir: &Path, name: &str, durability: DurabilityLevel) -> Result<Self> {
        let wal_path = base_dir.join(format!("{name}.db-wal"));
        let marker_path = base_dir.join(format!("{name}.db-shm"));

        let mut journal = Journal {
            wal_path,
            marker_path,
            durability,
            max_size_bytes: 256 * 1024 * 1024,
            state: JournalState::Initializing,
            next_sequence: 1,
        };

        journal.integrity_check()?;
        journal.next_sequence = journal.scan_last_sequence()? + 1;
        journal.state = JournalState::Ready;
        debug!(path = %journal.wal_path.display(), "journal opened");
        Ok(journal)
    }

    /// Verify the WAL file exists, is page-aligned, and is readable.
    pub fn integrity_check(&self) -> Result<()> {
        if !self.wal_path.exists() {
            File::create(&self.wal_path)?;
            return Ok(());
        }
        let meta = std::fs::metadata(&self.wal_path)?;
        if meta.len() % PAGE_SIZE != 0 && meta.len() != 0 {
            // Non-page-aligned trailing bytes indicate a torn write from a
            // crash mid-append; recovery must run before further writes.
            return Err(StoreError::RecoveryRequired(format!(
                "wal file {} has non-page-aligned length {}",
                self.wal_path.display(),
                meta.len()
            )));
        }
        Ok(())
    }

    fn scan_last_sequence(&self) -> Result<u64> {
        let mut last = 0u64;
        for record in self.read_all()? {
            last = last.max(record.sequence);
        }
        Ok(last)
    }

    /// Append one mutation record, flushing per the configured durability
    /// level before returning.
    pub fn append(&mut self, collection: &str, key: &str, payload: Option<String>) -> Result<u64> {
        if self.state != JournalState::Ready {
            return Err(StoreError::internal(
                "Journal::append",
                format!("journal not ready, state={:?}", self.state),
            ));
        }

        let size = std::fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        if size >= self.max_size_bytes {
            return Err(StoreError::StorageFull(format!(
                "wal exceeds max size {} bytes",
                self.max_size_bytes
            )));
        }

        let sequence = self.next_sequence;
        let record = JournalRecord {
            collection: collection.to_string(),
            key: key.to_string(),
            payload,
            sequence,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().append(true).open(&self.wal_path)?;
        file.write_all(&line)?;
        match self.durability {
            DurabilityLevel::Full => file.sync_all()?,
            DurabilityLevel::Normal => file.sync_data()?,
        }

        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Read every record currently in the WAL, in append order.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in std::io::BufRead::lines(reader) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    /// Replay pending records into `apply`, then truncate the WAL.
    ///
    /// Retries `Passive` → `Restart` → `Truncate` with exponential backoff
    /// on a retriable failure, giving up after `max_attempts`.
    pub fn checkpoint(
        &mut self,
        mode: CheckpointMode,
        mut apply: impl FnMut(&JournalRecord) -> Result<()>,
    ) -> Result<CheckpointStats> {
        self.state = JournalState::Checkpointing;
        let size_before = std::fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);

        let modes = match mode {
            CheckpointMode::Passive => {
                vec![CheckpointMode::Passive, CheckpointMode::Restart, CheckpointMode::Truncate]
            }
            CheckpointMode::Restart => vec![CheckpointMode::Restart, CheckpointMode::Truncate],
            CheckpointMode::Truncate => vec![CheckpointMode::Truncate],
        };

        let mut delay = Duration::from_millis(50);
        let mut last_err = None;
        let mut attempts = 0u32;

        for attempt_mode in modes {
            attempts += 1;
            match self.try_checkpoint(attempt_mode, &mut apply) {
                Ok(()) => {
                    self.state = JournalState::Ready;
                    let size_after =
                        std::fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
                    return Ok(CheckpointStats {
                        size_before,
                        size_after,
                        mode: attempt_mode,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!(mode = ?attempt_mode, error = %e, "checkpoint attempt failed, retrying");
                    last_err = Some(e);
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }

        self.state = JournalState::Ready;
        let err = last_err.unwrap_or_else(|| StoreError::CheckpointFailed("no attempts made".into()));
        error!(error = %err, "checkpoint exhausted all modes");
        Err(StoreError::CheckpointFailed(err.to_string()))
    }

    fn try_checkpoint(
        &mut self,
        mode: CheckpointMode,
        apply: &mut impl FnMut(&JournalRecord) -> Result<()>,
    ) -> Result<()> {
        let records = self.read_all()?;
        for record in &records {
            apply(record)?;
        }
        match mode {
            CheckpointMode::Passive | CheckpointMode::Restart => {
                self.truncate_wal()?;
            }
            CheckpointMode::Truncate => {
                self.truncate_wal()?;
            }
        }
        self.write_marker(records.last().map(|r| r.sequence).unwrap_or(0))?;
        Ok(())
    }

    fn truncate_wal(&self) -> Result<()> {
        let file = OpenOptions::new().write(true).truncate(true).open(&self.wal_path)?;
        file.sync_all()?;
        Ok(())
    }

    fn write_marker(&self, last_checkpointed_sequence: u64) -> Result<()> {
        std::fs::write(&self.marker_path, last_checkpointed_sequence.to_string())?;
        Ok(())
    }

    /// Replay any records beyond the last checkpoint into `apply`. Called
    /// once at startup by [`crate::engine::Engine::open`].
    pub fn recover(&mut self, mut apply: impl FnMut(&JournalRecord) -> Result<()>) -> Result<usize> {
        let records = self.read_all()?;
        for record in &records {
            apply(record)?;
        }
        Ok(records.len())
    }

    pub fn len_bytes(&self) -> u64 {
        std::fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn close(&mut self) {
        self.state = JournalState::Closing;
        self.state = JournalState::Closed;
    }
}

/// Seek helper retained for page-aligned scanning use by future tooling;
/// currently exercised only by tests that assert alignment.
#[allow(dead_code)]
fn read_page(file: &mut File, page_index: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; PAGE_SIZE as usize];
    file.seek(SeekFrom::Start(page_index * PAGE_SIZE))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_all_roundtrips() {
        let dir = tempdir().unwrap();
        let mut journal = Journal::open(dir.path(), "test", DurabilityLevel::Normal).unwrap();
        journal.append("tasks", "a", Some("{}".into())).unwrap();
        journal.append("tasks", "b", None).unwrap();
        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "a");
        assert_eq!(records[1].payload, None);
    }

    #[test]
    fn checkpoint_applies_and_truncates() {
        let dir = tempdir().unwrap();
        let mut journal = Journal::open(dir.path(), "test", DurabilityLevel::Normal).unwrap();
        journal.append("tasks", "a", Some("{}".into())).unwrap();

        let mut applied = Vec::new();
        let stats = journal
            .checkpoint(CheckpointMode::Passive, |rec| {
                applied.push(rec.key.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(applied, vec!["a".to_string()]);
        assert!(stats.size_after <= stats.size_before);
        assert_eq!(journal.read_all().unwrap().len(), 0);
    }

    #[test]
    fn recover_replays_pending_records() {
        let dir = tempdir().unwrap();
        {
            let mut journal = Journal::open(dir.path(), "test", DurabilityLevel::Normal).unwrap();
            journal.append("tasks", "a", Some("{}".into())).unwrap();
        }
        let mut journal = Journal::open(dir.path(), "test", DurabilityLevel::Normal).unwrap();
        let mut replayed = 0;
        let count = journal
            .recover(|_rec| {
                replayed += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(replayed, 1);
    }

    #[test]
    fn sequence_numbers_continue_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut journal = Journal::open(dir.path(), "test", DurabilityLevel::Normal).unwrap();
            journal.append("tasks", "a", Some("{}".into())).unwrap();
        }
        let mut journal = Journal::open(dir.path(), "test", DurabilityLevel::Normal).unwrap();
        let seq = journal.append("tasks", "b", Some("{}".into())).unwrap();
        assert_eq!(seq, 2);
    }
}
