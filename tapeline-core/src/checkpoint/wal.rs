//! Checkpoint Write-Ahead Log
//!
//! One JSON line per durable checkpoint: `(update_id, file_name, wall_ms)`,
//! appended and fsynced after the checkpoint file's atomic rename. Recovery
//! reads the last parseable line to find the newest committed checkpoint;
//! a torn final line (crash mid-append) falls back to the previous one.

use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const WAL_DIR: &str = "wal";

/// One committed checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub update_id: u64,
    pub file_name: String,
    pub wall_ms: i64,
}

#[derive(Debug)]
pub struct CheckpointWal {
    path: PathBuf,
}

impl CheckpointWal {
    /// Open (creating directories as needed) the WAL for one symbol.
    pub fn open(checkpoint_dir: &Path, symbol: &str) -> Result<Self> {
        let dir = checkpoint_dir.join(WAL_DIR);
        fs::create_dir_all(&dir)?;
        Ok(CheckpointWal {
            path: dir.join(format!("{symbol}.wal")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a commit record and flush it to disk.
    pub fn commit(&self, entry: &WalEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// All parseable commit records in append order.
    pub fn entries(&self) -> Result<Vec<WalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(%err, "skipping unreadable WAL line");
                }
            }
        }
        Ok(entries)
    }

    /// The newest committed checkpoint, if any.
    pub fn last_entry(&self) -> Result<Option<WalEntry>> {
        Ok(self.entries()?.into_iter().last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let wal = CheckpointWal::open(dir.path(), "BTCUSDT").unwrap();

        wal.commit(&WalEntry {
            update_id: 100,
            file_name: "BTCUSDT_100_1.ckpt".into(),
            wall_ms: 1,
        })
        .unwrap();
        wal.commit(&WalEntry {
            update_id: 200,
            file_name: "BTCUSDT_200_2.ckpt".into(),
            wall_ms: 2,
        })
        .unwrap();

        assert_eq!(wal.entries().unwrap().len(), 2);
        assert_eq!(wal.last_entry().unwrap().unwrap().update_id, 200);
    }

    #[test]
    fn test_torn_tail_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let wal = CheckpointWal::open(dir.path(), "BTCUSDT").unwrap();
        wal.commit(&WalEntry {
            update_id: 100,
            file_name: "a.ckpt".into(),
            wall_ms: 1,
        })
        .unwrap();

        let mut file = OpenOptions::new().append(true).open(wal.path()).unwrap();
        write!(file, "{{\"update_id\": 2").unwrap();
        drop(file);

        assert_eq!(wal.last_entry().unwrap().unwrap().update_id, 100);
    }

    #[test]
    fn test_empty_wal() {
        let dir = tempfile::tempdir().unwrap();
        let wal = CheckpointWal::open(dir.path(), "BTCUSDT").unwrap();
        assert!(wal.last_entry().unwrap().is_none());
    }
}
