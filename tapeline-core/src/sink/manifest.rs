//! Partition Manifest
//!
//! Append-only JSON-lines index of every file the sink writes, one entry
//! per file, flushed on append. The read path returns entries ordered by
//! write timestamp; statistics are derived on demand.

use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_DIR: &str = "_manifest";
pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// One written partition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Partition subtree relative to the output root, e.g.
    /// `BTCUSDT/2024/01/01/12`.
    pub partition_path: String,
    pub file_name: String,
    pub row_count: u64,
    pub file_size_bytes: u64,
    pub timestamp_min: i64,
    pub timestamp_max: i64,
    /// Event types present in the file, sorted.
    pub event_types: Vec<String>,
    /// RFC 3339 wall-clock write time.
    pub write_timestamp: String,
}

/// Statistics derived from the full entry list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestStats {
    pub total_files: u64,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub earliest_timestamp: Option<i64>,
    pub latest_timestamp: Option<i64>,
    pub event_types: BTreeSet<String>,
}

#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
}

impl Manifest {
    /// Open (creating directories as needed) the manifest for one symbol's
    /// output tree.
    pub fn open(symbol_root: &Path) -> Result<Self> {
        let dir = symbol_root.join(MANIFEST_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Manifest {
            path: dir.join(MANIFEST_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush it to disk.
    pub fn append(&self, entry: &ManifestEntry) -> Result<()> {
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

    /// All entries, ordered by write timestamp. Unparseable lines (torn
    /// writes from a crash) are skipped with a warning.
    pub fn read_entries(&self) -> Result<Vec<ManifestEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ManifestEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(lineno, %err, "skipping unreadable manifest line");
                }
            }
        }
        entries.sort_by(|a, b| a.write_timestamp.cmp(&b.write_timestamp));
        Ok(entries)
    }

    /// Derived statistics over all entries.
    pub fn statistics(&self) -> Result<ManifestStats> {
        let entries = self.read_entries()?;
        let mut stats = ManifestStats::default();
        for entry in &entries {
            stats.total_files += 1;
            stats.total_rows += entry.row_count;
            stats.total_bytes += entry.file_size_bytes;
            stats.earliest_timestamp = Some(match stats.earliest_timestamp {
                Some(t) => t.min(entry.timestamp_min),
                None => entry.timestamp_min,
            });
            stats.latest_timestamp = Some(match stats.latest_timestamp {
                Some(t) => t.max(entry.timestamp_max),
                None => entry.timestamp_max,
            });
            stats.event_types.extend(entry.event_types.iter().cloned());
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file_name: &str, ts_min: i64, ts_max: i64, written_at: &str) -> ManifestEntry {
        ManifestEntry {
            partition_path: "BTCUSDT/2024/01/01/12".into(),
            file_name: file_name.into(),
            row_count: 10,
            file_size_bytes: 1_024,
            timestamp_min: ts_min,
            timestamp_max: ts_max,
            event_types: vec!["TRADE".into()],
            write_timestamp: written_at.into(),
        }
    }

    #[test]
    fn test_append_and_read_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();

        manifest
            .append(&entry("b.parquet", 5, 9, "2024-01-01T00:00:02Z"))
            .unwrap();
        manifest
            .append(&entry("a.parquet", 1, 4, "2024-01-01T00:00:01Z"))
            .unwrap();

        let entries = manifest.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "a.parquet");
        assert_eq!(entries[1].file_name, "b.parquet");
    }

    #[test]
    fn test_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        manifest
            .append(&entry("a.parquet", 100, 200, "2024-01-01T00:00:01Z"))
            .unwrap();
        let mut second = entry("b.parquet", 50, 120, "2024-01-01T00:00:02Z");
        second.event_types = vec!["BOOK_DELTA".into()];
        manifest.append(&second).unwrap();

        let stats = manifest.statistics().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_rows, 20);
        assert_eq!(stats.earliest_timestamp, Some(50));
        assert_eq!(stats.latest_timestamp, Some(200));
        assert_eq!(stats.event_types.len(), 2);
    }

    #[test]
    fn test_torn_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        manifest
            .append(&entry("a.parquet", 1, 2, "2024-01-01T00:00:01Z"))
            .unwrap();
        // Simulate a torn write
        let mut file = OpenOptions::new()
            .append(true)
            .open(manifest.path())
            .unwrap();
        write!(file, "{{\"partition_path\": \"BTC").unwrap();
        drop(file);

        let entries = manifest.read_entries().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_missing_manifest_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        assert!(manifest.read_entries().unwrap().is_empty());
        assert_eq!(manifest.statistics().unwrap().total_files, 0);
    }
}
