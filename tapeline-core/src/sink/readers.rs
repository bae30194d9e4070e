//! Input Readers
//!
//! Batch readers for the two input shapes the pipeline consumes:
//! line-delimited JSON capture files (raw records for the normalizer) and
//! Parquet files of unified events (also the read side of the round-trip
//! property: whatever the sink wrote must restore exactly).

use crate::core::{Result, UnifiedEvent};
use crate::replay::normalizer::RawRecord;
use crate::sink::schema::batch_to_events;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Read raw records from a JSONL capture file. Unparseable lines are
/// skipped with a warning; they are the capture-file form of malformed
/// input and must not abort the batch.
pub fn read_jsonl_records(path: &Path) -> Result<Vec<RawRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                skipped += 1;
                tracing::warn!(path = %path.display(), lineno, %err, "skipping unparseable capture line");
            }
        }
    }
    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "capture file had unparseable lines");
    }
    Ok(records)
}

/// Read all unified events from one Parquet file.
pub fn read_events_parquet(path: &Path) -> Result<Vec<UnifiedEvent>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut events = Vec::new();
    for batch in reader {
        events.extend(batch_to_events(&batch?)?);
    }
    Ok(events)
}

/// Every `.parquet` event file under one symbol's partition tree, sorted by
/// path (which sorts chronologically given the `YYYY/MM/DD/HH` layout).
/// Manifest and checkpoint subtrees are not event partitions and are
/// skipped.
pub fn list_partition_files(output_root: &Path, symbol: &str) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if name == crate::sink::manifest::MANIFEST_DIR || name == "checkpoints" {
                    continue;
                }
                walk(&path, files)?;
            } else if path.extension().is_some_and(|e| e == "parquet") {
                files.push(path);
            }
        }
        Ok(())
    }

    let root = output_root.join(symbol);
    let mut files = Vec::new();
    if root.exists() {
        walk(&root, &mut files)?;
    }
    files.sort();
    Ok(files)
}
