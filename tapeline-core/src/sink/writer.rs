//! Partitioned Data Sink
//!
//! Queue-fed consumer of unified events. Events accumulate into an
//! in-memory batch with a rolling memory estimate; the batch flushes when
//! it reaches `batch_size` events or `max_batch_memory` estimated bytes.
//!
//! Flush: stable-sort by timestamp, group by UTC hour partition
//! (`YYYY/MM/DD/HH`), and write each partition concurrently on the blocking
//! pool. Each file is written to `<name>.tmp` and atomically renamed, then
//! recorded in the manifest. Orphaned `.tmp` files from a crashed run are
//! deleted on construction.
//!
//! Shutdown is channel closure: the run loop drains the remaining batch
//! before returning.

use crate::core::{ErrorKind, Result, UnifiedEvent};
use crate::sink::manifest::{Manifest, ManifestEntry};
use crate::sink::schema::events_to_batch;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

const BYTES_PER_MIB: usize = 1024 * 1024;

/// Estimated Parquet size as a fraction of in-memory size under a fast
/// codec; tuned against typical market-data batches.
const COMPRESSED_SIZE_RATIO: f64 = 0.4;

const WRITE_RETRIES: u32 = 3;
const WRITE_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Sink configuration for one symbol's output tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub output_root: PathBuf,
    pub symbol: String,

    /// Flush after this many accumulated events.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush after this many estimated MiB in the batch.
    #[serde(default = "default_max_batch_memory_mb")]
    pub max_batch_memory_mb: usize,

    /// Roll to a suffixed file when a partition's current file would grow
    /// beyond this many MiB.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: usize,

    /// Parquet compression codec: "snappy", "zstd", or "none".
    #[serde(default = "default_compression")]
    pub compression_codec: String,

    /// Input queue capacity (backpressure bound).
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_batch_size() -> usize {
    5_000
}

fn default_max_batch_memory_mb() -> usize {
    500
}

fn default_max_file_size_mb() -> usize {
    400
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_queue_size() -> usize {
    5_000
}

impl SinkConfig {
    pub fn new(output_root: impl Into<PathBuf>, symbol: &str) -> Self {
        SinkConfig {
            output_root: output_root.into(),
            symbol: symbol.to_string(),
            batch_size: default_batch_size(),
            max_batch_memory_mb: default_max_batch_memory_mb(),
            max_file_size_mb: default_max_file_size_mb(),
            compression_codec: default_compression(),
            queue_size: default_queue_size(),
        }
    }

    fn compression(&self) -> Result<Compression> {
        match self.compression_codec.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Compression::SNAPPY),
            "zstd" => Ok(Compression::ZSTD(Default::default())),
            "none" | "uncompressed" => Ok(Compression::UNCOMPRESSED),
            other => Err(ErrorKind::MalformedInput(format!(
                "unknown compression codec {other:?}"
            ))),
        }
    }

    fn symbol_root(&self) -> PathBuf {
        self.output_root.join(&self.symbol)
    }
}

/// Sink accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStats {
    pub events_written: u64,
    pub files_written: u64,
    pub flushes: u64,
    pub orphans_removed: u64,
}

pub struct DataSink {
    config: SinkConfig,
    batch: Vec<UnifiedEvent>,
    batch_memory: usize,
    /// Bytes accumulated into the current file of each partition.
    partition_bytes: HashMap<String, u64>,
    /// Rollover suffix per partition (0 = unsuffixed file).
    partition_seq: HashMap<String, u32>,
    manifest: Manifest,
    compression: Compression,
    stats: SinkStats,
}

impl DataSink {
    /// Create the output tree, clean crash remnants, and open the manifest.
    pub fn new(config: SinkConfig) -> Result<Self> {
        let symbol_root = config.symbol_root();
        fs::create_dir_all(&symbol_root)?;
        let orphans = remove_orphan_tmp_files(&symbol_root)?;
        if orphans > 0 {
            tracing::warn!(orphans, root = %symbol_root.display(), "removed orphaned .tmp files");
        }

        let manifest = Manifest::open(&symbol_root)?;
        let compression = config.compression()?;

        Ok(DataSink {
            config,
            batch: Vec::new(),
            batch_memory: 0,
            partition_bytes: HashMap::new(),
            partition_seq: HashMap::new(),
            manifest,
            compression,
            stats: SinkStats {
                orphans_removed: orphans,
                ..SinkStats::default()
            },
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Consume events until the channel closes, then drain and return the
    /// final statistics.
    pub async fn run(mut self, mut rx: mpsc::Receiver<UnifiedEvent>) -> Result<SinkStats> {
        tracing::info!(symbol = %self.config.symbol, "data sink started");
        while let Some(event) = rx.recv().await {
            self.push(event);
            if self.should_flush() {
                self.flush().await?;
            }
        }
        self.flush().await?;
        tracing::info!(
            symbol = %self.config.symbol,
            events = self.stats.events_written,
            files = self.stats.files_written,
            "data sink drained and stopped"
        );
        Ok(self.stats)
    }

    /// Append one event to the in-memory batch.
    pub fn push(&mut self, event: UnifiedEvent) {
        self.batch_memory += estimate_event_memory(&event);
        self.batch.push(event);
    }

    pub fn should_flush(&self) -> bool {
        self.batch.len() >= self.config.batch_size
            || self.batch_memory >= self.config.max_batch_memory_mb * BYTES_PER_MIB
    }

    /// Write the current batch out, partitioned by hour.
    pub async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        if self.batch_memory >= self.config.max_batch_memory_mb * BYTES_PER_MIB {
            tracing::warn!(
                estimated_mb = self.batch_memory / BYTES_PER_MIB,
                "flushing batch on memory limit"
            );
        }

        let mut batch = std::mem::take(&mut self.batch);
        self.batch_memory = 0;
        // Stable sort; equal timestamps keep replay order.
        batch.sort_by_key(|e| e.event_timestamp);

        let mut partitions: BTreeMap<String, Vec<UnifiedEvent>> = BTreeMap::new();
        for event in batch {
            partitions
                .entry(hour_partition_key(event.event_timestamp))
                .or_default()
                .push(event);
        }

        // Plan every file (sequential: rollover bookkeeping), then write all
        // partitions concurrently on the blocking pool.
        let mut writes = Vec::with_capacity(partitions.len());
        for (key, events) in partitions {
            let plan = self.plan_partition_file(&key, &events)?;
            let compression = self.compression;
            let handle = tokio::task::spawn_blocking(move || -> Result<WrittenFile> {
                write_partition_file(&plan, &events, compression)
            });
            writes.push(handle);
        }

        for handle in writes {
            let written = handle
                .await
                .map_err(|e| ErrorKind::WorkerCrash(format!("sink write task: {e}")))??;
            *self
                .partition_bytes
                .entry(written.partition_key.clone())
                .or_insert(0) += written.file_size_bytes;
            self.manifest.append(&written.entry)?;
            self.stats.events_written += written.entry.row_count;
            self.stats.files_written += 1;
            tracing::debug!(
                file = %written.entry.file_name,
                rows = written.entry.row_count,
                bytes = written.file_size_bytes,
                "wrote partition file"
            );
        }
        self.stats.flushes += 1;
        Ok(())
    }

    /// Decide file name (with rollover suffix) and paths for one partition's
    /// slice of the batch.
    fn plan_partition_file(&mut self, key: &str, events: &[UnifiedEvent]) -> Result<FilePlan> {
        let partition_dir = self.config.symbol_root().join(key);
        fs::create_dir_all(&partition_dir)?;

        let estimated = (events.iter().map(estimate_event_memory).sum::<usize>() as f64
            * COMPRESSED_SIZE_RATIO) as u64;
        let max_bytes = (self.config.max_file_size_mb * BYTES_PER_MIB) as u64;
        let current = self.partition_bytes.get(key).copied().unwrap_or(0);

        let seq = if current > 0 && current + estimated > max_bytes {
            let next = self.partition_seq.get(key).copied().unwrap_or(0) + 1;
            self.partition_seq.insert(key.to_string(), next);
            self.partition_bytes.insert(key.to_string(), 0);
            tracing::info!(
                partition = key,
                current_bytes = current,
                estimated,
                file_seq = next,
                "partition file would exceed size limit, rolling over"
            );
            next
        } else {
            self.partition_seq.get(key).copied().unwrap_or(0)
        };

        let min_timestamp = events.first().map(|e| e.event_timestamp).unwrap_or(0);
        let file_name = if seq > 0 {
            format!("events_{min_timestamp}_{seq:03}.parquet")
        } else {
            format!("events_{min_timestamp}.parquet")
        };

        Ok(FilePlan {
            partition_key: key.to_string(),
            partition_path: format!("{}/{}", self.config.symbol, key),
            final_path: partition_dir.join(&file_name),
            file_name,
        })
    }
}

#[derive(Debug, Clone)]
struct FilePlan {
    partition_key: String,
    partition_path: String,
    file_name: String,
    final_path: PathBuf,
}

#[derive(Debug)]
struct WrittenFile {
    partition_key: String,
    file_size_bytes: u64,
    entry: ManifestEntry,
}

/// UTC hour partition key `YYYY/MM/DD/HH` from a nanosecond timestamp.
pub fn hour_partition_key(timestamp_ns: i64) -> String {
    let secs = timestamp_ns.div_euclid(1_000_000_000);
    let nanos = timestamp_ns.rem_euclid(1_000_000_000) as u32;
    let dt = Utc
        .timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
    format!(
        "{:04}/{:02}/{:02}/{:02}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour()
    )
}

/// Blocking write of one partition file: tmp, fsync, atomic rename. The
/// rename is retried with backoff; the tmp file is removed on failure.
fn write_partition_file(
    plan: &FilePlan,
    events: &[UnifiedEvent],
    compression: Compression,
) -> Result<WrittenFile> {
    let tmp_path = plan.final_path.with_extension("tmp");
    let props = WriterProperties::builder()
        .set_compression(compression)
        // Dictionary encoding is disabled so decimal columns keep their
        // plain fixed-width representation.
        .set_dictionary_enabled(false)
        .build();

    let result = (|| -> Result<u64> {
        let batch = events_to_batch(events)?;
        let file = fs::File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        let file = writer.into_inner()?;
        file.sync_all()?;

        retry_io("rename partition file", || {
            fs::rename(&tmp_path, &plan.final_path)
        })?;
        Ok(fs::metadata(&plan.final_path)?.len())
    })();

    let file_size_bytes = match result {
        Ok(size) => size,
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            tracing::error!(path = %plan.final_path.display(), %err, "partition write failed");
            return Err(err);
        }
    };

    let mut event_types: Vec<String> = events
        .iter()
        .map(|e| e.event_type.as_str().to_string())
        .collect();
    event_types.sort();
    event_types.dedup();

    Ok(WrittenFile {
        partition_key: plan.partition_key.clone(),
        file_size_bytes,
        entry: ManifestEntry {
            partition_path: plan.partition_path.clone(),
            file_name: plan.file_name.clone(),
            row_count: events.len() as u64,
            file_size_bytes,
            timestamp_min: events.first().map(|e| e.event_timestamp).unwrap_or(0),
            timestamp_max: events.last().map(|e| e.event_timestamp).unwrap_or(0),
            event_types,
            write_timestamp: Utc::now().to_rfc3339(),
        },
    })
}

fn retry_io<T>(what: &str, mut op: impl FnMut() -> std::io::Result<T>) -> Result<T> {
    let mut delay = WRITE_RETRY_BASE_DELAY;
    let mut last_err = None;
    for attempt in 0..WRITE_RETRIES {
        match op() {
            Ok(v) => return Ok(v),
            Err(err) => {
                tracing::warn!(what, attempt, %err, "transient I/O failure, retrying");
                last_err = Some(err);
                std::thread::sleep(delay);
                delay *= 2;
            }
        }
    }
    Err(ErrorKind::TransientIo(last_err.expect("at least one attempt")))
}

/// Rough per-event heap usage, used for the batch memory bound and the
/// pre-write size estimate.
pub fn estimate_event_memory(event: &UnifiedEvent) -> usize {
    let mut bytes = std::mem::size_of::<UnifiedEvent>();
    for side in [&event.bids, &event.asks] {
        if let Some(levels) = side {
            bytes += 48 + levels.len() * 64;
        }
    }
    bytes
}

/// Delete every `*.tmp` under the tree (crash remnants).
fn remove_orphan_tmp_files(root: &Path) -> Result<u64> {
    fn walk(dir: &Path, removed: &mut u64) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                walk(&path, removed)?;
            } else if path.extension().is_some_and(|e| e == "tmp") {
                fs::remove_file(&path)?;
                *removed += 1;
            }
        }
        Ok(())
    }
    let mut removed = 0;
    if root.exists() {
        walk(root, &mut removed)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_partition_key() {
        // 2024-01-01T12:59:59.999 UTC
        assert_eq!(hour_partition_key(1_704_113_999_999_000_000), "2024/01/01/12");
        // 2024-01-01T13:00:00.000 UTC
        assert_eq!(hour_partition_key(1_704_114_000_000_000_000), "2024/01/01/13");
    }

    #[test]
    fn test_compression_codecs() {
        let mut config = SinkConfig::new("/tmp/out", "BTCUSDT");
        assert!(config.compression().is_ok());
        config.compression_codec = "none".into();
        assert_eq!(config.compression().unwrap(), Compression::UNCOMPRESSED);
        config.compression_codec = "lz9".into();
        assert!(config.compression().is_err());
    }

    #[test]
    fn test_memory_estimate_scales_with_levels() {
        let dec = |s: &str| s.parse().unwrap();
        let small = UnifiedEvent::delta(0, Some(1), crate::core::BookSide::Bid, dec("1"), dec("1"));
        let big = UnifiedEvent::snapshot(
            0,
            Some(1),
            vec![(dec("1"), dec("1")); 100],
            vec![(dec("2"), dec("1")); 100],
        );
        assert!(estimate_event_memory(&big) > estimate_event_memory(&small) * 10);
    }
}
