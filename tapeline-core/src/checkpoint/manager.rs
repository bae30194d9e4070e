//! Checkpoint Manager
//!
//! Periodically persists the pipeline state captured through the
//! `StateProvider` seam. A checkpoint fires when any trigger does: the time
//! trigger (default 300 s), the event-count trigger (default one million
//! events), or a manual request from the supervisor.
//!
//! On-disk format: a JSON envelope `{schema_version, checksum, payload}`
//! where `checksum` is the CRC32 of the serialized payload. Files are
//! written `<SYMBOL>_<update_id>_<wallms>.tmp`, fsynced, then atomically
//! renamed to `.ckpt`; the commit is then recorded in the WAL. The
//! checkpoint directory is 0700 and files are 0600. Retention keeps the
//! newest `max_checkpoints` files.

use crate::checkpoint::state::{CheckpointState, StateProvider, CHECKPOINT_SCHEMA_VERSION};
use crate::checkpoint::wal::{CheckpointWal, WalEntry};
use crate::core::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// File extension of committed checkpoints.
pub const CHECKPOINT_EXT: &str = "ckpt";

/// Envelope wrapping the checkpoint payload with integrity metadata.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    pub schema_version: u32,
    /// CRC32 of the JSON-serialized payload.
    pub checksum: u32,
    pub payload: CheckpointState,
}

/// Checkpoint cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Seconds between time-triggered checkpoints.
    #[serde(default = "default_time_interval_secs")]
    pub time_interval_secs: u64,

    /// Events between count-triggered checkpoints.
    #[serde(default = "default_event_interval")]
    pub event_interval: u64,

    /// Checkpoint files retained per symbol.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
}

fn default_time_interval_secs() -> u64 {
    300
}

fn default_event_interval() -> u64 {
    1_000_000
}

fn default_max_checkpoints() -> usize {
    3
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            time_interval_secs: default_time_interval_secs(),
            event_interval: default_event_interval(),
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

/// A condition under which a checkpoint fires.
pub trait CheckpointTrigger {
    fn should_fire(&mut self, events_processed: u64, now: Instant) -> bool;
}

/// Fires every `interval` of wall time.
#[derive(Debug)]
pub struct TimeTrigger {
    interval: Duration,
    last_fired: Instant,
}

impl TimeTrigger {
    pub fn new(interval: Duration) -> Self {
        TimeTrigger {
            interval,
            last_fired: Instant::now(),
        }
    }
}

impl CheckpointTrigger for TimeTrigger {
    fn should_fire(&mut self, _events_processed: u64, now: Instant) -> bool {
        if now.duration_since(self.last_fired) >= self.interval {
            self.last_fired = now;
            true
        } else {
            false
        }
    }
}

/// Fires every `interval` processed events.
#[derive(Debug)]
pub struct EventCountTrigger {
    interval: u64,
    last_fired_at: u64,
}

impl EventCountTrigger {
    pub fn new(interval: u64) -> Self {
        EventCountTrigger {
            interval: interval.max(1),
            last_fired_at: 0,
        }
    }
}

impl CheckpointTrigger for EventCountTrigger {
    fn should_fire(&mut self, events_processed: u64, _now: Instant) -> bool {
        if events_processed >= self.last_fired_at + self.interval {
            self.last_fired_at = events_processed;
            true
        } else {
            false
        }
    }
}

pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    symbol: String,
    config: CheckpointConfig,
    wal: CheckpointWal,
    time_trigger: TimeTrigger,
    count_trigger: EventCountTrigger,
    checkpoints_written: u64,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: &Path, symbol: &str, config: CheckpointConfig) -> Result<Self> {
        fs::create_dir_all(checkpoint_dir)?;
        restrict_dir_permissions(checkpoint_dir)?;
        let wal = CheckpointWal::open(checkpoint_dir, symbol)?;
        Ok(CheckpointManager {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            symbol: symbol.to_string(),
            time_trigger: TimeTrigger::new(Duration::from_secs(config.time_interval_secs)),
            count_trigger: EventCountTrigger::new(config.event_interval),
            config,
            wal,
            checkpoints_written: 0,
        })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn wal(&self) -> &CheckpointWal {
        &self.wal
    }

    pub fn checkpoints_written(&self) -> u64 {
        self.checkpoints_written
    }

    /// Checkpoint if any trigger fires; returns the written path if one did.
    pub fn maybe_checkpoint(&mut self, provider: &dyn StateProvider) -> Result<Option<PathBuf>> {
        let state = provider.capture();
        let now = Instant::now();
        let fire = self.time_trigger.should_fire(state.events_processed, now)
            | self.count_trigger.should_fire(state.events_processed, now);
        if !fire {
            return Ok(None);
        }
        self.checkpoint_now(&state).map(Some)
    }

    /// Unconditional (manual-trigger) checkpoint.
    pub fn checkpoint(&mut self, provider: &dyn StateProvider) -> Result<PathBuf> {
        let state = provider.capture();
        self.checkpoint_now(&state)
    }

    fn checkpoint_now(&mut self, state: &CheckpointState) -> Result<PathBuf> {
        let payload = serde_json::to_vec(state)?;
        let envelope = CheckpointEnvelope {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            checksum: crc32fast::hash(&payload),
            payload: state.clone(),
        };

        let file_name = format!(
            "{}_{}_{}.{}",
            self.symbol, state.last_update_id, state.wall_ms, CHECKPOINT_EXT
        );
        let final_path = self.checkpoint_dir.join(&file_name);
        let tmp_path = final_path.with_extension("tmp");

        let result = (|| -> Result<()> {
            fs::write(&tmp_path, serde_json::to_vec(&envelope)?)?;
            restrict_file_permissions(&tmp_path)?;
            let file = fs::File::open(&tmp_path)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        self.wal.commit(&WalEntry {
            update_id: state.last_update_id,
            file_name,
            wall_ms: state.wall_ms,
        })?;

        self.checkpoints_written += 1;
        self.retain_newest()?;
        tracing::info!(
            symbol = %self.symbol,
            update_id = state.last_update_id,
            events = state.events_processed,
            path = %final_path.display(),
            "checkpoint written"
        );
        Ok(final_path)
    }

    /// List checkpoint files for this symbol, newest first by file name
    /// (names embed the wall-clock millisecond).
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.checkpoint_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == CHECKPOINT_EXT)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&format!("{}_", self.symbol)))
            {
                files.push(path);
            }
        }
        files.sort_by(|a, b| {
            checkpoint_sort_key(b)
                .cmp(&checkpoint_sort_key(a))
                .then_with(|| b.cmp(a))
        });
        Ok(files)
    }

    fn retain_newest(&self) -> Result<()> {
        let files = self.list_checkpoints()?;
        for stale in files.iter().skip(self.config.max_checkpoints) {
            if let Err(err) = fs::remove_file(stale) {
                tracing::warn!(path = %stale.display(), %err, "failed to remove old checkpoint");
            } else {
                tracing::debug!(path = %stale.display(), "removed old checkpoint");
            }
        }
        Ok(())
    }
}

/// Load and verify one checkpoint file: version understood, checksum
/// matches, payload structurally valid.
pub fn load_checkpoint(path: &Path) -> Result<CheckpointState> {
    let bytes = fs::read(path)?;
    let envelope: CheckpointEnvelope = serde_json::from_slice(&bytes)
        .map_err(|e| ErrorKind::CorruptCheckpoint(format!("{}: {e}", path.display())))?;

    if envelope.schema_version != CHECKPOINT_SCHEMA_VERSION {
        return Err(ErrorKind::CorruptCheckpoint(format!(
            "{}: unknown schema version {}",
            path.display(),
            envelope.schema_version
        )));
    }
    let payload = serde_json::to_vec(&envelope.payload)?;
    let checksum = crc32fast::hash(&payload);
    if checksum != envelope.checksum {
        return Err(ErrorKind::CorruptCheckpoint(format!(
            "{}: checksum mismatch (stored {:#010x}, computed {:#010x})",
            path.display(),
            envelope.checksum,
            checksum
        )));
    }
    if !envelope.payload.is_valid() {
        return Err(ErrorKind::CorruptCheckpoint(format!(
            "{}: payload failed validation",
            path.display()
        )));
    }
    Ok(envelope.payload)
}

/// `(wall_ms, update_id)` parsed from `<SYMBOL>_<update_id>_<wallms>.ckpt`.
fn checkpoint_sort_key(path: &Path) -> (i64, u64) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let mut parts = stem.rsplit('_');
    let wall_ms = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let update_id = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (wall_ms, update_id)
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
