//! Recovery Manager
//!
//! On worker start, finds the newest durable checkpoint — WAL first, file
//! scan as fallback — validates it, and hands back the state to resume
//! from. Invalid or corrupt files are skipped in favor of the previous one.
//!
//! Continuity of the first live event against the recovered cursor:
//! - `first <= last`: duplicate region, drop until past the cursor;
//! - `first == last + 1`: perfect resume;
//! - gap within the threshold: accept, record in gap stats;
//! - gap beyond the threshold: AWAITING_RESYNC until the next snapshot.

use crate::checkpoint::manager::{load_checkpoint, CheckpointManager, CHECKPOINT_EXT};
use crate::checkpoint::state::CheckpointState;
use crate::checkpoint::wal::CheckpointWal;
use crate::core::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Continuity classification of the first post-recovery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// `update_id` at or below the checkpoint cursor; drop as duplicate.
    Duplicate,
    /// Exactly the next update.
    PerfectResume,
    /// Tolerated gap of the given size.
    SmallGap(u64),
    /// Gap beyond the threshold; queue deltas until the next snapshot.
    ResyncRequired(u64),
}

/// A successfully recovered checkpoint.
#[derive(Debug, Clone)]
pub struct RecoveredState {
    pub state: CheckpointState,
    pub path: PathBuf,
}

impl RecoveredState {
    /// `(current_file, file_offset, last_update_id)` to resume reading at.
    pub fn resume_position(&self) -> (Option<&str>, u64, u64) {
        (
            self.state.current_file.as_deref(),
            self.state.file_offset,
            self.state.last_update_id,
        )
    }
}

#[derive(Debug)]
pub struct RecoveryManager {
    checkpoint_dir: PathBuf,
    symbol: String,
    gap_threshold: u64,
}

impl RecoveryManager {
    pub fn new(checkpoint_dir: &Path, symbol: &str, gap_threshold: u64) -> Self {
        RecoveryManager {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            symbol: symbol.to_string(),
            gap_threshold,
        }
    }

    /// Load the newest valid checkpoint, or `None` for a cold start.
    pub fn attempt_recovery(&self) -> Result<Option<RecoveredState>> {
        // WAL first: it records exactly which file was committed last.
        if let Some(recovered) = self.recover_via_wal()? {
            return Ok(Some(recovered));
        }
        // Fallback: newest file by embedded wall time, skipping invalid ones.
        self.recover_via_scan()
    }

    fn recover_via_wal(&self) -> Result<Option<RecoveredState>> {
        let wal = CheckpointWal::open(&self.checkpoint_dir, &self.symbol)?;
        let mut entries = wal.entries()?;
        while let Some(entry) = entries.pop() {
            let path = self.checkpoint_dir.join(&entry.file_name);
            if !path.exists() {
                tracing::warn!(file = %entry.file_name, "WAL references missing checkpoint, trying previous");
                continue;
            }
            match load_checkpoint(&path) {
                Ok(state) => {
                    tracing::info!(
                        symbol = %self.symbol,
                        update_id = state.last_update_id,
                        events = state.events_processed,
                        path = %path.display(),
                        "recovered from checkpoint via WAL"
                    );
                    return Ok(Some(RecoveredState { state, path }));
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "checkpoint invalid, trying previous");
                }
            }
        }
        Ok(None)
    }

    fn recover_via_scan(&self) -> Result<Option<RecoveredState>> {
        if !self.checkpoint_dir.exists() {
            tracing::info!(symbol = %self.symbol, "no checkpoint directory, cold start");
            return Ok(None);
        }
        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.checkpoint_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().is_some_and(|e| e == CHECKPOINT_EXT)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&format!("{}_", self.symbol)))
            })
            .collect();
        // Newest first: file names embed the wall-clock millisecond, and
        // mtime breaks ties for hand-copied files.
        candidates.sort_by_key(|p| {
            std::cmp::Reverse(
                fs::metadata(p)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(|t| t.duration_since(std::time::UNIX_EPOCH).unwrap_or_default()),
            )
        });

        for path in candidates {
            match load_checkpoint(&path) {
                Ok(state) => {
                    tracing::info!(
                        symbol = %self.symbol,
                        update_id = state.last_update_id,
                        path = %path.display(),
                        "recovered from checkpoint via directory scan"
                    );
                    return Ok(Some(RecoveredState { state, path }));
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping invalid checkpoint");
                }
            }
        }
        tracing::info!(symbol = %self.symbol, "no valid checkpoint found, cold start");
        Ok(None)
    }

    /// Classify the first live event after recovery.
    pub fn validate_continuity(&self, last_update_id: u64, first_update_id: u64) -> Continuity {
        if first_update_id <= last_update_id {
            return Continuity::Duplicate;
        }
        let gap = first_update_id - last_update_id - 1;
        if gap == 0 {
            Continuity::PerfectResume
        } else if gap <= self.gap_threshold {
            Continuity::SmallGap(gap)
        } else {
            Continuity::ResyncRequired(gap)
        }
    }

    /// Find the newest checkpoint at or below a target update_id (targeted
    /// rewind for replay-from-position).
    pub fn recover_at_update_id(&self, target: u64) -> Result<Option<RecoveredState>> {
        let manager = CheckpointManager::new(
            &self.checkpoint_dir,
            &self.symbol,
            Default::default(),
        )?;
        let mut best: Option<RecoveredState> = None;
        for path in manager.list_checkpoints()? {
            match load_checkpoint(&path) {
                Ok(state) if state.last_update_id <= target => {
                    let better = best
                        .as_ref()
                        .map(|b| state.last_update_id > b.state.last_update_id)
                        .unwrap_or(true);
                    if better {
                        best = Some(RecoveredState { state, path });
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping invalid checkpoint");
                }
            }
        }
        Ok(best)
    }
}
