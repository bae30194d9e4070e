//! Checkpoint State
//!
//! The serializable image of one worker's pipeline state, and the provider
//! seam the checkpoint manager captures it through. Capture copies the
//! small in-memory ladders and cursors (top regions are at most K entries a
//! side) so it stays well under the 1% hot-path budget.

use crate::orderbook::BookImage;
use crate::replay::drift::DriftSummary;
use crate::replay::sequencer::SequencerStats;
use serde::{Deserialize, Serialize};

/// Bumped whenever the checkpoint layout changes incompatibly. Readers
/// skip files with versions they do not understand.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Full pipeline state for one symbol at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub symbol: String,
    pub schema_version: u32,
    pub last_update_id: u64,
    pub events_processed: u64,
    pub book: BookImage,
    pub gap_stats: SequencerStats,
    pub drift_summary: DriftSummary,
    /// Input file being consumed when the state was captured, if any.
    pub current_file: Option<String>,
    /// Resume offset within `current_file` (records consumed).
    pub file_offset: u64,
    pub snapshot_count: u64,
    /// Capture wall time, milliseconds UTC.
    pub wall_ms: i64,
}

impl CheckpointState {
    /// Structural validity: the checks recovery applies before trusting a
    /// loaded checkpoint.
    pub fn is_valid(&self) -> bool {
        self.schema_version == CHECKPOINT_SCHEMA_VERSION
            && !self.symbol.is_empty()
            && self.book.symbol == self.symbol
    }
}

/// Seam through which the checkpoint manager obtains a consistent state
/// image without knowing the pipeline's internals.
pub trait StateProvider {
    fn capture(&self) -> CheckpointState;
}
