//! Chronological replay: sequencing, drift tracking, normalization, and the
//! stateful replayer itself.

pub mod drift;
pub mod normalizer;
pub mod replayer;
pub mod sequencer;

pub use drift::{DriftSummary, DriftTracker, DEFAULT_DRIFT_THRESHOLD};
pub use normalizer::{RawRecord, SchemaNormalizer, DEFAULT_PENDING_QUEUE};
pub use replayer::{BookSyncState, ChronologicalReplayer, ReplayerStats};
pub use sequencer::{DeltaSequencer, SequenceOutcome, SequencerStats, DEFAULT_GAP_THRESHOLD};

use serde::{Deserialize, Serialize};

/// Tunables for one symbol's replayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// K: top-region levels per side.
    #[serde(default = "default_max_book_levels")]
    pub max_book_levels: usize,

    /// Hard ceiling on deep-region entries per side.
    #[serde(default = "default_deep_ladder_ceiling")]
    pub deep_ladder_ceiling: usize,

    /// RMS error above which a snapshot triggers resync.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Whether a drift breach actually reloads the book.
    #[serde(default = "default_true")]
    pub resync_on_drift: bool,

    /// Delta gap size beyond which the book awaits a snapshot.
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: u64,

    /// Bound on deltas parked while awaiting a snapshot.
    #[serde(default = "default_pending_queue_size")]
    pub pending_queue_size: usize,

    /// Bound on retained drift metrics.
    #[serde(default = "default_drift_history_size")]
    pub drift_history_size: usize,
}

fn default_max_book_levels() -> usize {
    crate::orderbook::DEFAULT_MAX_LEVELS
}

fn default_deep_ladder_ceiling() -> usize {
    crate::orderbook::DEFAULT_DEEP_CEILING
}

fn default_drift_threshold() -> f64 {
    DEFAULT_DRIFT_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn default_gap_threshold() -> u64 {
    DEFAULT_GAP_THRESHOLD
}

fn default_pending_queue_size() -> usize {
    DEFAULT_PENDING_QUEUE
}

fn default_drift_history_size() -> usize {
    drift::DEFAULT_HISTORY
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            max_book_levels: default_max_book_levels(),
            deep_ladder_ceiling: default_deep_ladder_ceiling(),
            drift_threshold: default_drift_threshold(),
            resync_on_drift: true,
            gap_threshold: default_gap_threshold(),
            pending_queue_size: default_pending_queue_size(),
            drift_history_size: default_drift_history_size(),
        }
    }
}
