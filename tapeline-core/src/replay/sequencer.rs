//! Delta Sequencer
//!
//! Validates the monotonic `update_id` stream of book deltas. Batches are
//! stable-sorted by `update_id`, then scanned pairwise:
//! - `actual == expected` advances the cursor,
//! - `actual < expected` is a duplicate/out-of-order delta and is dropped,
//! - `actual > expected` is a gap; gaps above the threshold raise the
//!   recovery flag and the pipeline queues deltas until the next snapshot.
//!
//! After a snapshot resync the caller rebases the cursor with
//! `reset_sequence`.

use crate::core::{SequenceGap, UnifiedEvent};
use std::collections::{BTreeMap, VecDeque};

/// Default gap size that forces a snapshot resync.
pub const DEFAULT_GAP_THRESHOLD: u64 = 1_000;

/// Default number of gap records retained for reporting.
pub const DEFAULT_GAP_HISTORY: usize = 1_000;

/// Outcome of observing one delta's update_id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// In sequence (or first observation); apply the delta.
    InSequence,
    /// Duplicate or out-of-order; drop the delta.
    OutOfOrder { last: u64 },
    /// Tolerated gap; apply the delta and record the discontinuity.
    SmallGap(SequenceGap),
    /// Gap above the threshold; recovery (snapshot resync) is required.
    LargeGap(SequenceGap),
}

/// Running statistics over all observed deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SequencerStats {
    pub total_deltas: u64,
    pub total_gaps: u64,
    pub out_of_order: u64,
    pub max_gap_size: u64,
    pub gaps_over_threshold: u64,
    /// Histogram of gap sizes.
    pub gaps_by_size: BTreeMap<u64, u64>,
}

#[derive(Debug)]
pub struct DeltaSequencer {
    gap_threshold: u64,
    last_update_id: Option<u64>,
    recovery_needed: bool,
    stats: SequencerStats,
    gap_history: VecDeque<SequenceGap>,
    max_gap_history: usize,
}

impl DeltaSequencer {
    pub fn new(gap_threshold: u64) -> Self {
        Self::with_history(gap_threshold, DEFAULT_GAP_HISTORY)
    }

    pub fn with_history(gap_threshold: u64, max_gap_history: usize) -> Self {
        DeltaSequencer {
            gap_threshold,
            last_update_id: None,
            recovery_needed: false,
            stats: SequencerStats::default(),
            gap_history: VecDeque::with_capacity(max_gap_history.min(1024)),
            max_gap_history,
        }
    }

    /// Observe one delta's update_id against the cursor and advance it when
    /// the delta should be applied.
    pub fn observe(&mut self, update_id: u64, origin_time: Option<i64>, wall_ms: i64) -> SequenceOutcome {
        self.stats.total_deltas += 1;

        let Some(last) = self.last_update_id else {
            // First observation establishes the sequence.
            self.last_update_id = Some(update_id);
            return SequenceOutcome::InSequence;
        };

        let expected = last + 1;
        if update_id < expected {
            self.stats.out_of_order += 1;
            return SequenceOutcome::OutOfOrder { last };
        }
        if update_id == expected {
            self.last_update_id = Some(update_id);
            return SequenceOutcome::InSequence;
        }

        let gap = SequenceGap {
            expected,
            actual: update_id,
            gap_size: update_id - expected,
            wall_time: wall_ms,
            origin_time,
        };
        self.record_gap(&gap);

        if gap.gap_size > self.gap_threshold {
            self.recovery_needed = true;
            tracing::warn!(%gap, threshold = self.gap_threshold, "gap exceeds threshold, recovery required");
            SequenceOutcome::LargeGap(gap)
        } else {
            self.last_update_id = Some(update_id);
            tracing::debug!(%gap, "tolerated sequence gap");
            SequenceOutcome::SmallGap(gap)
        }
    }

    /// Stable-sort a delta batch by `update_id` and drop duplicates below
    /// the cursor, returning the gaps found while scanning.
    ///
    /// Used on pure delta feeds before replay; the per-event path goes
    /// through [`DeltaSequencer::observe`].
    pub fn validate_and_sort(
        &mut self,
        batch: &mut Vec<UnifiedEvent>,
        wall_ms: i64,
    ) -> Vec<SequenceGap> {
        batch.sort_by_key(|e| e.update_id.unwrap_or(i64::MIN));

        let mut gaps = Vec::new();
        let mut kept = Vec::with_capacity(batch.len());
        for event in batch.drain(..) {
            let id = event.update_id.map(|v| v.max(0) as u64).unwrap_or(0);
            match self.observe(id, Some(event.event_timestamp), wall_ms) {
                SequenceOutcome::OutOfOrder { last } => {
                    tracing::debug!(update_id = id, last, "dropping out-of-order delta");
                }
                SequenceOutcome::SmallGap(gap) => {
                    gaps.push(gap);
                    kept.push(event);
                }
                SequenceOutcome::LargeGap(gap) => {
                    gaps.push(gap);
                    kept.push(event);
                }
                SequenceOutcome::InSequence => kept.push(event),
            }
        }
        *batch = kept;
        gaps
    }

    fn record_gap(&mut self, gap: &SequenceGap) {
        self.stats.total_gaps += 1;
        self.stats.max_gap_size = self.stats.max_gap_size.max(gap.gap_size);
        *self.stats.gaps_by_size.entry(gap.gap_size).or_insert(0) += 1;
        if gap.gap_size > self.gap_threshold {
            self.stats.gaps_over_threshold += 1;
        }
        if self.gap_history.len() == self.max_gap_history {
            self.gap_history.pop_front();
        }
        self.gap_history.push_back(gap.clone());
    }

    /// Rebase the cursor after a snapshot resync and clear the recovery
    /// flag.
    pub fn reset_sequence(&mut self, new_update_id: u64) {
        self.last_update_id = Some(new_update_id);
        self.recovery_needed = false;
    }

    #[inline]
    pub fn recovery_needed(&self) -> bool {
        self.recovery_needed
    }

    #[inline]
    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    #[inline]
    pub fn gap_threshold(&self) -> u64 {
        self.gap_threshold
    }

    pub fn stats(&self) -> &SequencerStats {
        &self.stats
    }

    pub fn gap_history(&self) -> impl Iterator<Item = &SequenceGap> {
        self.gap_history.iter()
    }
}
