//! Drift Tracker
//!
//! Compares the reconstructed book against each authoritative snapshot.
//! Per side, every price present in either view contributes a squared
//! relative quantity error `((q_snap - q_recon) / q_snap)^2`; a level
//! missing entirely on one side contributes a unit squared error. The
//! combined figure is `sqrt((rms_bid^2 + rms_ask^2) / 2)`.
//!
//! This is the only place pipeline decimals cross into f64: drift is a
//! statistical measure, not a value path.

use crate::core::{DriftMetrics, Level};
use crate::orderbook::OrderBook;
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// Default RMS threshold that triggers a resync.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.001;

/// Default bounded history size.
pub const DEFAULT_HISTORY: usize = 10_000;

/// Summary over the retained drift history.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DriftSummary {
    pub avg_rms_error: f64,
    pub max_rms_error: f64,
    pub min_rms_error: f64,
    pub p95_rms_error: f64,
    pub p99_rms_error: f64,
    pub total_snapshots: u64,
    pub total_resyncs: u64,
    pub resync_rate: f64,
}

#[derive(Debug)]
pub struct DriftTracker {
    threshold: f64,
    history: VecDeque<DriftMetrics>,
    capacity: usize,
    total_snapshots: u64,
    total_resyncs: u64,
}

impl DriftTracker {
    pub fn new(threshold: f64) -> Self {
        Self::with_capacity(threshold, DEFAULT_HISTORY)
    }

    pub fn with_capacity(threshold: f64, capacity: usize) -> Self {
        DriftTracker {
            threshold,
            history: VecDeque::new(),
            capacity,
            total_snapshots: 0,
            total_resyncs: 0,
        }
    }

    /// Compute drift of `book` against snapshot levels and record it.
    pub fn measure(&mut self, book: &OrderBook, snap_bids: &[Level], snap_asks: &[Level]) -> DriftMetrics {
        self.total_snapshots += 1;

        let recon_bids = book.bid_levels();
        let recon_asks = book.ask_levels();

        let (bid_rms, bid_max) = side_error(&recon_bids, snap_bids);
        let (ask_rms, ask_max) = side_error(&recon_asks, snap_asks);
        let rms_error = ((bid_rms * bid_rms + ask_rms * ask_rms) / 2.0).sqrt();

        let metrics = DriftMetrics {
            rms_error,
            bid_rms,
            ask_rms,
            max_deviation: bid_max.max(ask_max),
            bid_level_diff: recon_bids.len().abs_diff(snap_bids.len()) as u32,
            ask_level_diff: recon_asks.len().abs_diff(snap_asks.len()) as u32,
            snapshot_number: self.total_snapshots,
            exceeded_threshold: rms_error > self.threshold,
        };

        if metrics.exceeded_threshold {
            tracing::warn!(
                rms = metrics.rms_error,
                max_deviation = metrics.max_deviation,
                threshold = self.threshold,
                "drift threshold exceeded"
            );
        }

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics.clone());
        metrics
    }

    /// Record that the book was resynchronized because of drift.
    pub fn note_resync(&mut self) {
        self.total_resyncs += 1;
    }

    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn history(&self) -> impl Iterator<Item = &DriftMetrics> {
        self.history.iter()
    }

    /// Statistics over the retained history, derived on demand.
    pub fn summary(&self) -> DriftSummary {
        if self.history.is_empty() {
            return DriftSummary {
                total_snapshots: self.total_snapshots,
                total_resyncs: self.total_resyncs,
                ..DriftSummary::default()
            };
        }

        let mut errors: Vec<f64> = self.history.iter().map(|m| m.rms_error).collect();
        errors.sort_by(|a, b| a.partial_cmp(b).expect("rms is finite"));

        let sum: f64 = errors.iter().sum();
        DriftSummary {
            avg_rms_error: sum / errors.len() as f64,
            max_rms_error: *errors.last().expect("non-empty"),
            min_rms_error: errors[0],
            p95_rms_error: percentile(&errors, 0.95),
            p99_rms_error: percentile(&errors, 0.99),
            total_snapshots: self.total_snapshots,
            total_resyncs: self.total_resyncs,
            resync_rate: if self.total_snapshots > 0 {
                self.total_resyncs as f64 / self.total_snapshots as f64
            } else {
                0.0
            },
        }
    }
}

/// `(rms, max_deviation)` for one side.
fn side_error(reconstructed: &[Level], snapshot: &[Level]) -> (f64, f64) {
    if snapshot.is_empty() && reconstructed.is_empty() {
        return (0.0, 0.0);
    }
    if snapshot.is_empty() {
        // Everything we hold is phantom liquidity.
        return (1.0, 1.0);
    }

    let recon: BTreeMap<_, _> = reconstructed.iter().copied().collect();
    let snap: BTreeMap<_, _> = snapshot.iter().copied().collect();

    let mut squared_errors = Vec::with_capacity(snap.len() + recon.len());
    let mut max_deviation = 0.0f64;

    for (price, snap_qty) in &snap {
        let snap_q = snap_qty.to_f64_lossy();
        if snap_q == 0.0 {
            continue;
        }
        let recon_q = recon.get(price).map(|q| q.to_f64_lossy()).unwrap_or(0.0);
        let rel = (snap_q - recon_q) / snap_q;
        squared_errors.push(rel * rel);
        max_deviation = max_deviation.max(rel.abs());
    }
    // Levels we reconstructed that the snapshot does not have at all.
    for (price, recon_qty) in &recon {
        if !snap.contains_key(price) && !recon_qty.is_zero() {
            squared_errors.push(1.0);
            max_deviation = max_deviation.max(1.0);
        }
    }

    if squared_errors.is_empty() {
        return (0.0, max_deviation);
    }
    let mean = squared_errors.iter().sum::<f64>() / squared_errors.len() as f64;
    (mean.sqrt(), max_deviation)
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = (p * (sorted.len() - 1) as f64) as usize;
    sorted[idx]
}
