//! Chronological Event Replayer
//!
//! Replays batches of per-symbol events in strict origin-time order while
//! maintaining the L2 book, and emits each event enriched with the book
//! state that resulted from applying it.
//!
//! ## Ordering
//!
//! Batches are stable-sorted by `(event_timestamp, update_id)`. Equal-key
//! events keep their arrival order (it encodes causality for same-timestamp
//! events). Because a batch boundary may split a run of equal timestamps,
//! the tail of the batch sharing the final timestamp is carried over and
//! merged with the head of the next batch; `flush()` drains the carry at
//! end of stream.
//!
//! ## Book initialization FSM
//!
//! ```text
//! UNINITIALIZED --first snapshot--> INITIALIZED
//! INITIALIZED --delta gap > threshold--> AWAITING_RESYNC
//! AWAITING_RESYNC --next snapshot (forced resync)--> INITIALIZED
//! ```
//!
//! While awaiting resync, deltas are parked in the normalizer's bounded
//! pending queue. When the snapshot lands, the book is reset from it and
//! queued deltas newer than the snapshot's update_id are re-applied in
//! order; older ones are stale and dropped.

use crate::core::{DriftMetrics, EnrichedEvent, EventType, Result, TradeSide, UnifiedEvent};
use crate::orderbook::OrderBook;
use crate::replay::drift::DriftTracker;
use crate::replay::normalizer::{RawRecord, SchemaNormalizer};
use crate::replay::sequencer::{DeltaSequencer, SequenceOutcome};
use crate::replay::ReplayConfig;
use serde::{Deserialize, Serialize};

/// Book initialization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookSyncState {
    Uninitialized,
    Initialized,
    AwaitingResync,
}

/// Replayer event accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayerStats {
    pub events_in: u64,
    pub events_out: u64,
    pub malformed: u64,
    pub deltas_dropped_uninitialized: u64,
    pub out_of_order_dropped: u64,
    pub stale_pending_dropped: u64,
    pub trades_passed_uninitialized: u64,
    pub resyncs_on_drift: u64,
    pub resyncs_on_gap: u64,
}

pub struct ChronologicalReplayer {
    config: ReplayConfig,
    book: OrderBook,
    sequencer: DeltaSequencer,
    drift: DriftTracker,
    normalizer: SchemaNormalizer,
    state: BookSyncState,
    /// Equal-timestamp tail carried across batch boundaries.
    carry: Vec<UnifiedEvent>,
    stats: ReplayerStats,
}

impl ChronologicalReplayer {
    pub fn new(symbol: &str, config: ReplayConfig) -> Self {
        let book = OrderBook::new(symbol, config.max_book_levels, config.deep_ladder_ceiling);
        Self::with_book(config, book)
    }

    /// Resume from a recovered book (see `checkpoint::recovery`). The
    /// sequencer cursor is rebased on the book's applied cursor.
    pub fn with_book(config: ReplayConfig, book: OrderBook) -> Self {
        let mut sequencer = DeltaSequencer::new(config.gap_threshold);
        let state = if book.initialized() {
            sequencer.reset_sequence(book.last_update_id());
            BookSyncState::Initialized
        } else {
            BookSyncState::Uninitialized
        };
        ChronologicalReplayer {
            normalizer: SchemaNormalizer::new(config.pending_queue_size),
            drift: DriftTracker::with_capacity(config.drift_threshold, config.drift_history_size),
            sequencer,
            book,
            state,
            carry: Vec::new(),
            stats: ReplayerStats::default(),
            config,
        }
    }

    /// Normalize raw records and replay them. Malformed records are
    /// dropped, counted, and logged; they never abort the batch.
    pub fn process_raw_batch(&mut self, records: &[RawRecord]) -> Result<Vec<EnrichedEvent>> {
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            match self.normalizer.normalize(record) {
                Ok(event) => events.push(event),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    self.stats.malformed += 1;
                    tracing::warn!(%err, "dropping malformed record");
                }
            }
        }
        self.process_batch(events)
    }

    /// Replay a batch of already-normalized events.
    pub fn process_batch(&mut self, events: Vec<UnifiedEvent>) -> Result<Vec<EnrichedEvent>> {
        self.stats.events_in += events.len() as u64;

        let mut batch = std::mem::take(&mut self.carry);
        batch.extend(events);
        // Stable: equal keys keep source-arrival order.
        batch.sort_by_key(UnifiedEvent::sort_key);

        // Hold back the run of events sharing the final timestamp; the next
        // batch may continue it.
        if let Some(last_ts) = batch.last().map(|e| e.event_timestamp) {
            let cut = batch.partition_point(|e| e.event_timestamp < last_ts);
            self.carry = batch.split_off(cut);
        }

        self.apply_all(batch)
    }

    /// Drain the carried equal-timestamp tail at end of stream.
    pub fn flush(&mut self) -> Result<Vec<EnrichedEvent>> {
        let tail = std::mem::take(&mut self.carry);
        self.apply_all(tail)
    }

    fn apply_all(&mut self, events: Vec<UnifiedEvent>) -> Result<Vec<EnrichedEvent>> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            self.apply_event(event, &mut out)?;
        }
        self.stats.events_out += out.len() as u64;
        Ok(out)
    }

    fn apply_event(&mut self, event: UnifiedEvent, out: &mut Vec<EnrichedEvent>) -> Result<()> {
        match event.event_type {
            EventType::BookSnapshot => self.apply_snapshot(event, out),
            EventType::Trade => {
                self.apply_trade(event, out);
                Ok(())
            }
            EventType::BookDelta => self.apply_delta(event, out),
        }
    }

    fn apply_snapshot(&mut self, event: UnifiedEvent, out: &mut Vec<EnrichedEvent>) -> Result<()> {
        let bids = event.bids.clone().unwrap_or_default();
        let asks = event.asks.clone().unwrap_or_default();
        let snap_id = event.update_id.map(|v| v.max(0) as u64);
        let ts = event.event_timestamp;

        match self.state {
            BookSyncState::Uninitialized => {
                self.book.init_from_snapshot(&bids, &asks, snap_id, ts);
                if let Some(id) = snap_id {
                    self.sequencer.reset_sequence(id);
                }
                self.state = BookSyncState::Initialized;
                tracing::info!(symbol = self.book.symbol(), "order book initialized from first snapshot");
                self.book.validate()?;
                out.push(self.enrich(event, None));
                Ok(())
            }
            BookSyncState::Initialized => {
                let metrics = self.drift.measure(&self.book, &bids, &asks);
                if metrics.exceeded_threshold && self.config.resync_on_drift {
                    tracing::warn!(
                        rms = metrics.rms_error,
                        threshold = self.config.drift_threshold,
                        "resynchronizing book on drift breach"
                    );
                    self.book.resynchronize(&bids, &asks, snap_id, ts);
                    if let Some(id) = snap_id {
                        self.sequencer.reset_sequence(id);
                    }
                    self.drift.note_resync();
                    self.stats.resyncs_on_drift += 1;
                }
                self.book.validate()?;
                out.push(self.enrich(event, Some(metrics)));
                Ok(())
            }
            BookSyncState::AwaitingResync => {
                let metrics = self.drift.measure(&self.book, &bids, &asks);
                self.book.resynchronize(&bids, &asks, snap_id, ts);
                let rebase = snap_id.unwrap_or_else(|| self.book.last_update_id());
                self.sequencer.reset_sequence(rebase);
                self.state = BookSyncState::Initialized;
                self.stats.resyncs_on_gap += 1;
                self.book.validate()?;
                out.push(self.enrich(event, Some(metrics)));

                // Re-apply parked deltas still ahead of the snapshot;
                // anything at or below its update_id is stale.
                let pending = self.normalizer.drain_pending();
                let queued = pending.len();
                let mut replayed = 0usize;
                for delta in pending {
                    let fresh = delta
                        .update_id
                        .map(|id| id.max(0) as u64 > rebase)
                        .unwrap_or(false);
                    if fresh {
                        replayed += 1;
                        self.apply_event(delta, out)?;
                    } else {
                        self.stats.stale_pending_dropped += 1;
                    }
                }
                tracing::info!(
                    symbol = self.book.symbol(),
                    queued,
                    replayed,
                    snapshot_update_id = rebase,
                    "book resynchronized after sequence gap"
                );
                Ok(())
            }
        }
    }

    fn apply_trade(&mut self, event: UnifiedEvent, out: &mut Vec<EnrichedEvent>) {
        if self.state == BookSyncState::Uninitialized {
            // No base state to consume from; pass through unchanged.
            self.stats.trades_passed_uninitialized += 1;
            out.push(self.enrich(event, None));
            return;
        }
        if let (Some(price), Some(quantity), Some(side)) =
            (event.trade_price, event.trade_quantity, event.trade_side)
        {
            self.consume_liquidity(side, price, quantity);
        }
        out.push(self.enrich(event, None));
    }

    fn consume_liquidity(
        &mut self,
        side: TradeSide,
        price: crate::core::FixedDecimal,
        quantity: crate::core::FixedDecimal,
    ) {
        self.book.apply_trade(side, price, quantity);
    }

    fn apply_delta(&mut self, event: UnifiedEvent, out: &mut Vec<EnrichedEvent>) -> Result<()> {
        match self.state {
            BookSyncState::Uninitialized => {
                self.stats.deltas_dropped_uninitialized += 1;
                tracing::warn!(
                    update_id = ?event.update_id,
                    "dropping delta before first snapshot"
                );
                Ok(())
            }
            BookSyncState::AwaitingResync => {
                self.normalizer.queue_delta(event);
                Ok(())
            }
            BookSyncState::Initialized => {
                let Some(id) = event.update_id.map(|v| v.max(0) as u64) else {
                    self.stats.malformed += 1;
                    tracing::warn!("dropping delta without update_id");
                    return Ok(());
                };
                let wall_ms = chrono::Utc::now().timestamp_millis();
                match self
                    .sequencer
                    .observe(id, Some(event.event_timestamp), wall_ms)
                {
                    SequenceOutcome::InSequence | SequenceOutcome::SmallGap(_) => {
                        let (Some(side), Some(price), Some(quantity)) =
                            (event.delta_side, event.delta_price, event.delta_quantity)
                        else {
                            self.stats.malformed += 1;
                            return Ok(());
                        };
                        self.book
                            .apply_delta(side, price, quantity, id, event.event_timestamp);
                        #[cfg(debug_assertions)]
                        self.book.validate()?;
                        out.push(self.enrich(event, None));
                        Ok(())
                    }
                    SequenceOutcome::OutOfOrder { last } => {
                        self.stats.out_of_order_dropped += 1;
                        tracing::debug!(update_id = id, last, "dropping out-of-order delta");
                        Ok(())
                    }
                    SequenceOutcome::LargeGap(gap) => {
                        tracing::warn!(%gap, "entering AWAITING_RESYNC, queueing deltas");
                        self.state = BookSyncState::AwaitingResync;
                        self.normalizer.set_awaiting_snapshot(true);
                        self.normalizer.queue_delta(event);
                        Ok(())
                    }
                }
            }
        }
    }

    fn enrich(&self, event: UnifiedEvent, drift: Option<DriftMetrics>) -> EnrichedEvent {
        EnrichedEvent {
            top_bid: self.book.best_bid(),
            top_ask: self.book.best_ask(),
            spread: self.book.spread(),
            drift,
            event,
        }
    }

    // ---- accessors ----

    #[inline]
    pub fn state(&self) -> BookSyncState {
        self.state
    }

    #[inline]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    #[inline]
    pub fn sequencer(&self) -> &DeltaSequencer {
        &self.sequencer
    }

    #[inline]
    pub fn drift_tracker(&self) -> &DriftTracker {
        &self.drift
    }

    #[inline]
    pub fn stats(&self) -> &ReplayerStats {
        &self.stats
    }

    #[inline]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Force AWAITING_RESYNC (used by recovery when the first live event is
    /// far past the checkpoint cursor).
    pub fn enter_awaiting_resync(&mut self) {
        if self.state == BookSyncState::Initialized {
            self.state = BookSyncState::AwaitingResync;
            self.normalizer.set_awaiting_snapshot(true);
        }
    }

    /// Pending-delta diagnostics (length, dropped count).
    pub fn pending_status(&self) -> (usize, u64) {
        (self.normalizer.pending_len(), self.normalizer.pending_dropped())
    }
}

impl std::fmt::Debug for ChronologicalReplayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronologicalReplayer")
            .field("symbol", &self.book.symbol())
            .field("state", &self.state)
            .field("last_update_id", &self.book.last_update_id())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BookSide, FixedDecimal, Level};

    fn dec(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn lv(p: &str, q: &str) -> Level {
        (dec(p), dec(q))
    }

    fn replayer() -> ChronologicalReplayer {
        ChronologicalReplayer::new("BTCUSDT", ReplayConfig::default())
    }

    fn snapshot(ts: i64, id: i64, bids: Vec<Level>, asks: Vec<Level>) -> UnifiedEvent {
        UnifiedEvent::snapshot(ts, Some(id), bids, asks)
    }

    fn delta(ts: i64, id: i64, side: BookSide, p: &str, q: &str) -> UnifiedEvent {
        UnifiedEvent::delta(ts, Some(id), side, dec(p), dec(q))
    }

    fn drain(r: &mut ChronologicalReplayer, events: Vec<UnifiedEvent>) -> Vec<EnrichedEvent> {
        let mut out = r.process_batch(events).unwrap();
        out.extend(r.flush().unwrap());
        out
    }

    #[test]
    fn test_basic_replay_scenario() {
        let mut r = replayer();
        let events = vec![
            snapshot(1_000, 1, vec![lv("100", "10")], vec![lv("101", "10")]),
            delta(1_001, 2, BookSide::Bid, "99", "5"),
            UnifiedEvent::trade(1_002, Some(1), dec("101"), dec("3"), TradeSide::Buy),
        ];
        let out = drain(&mut r, events);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].event.event_type, EventType::BookSnapshot);
        assert_eq!(out[0].top_bid, Some(lv("100", "10")));
        assert_eq!(out[0].top_ask, Some(lv("101", "10")));
        assert_eq!(out[0].spread, Some(dec("1")));

        assert_eq!(out[1].event.event_type, EventType::BookDelta);
        assert_eq!(out[1].top_bid, Some(lv("100", "10")));
        assert_eq!(out[1].spread, Some(dec("1")));

        assert_eq!(out[2].event.event_type, EventType::Trade);
        assert_eq!(out[2].top_ask, Some(lv("101", "7")));
        assert_eq!(out[2].spread, Some(dec("1")));

        assert_eq!(r.book().bid_levels(), vec![lv("100", "10"), lv("99", "5")]);
    }

    #[test]
    fn test_deltas_before_snapshot_dropped() {
        let mut r = replayer();
        let out = drain(&mut r, vec![delta(1, 1, BookSide::Bid, "100", "1")]);
        assert!(out.is_empty());
        assert_eq!(r.stats().deltas_dropped_uninitialized, 1);
    }

    #[test]
    fn test_trade_before_snapshot_passes_through() {
        let mut r = replayer();
        let out = drain(
            &mut r,
            vec![UnifiedEvent::trade(1, None, dec("5"), dec("1"), TradeSide::Sell)],
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].top_bid.is_none());
        assert_eq!(r.stats().trades_passed_uninitialized, 1);
    }

    #[test]
    fn test_batch_sorted_by_timestamp_then_update_id() {
        let mut r = replayer();
        let events = vec![
            snapshot(1_000, 1, vec![lv("100", "10")], vec![lv("101", "10")]),
            delta(1_003, 4, BookSide::Bid, "98", "1"),
            delta(1_001, 2, BookSide::Bid, "99", "1"),
            delta(1_002, 3, BookSide::Bid, "99.5", "1"),
        ];
        let out = drain(&mut r, events);
        let ids: Vec<_> = out.iter().filter_map(|e| e.event.update_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_equal_timestamp_tail_carried_across_batches() {
        let mut r = replayer();
        let first = vec![
            snapshot(1_000, 1, vec![lv("100", "10")], vec![lv("101", "10")]),
            // Tail at ts=2000 held back until the next batch
            delta(2_000, 3, BookSide::Bid, "99", "2"),
        ];
        let out1 = r.process_batch(first).unwrap();
        assert_eq!(out1.len(), 1); // only the snapshot emitted so far

        let second = vec![delta(2_000, 2, BookSide::Bid, "99.5", "1")];
        let out2 = r.process_batch(second).unwrap();
        assert!(out2.is_empty()); // still all at ts=2000

        let out3 = r.flush().unwrap();
        let ids: Vec<_> = out3.iter().filter_map(|e| e.event.update_id).collect();
        // update_id 2 sorts ahead of 3 despite arriving later
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut r = replayer();
        let snap = snapshot(1_000, 5, vec![lv("100", "10")], vec![lv("101", "10")]);
        drain(&mut r, vec![snap.clone()]);
        let bids_once = r.book().bid_levels();

        let out = drain(&mut r, vec![UnifiedEvent { event_timestamp: 1_001, ..snap }]);
        assert_eq!(r.book().bid_levels(), bids_once);
        // Second snapshot carries drift metrics (zero drift, no resync)
        let metrics = out[0].drift.as_ref().unwrap();
        assert_eq!(metrics.rms_error, 0.0);
        assert!(!metrics.exceeded_threshold);
    }

    #[test]
    fn test_drift_triggered_resync() {
        let mut r = replayer();
        drain(
            &mut r,
            vec![snapshot(1_000, 1, vec![lv("100", "10")], vec![lv("101", "10")])],
        );
        // Snapshot disagrees on best bid quantity: 10.1 vs 10
        let out = drain(
            &mut r,
            vec![snapshot(2_000, 2, vec![lv("100", "10.1")], vec![lv("101", "10")])],
        );
        let metrics = out[0].drift.as_ref().unwrap();
        assert!(metrics.rms_error > 0.0069 && metrics.rms_error < 0.0072);
        assert!(metrics.exceeded_threshold);
        assert_eq!(r.stats().resyncs_on_drift, 1);
        // Ladder replaced by snapshot contents
        assert_eq!(r.book().best_bid(), Some(lv("100", "10.1")));
        assert_eq!(r.book().snapshot_count(), 2);
    }

    #[test]
    fn test_gap_and_resync_scenario() {
        let mut r = replayer();
        drain(
            &mut r,
            vec![snapshot(1_000, 1_000, vec![lv("100", "10")], vec![lv("101", "10")])],
        );
        // Deltas 1001..=1005 apply cleanly
        let deltas: Vec<_> = (1..=5)
            .map(|i| delta(1_000 + i, 1_000 + i, BookSide::Bid, "99", "1"))
            .collect();
        drain(&mut r, deltas);
        assert_eq!(r.book().last_update_id(), 1_005);

        // Gap of 1994 > 1000: enters AWAITING_RESYNC
        let out = drain(&mut r, vec![delta(2_000, 3_000, BookSide::Bid, "98", "1")]);
        assert!(out.is_empty());
        assert_eq!(r.state(), BookSyncState::AwaitingResync);

        // Subsequent deltas are queued, not applied
        let queued: Vec<_> = (3_001..=3_010)
            .map(|id| delta(2_000 + id, id, BookSide::Bid, "97", "1"))
            .collect();
        let out = drain(&mut r, queued);
        assert!(out.is_empty());
        assert_eq!(r.book().last_update_id(), 1_005);

        // Snapshot at 3050: resync, queue is stale and cleared
        let out = drain(
            &mut r,
            vec![snapshot(9_000, 3_050, vec![lv("95", "5")], vec![lv("96", "5")])],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(r.state(), BookSyncState::Initialized);
        assert_eq!(r.book().last_update_id(), 3_050);
        assert_eq!(r.book().snapshot_count(), 2);
        assert_eq!(r.book().best_bid(), Some(lv("95", "5")));
        assert_eq!(r.sequencer().stats().gaps_over_threshold, 1);
        assert_eq!(r.stats().stale_pending_dropped, 11);
        assert_eq!(r.pending_status().0, 0);
    }

    #[test]
    fn test_fresh_pending_deltas_replayed_after_resync() {
        let mut r = replayer();
        drain(
            &mut r,
            vec![snapshot(1_000, 1_000, vec![lv("100", "10")], vec![lv("101", "10")])],
        );
        drain(&mut r, vec![delta(1_001, 3_000, BookSide::Bid, "98", "1")]);
        assert_eq!(r.state(), BookSyncState::AwaitingResync);

        // One stale (3001 <= 3050) and one fresh (3051 > 3050) queued delta
        drain(&mut r, vec![delta(1_002, 3_001, BookSide::Bid, "97", "1")]);
        drain(&mut r, vec![delta(1_003, 3_051, BookSide::Bid, "96", "2")]);

        let out = drain(
            &mut r,
            vec![snapshot(2_000, 3_050, vec![lv("95", "5")], vec![lv("99", "5")])],
        );
        // Snapshot plus the replayed fresh delta
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].event.update_id, Some(3_051));
        assert_eq!(r.book().last_update_id(), 3_051);
        assert_eq!(r.book().best_bid(), Some(lv("96", "2")));
    }

    #[test]
    fn test_out_of_order_delta_dropped() {
        let mut r = replayer();
        drain(
            &mut r,
            vec![snapshot(1_000, 10, vec![lv("100", "10")], vec![lv("101", "10")])],
        );
        drain(&mut r, vec![delta(1_001, 11, BookSide::Bid, "99", "1")]);
        let out = drain(&mut r, vec![delta(1_002, 11, BookSide::Bid, "99", "7")]);
        assert!(out.is_empty());
        assert_eq!(r.stats().out_of_order_dropped, 1);
        // Book unchanged by the duplicate
        assert_eq!(r.book().bid_levels()[1], lv("99", "1"));
    }

    #[test]
    fn test_empty_and_single_event_batches() {
        let mut r = replayer();
        assert!(r.process_batch(Vec::new()).unwrap().is_empty());
        assert!(r.flush().unwrap().is_empty());

        let out = drain(
            &mut r,
            vec![snapshot(1, 1, vec![lv("1", "1")], vec![lv("2", "1")])],
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_snapshot_emptying_one_side() {
        let mut r = replayer();
        drain(
            &mut r,
            vec![snapshot(1_000, 1, vec![lv("100", "10")], vec![lv("101", "10")])],
        );
        let out = drain(&mut r, vec![snapshot(2_000, 2, vec![lv("100", "200")], vec![])]);
        let metrics = out[0].drift.as_ref().unwrap();
        assert!(metrics.exceeded_threshold);
        // After resync the ask side is empty; spread undefined
        assert!(r.book().best_ask().is_none());
        assert!(out[0].spread.is_none() || r.book().best_ask().is_none());
    }

    #[test]
    fn test_malformed_raw_records_dropped_not_fatal() {
        let mut r = replayer();
        let good: RawRecord = serde_json::from_str(
            r#"{"event_type":"BOOK_SNAPSHOT","origin_time":1700000000000000000,
                "update_id":1,"bids":[["100","10"]],"asks":[["101","10"]]}"#,
        )
        .unwrap();
        let bad: RawRecord =
            serde_json::from_str(r#"{"event_type":"BOOK_DELTA","origin_time":1}"#).unwrap();

        let mut out = r.process_raw_batch(&[bad, good]).unwrap();
        out.extend(r.flush().unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(r.stats().malformed, 1);
    }

    #[test]
    fn test_output_non_decreasing_order_with_ties_preserved() {
        let mut r = replayer();
        let mut events = vec![snapshot(0, 0, vec![lv("100", "10")], vec![lv("101", "10")])];
        // Trades share timestamps; arrival order must be preserved for ties
        for (i, ts) in [(1, 10), (2, 10), (3, 10), (4, 20)] {
            events.push(UnifiedEvent::trade(ts, Some(i), dec("101"), dec("0.1"), TradeSide::Buy));
        }
        let out = drain(&mut r, events);
        let keys: Vec<_> = out.iter().map(|e| e.event.sort_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        let trade_ids: Vec<_> = out.iter().filter_map(|e| e.event.trade_id).collect();
        assert_eq!(trade_ids, vec![1, 2, 3, 4]);
    }
}
