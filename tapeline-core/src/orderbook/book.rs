//! Order Book State
//!
//! Both ladders of one symbol plus the applied-update cursors. Created
//! uninitialized; the first snapshot initializes it, deltas mutate it, and
//! trades consume liquidity from the opposite side's best level.
//!
//! Trades are informational while deltas are authoritative: a trade larger
//! than the best level discards the excess instead of cascading into deeper
//! levels, because the subsequent deltas already carry the true state.

use crate::core::{BookSide, ErrorKind, FixedDecimal, Level, Result, TradeSide};
use crate::orderbook::ladder::BoundedLadder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    max_levels: usize,
    bids: BoundedLadder,
    asks: BoundedLadder,
    last_update_id: u64,
    last_origin_time: i64,
    initialized: bool,
    snapshot_count: u64,
}

/// Serializable image of a book, used by checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookImage {
    pub symbol: String,
    pub max_levels: usize,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub last_update_id: u64,
    pub last_origin_time: i64,
    pub initialized: bool,
    pub snapshot_count: u64,
}

impl OrderBook {
    pub fn new(symbol: &str, max_levels: usize, deep_ceiling: usize) -> Self {
        OrderBook {
            symbol: symbol.to_string(),
            max_levels,
            bids: BoundedLadder::new(BookSide::Bid, max_levels, deep_ceiling),
            asks: BoundedLadder::new(BookSide::Ask, max_levels, deep_ceiling),
            last_update_id: 0,
            last_origin_time: 0,
            initialized: false,
            snapshot_count: 0,
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    #[inline]
    pub fn last_origin_time(&self) -> i64 {
        self.last_origin_time
    }

    #[inline]
    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count
    }

    /// Initialize from the first snapshot: clears both ladders, loads all
    /// non-zero levels, and marks the book initialized.
    pub fn init_from_snapshot(
        &mut self,
        bids: &[Level],
        asks: &[Level],
        update_id: Option<u64>,
        origin_time: i64,
    ) {
        self.load_snapshot(bids, asks, update_id, origin_time);
        self.initialized = true;
        self.snapshot_count = 1;
    }

    /// Reset to a snapshot's contents, preserving the running snapshot
    /// count (incremented, not restarted).
    pub fn resynchronize(
        &mut self,
        bids: &[Level],
        asks: &[Level],
        update_id: Option<u64>,
        origin_time: i64,
    ) {
        self.load_snapshot(bids, asks, update_id, origin_time);
        self.initialized = true;
        self.snapshot_count += 1;
    }

    fn load_snapshot(
        &mut self,
        bids: &[Level],
        asks: &[Level],
        update_id: Option<u64>,
        origin_time: i64,
    ) {
        self.bids.clear();
        self.asks.clear();
        for &(price, quantity) in bids {
            if !quantity.is_zero() {
                self.bids.upsert(price, quantity);
            }
        }
        for &(price, quantity) in asks {
            if !quantity.is_zero() {
                self.asks.upsert(price, quantity);
            }
        }
        if let Some(id) = update_id {
            self.last_update_id = id;
        }
        self.last_origin_time = origin_time;
    }

    /// Apply one delta to the addressed side and advance the cursor.
    pub fn apply_delta(
        &mut self,
        side: BookSide,
        price: FixedDecimal,
        quantity: FixedDecimal,
        update_id: u64,
        origin_time: i64,
    ) {
        match side {
            BookSide::Bid => self.bids.upsert(price, quantity),
            BookSide::Ask => self.asks.upsert(price, quantity),
        }
        self.last_update_id = update_id;
        self.last_origin_time = origin_time;
    }

    /// Consume liquidity from the opposite side's best level.
    ///
    /// A BUY takes from the best ask when `best_ask.price <= trade price`;
    /// a SELL takes from the best bid symmetrically. Quantity beyond the
    /// best level is discarded.
    pub fn apply_trade(&mut self, side: TradeSide, price: FixedDecimal, quantity: FixedDecimal) {
        let ladder = match side {
            TradeSide::Buy => &mut self.asks,
            TradeSide::Sell => &mut self.bids,
        };
        let Some((best_price, best_qty)) = ladder.best() else {
            return;
        };
        let marketable = match side {
            TradeSide::Buy => best_price <= price,
            TradeSide::Sell => best_price >= price,
        };
        if !marketable {
            return;
        }
        if best_qty > quantity {
            let remaining = best_qty.saturating_sub_floor_zero(quantity);
            ladder.upsert(best_price, remaining);
        } else {
            ladder.remove(best_price);
        }
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.best()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Level> {
        self.asks.best()
    }

    /// `best_ask.price - best_bid.price`. Negative when the book is crossed
    /// (crossed snapshots are accepted as-is and propagated).
    pub fn spread(&self) -> Option<FixedDecimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => ask.checked_sub(bid).ok(),
            _ => None,
        }
    }

    pub fn is_crossed(&self) -> bool {
        matches!(
            (self.best_bid(), self.best_ask()),
            (Some((bid, _)), Some((ask, _))) if bid >= ask
        )
    }

    /// All bid levels, best-first.
    pub fn bid_levels(&self) -> Vec<Level> {
        self.bids.snapshot_levels()
    }

    /// All ask levels, best-first.
    pub fn ask_levels(&self) -> Vec<Level> {
        self.asks.snapshot_levels()
    }

    /// `(bid_depth, ask_depth)` counting both regions.
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.depth(), self.asks.depth())
    }

    /// Check both ladder invariants, mapping failure into the fatal error
    /// kind so the worker checkpoints and aborts with a diagnostic.
    pub fn validate(&self) -> Result<()> {
        self.bids
            .validate()
            .and_then(|_| self.asks.validate())
            .map_err(ErrorKind::InvariantViolation)
    }

    /// Full serializable image for checkpointing.
    pub fn export(&self) -> BookImage {
        BookImage {
            symbol: self.symbol.clone(),
            max_levels: self.max_levels,
            bids: self.bid_levels(),
            asks: self.ask_levels(),
            last_update_id: self.last_update_id,
            last_origin_time: self.last_origin_time,
            initialized: self.initialized,
            snapshot_count: self.snapshot_count,
        }
    }

    /// Rebuild a book from a checkpoint image.
    pub fn restore(image: &BookImage, deep_ceiling: usize) -> Self {
        let mut book = OrderBook::new(&image.symbol, image.max_levels, deep_ceiling);
        for &(price, quantity) in &image.bids {
            book.bids.upsert(price, quantity);
        }
        for &(price, quantity) in &image.asks {
            book.asks.upsert(price, quantity);
        }
        book.last_update_id = image.last_update_id;
        book.last_origin_time = image.last_origin_time;
        book.initialized = image.initialized;
        book.snapshot_count = image.snapshot_count;
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::ladder::DEFAULT_DEEP_CEILING;

    fn dec(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn lv(p: &str, q: &str) -> Level {
        (dec(p), dec(q))
    }

    fn initialized_book() -> OrderBook {
        let mut book = OrderBook::new("BTCUSDT", 20, DEFAULT_DEEP_CEILING);
        book.init_from_snapshot(&[lv("100", "10")], &[lv("101", "10")], Some(1), 1_000);
        book
    }

    #[test]
    fn test_starts_uninitialized() {
        let book = OrderBook::new("BTCUSDT", 20, DEFAULT_DEEP_CEILING);
        assert!(!book.initialized());
        assert_eq!(book.snapshot_count(), 0);
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn test_init_from_snapshot() {
        let book = initialized_book();
        assert!(book.initialized());
        assert_eq!(book.snapshot_count(), 1);
        assert_eq!(book.last_update_id(), 1);
        assert_eq!(book.best_bid(), Some(lv("100", "10")));
        assert_eq!(book.best_ask(), Some(lv("101", "10")));
        assert_eq!(book.spread(), Some(dec("1")));
    }

    #[test]
    fn test_snapshot_skips_zero_levels() {
        let mut book = OrderBook::new("BTCUSDT", 20, DEFAULT_DEEP_CEILING);
        book.init_from_snapshot(&[lv("100", "10"), lv("99", "0")], &[], Some(1), 0);
        assert_eq!(book.depth(), (1, 0));
    }

    #[test]
    fn test_apply_delta_advances_cursor() {
        let mut book = initialized_book();
        book.apply_delta(BookSide::Bid, dec("99"), dec("5"), 2, 1_001);
        assert_eq!(book.last_update_id(), 2);
        assert_eq!(book.bid_levels(), vec![lv("100", "10"), lv("99", "5")]);
    }

    #[test]
    fn test_delta_remove_missing_level_is_noop() {
        let mut book = initialized_book();
        book.apply_delta(BookSide::Ask, dec("150"), FixedDecimal::ZERO, 2, 1_001);
        assert_eq!(book.ask_levels(), vec![lv("101", "10")]);
        assert_eq!(book.last_update_id(), 2);
    }

    #[test]
    fn test_buy_trade_consumes_best_ask() {
        let mut book = initialized_book();
        book.apply_trade(TradeSide::Buy, dec("101"), dec("3"));
        assert_eq!(book.best_ask(), Some(lv("101", "7")));
        // Bids untouched
        assert_eq!(book.best_bid(), Some(lv("100", "10")));
    }

    #[test]
    fn test_sell_trade_consumes_best_bid() {
        let mut book = initialized_book();
        book.apply_trade(TradeSide::Sell, dec("100"), dec("4"));
        assert_eq!(book.best_bid(), Some(lv("100", "6")));
    }

    #[test]
    fn test_trade_depletion_removes_level_without_cascade() {
        let mut book = OrderBook::new("BTCUSDT", 20, DEFAULT_DEEP_CEILING);
        book.init_from_snapshot(
            &[lv("100", "10")],
            &[lv("101", "2"), lv("102", "8")],
            Some(1),
            0,
        );
        // Trade bigger than the best ask level: excess is discarded
        book.apply_trade(TradeSide::Buy, dec("105"), dec("5"));
        assert_eq!(book.best_ask(), Some(lv("102", "8")));
    }

    #[test]
    fn test_non_marketable_trade_ignored() {
        let mut book = initialized_book();
        // BUY below the best ask cannot consume it
        book.apply_trade(TradeSide::Buy, dec("100.5"), dec("3"));
        assert_eq!(book.best_ask(), Some(lv("101", "10")));
    }

    #[test]
    fn test_resynchronize_preserves_snapshot_count() {
        let mut book = initialized_book();
        book.resynchronize(&[lv("90", "1")], &[lv("91", "1")], Some(3_050), 2_000);
        assert_eq!(book.snapshot_count(), 2);
        assert_eq!(book.last_update_id(), 3_050);
        assert_eq!(book.best_bid(), Some(lv("90", "1")));
        assert_eq!(book.depth(), (1, 1));
    }

    #[test]
    fn test_crossed_snapshot_accepted_as_is() {
        let mut book = OrderBook::new("BTCUSDT", 20, DEFAULT_DEEP_CEILING);
        book.init_from_snapshot(&[lv("102", "1")], &[lv("101", "1")], Some(1), 0);
        assert!(book.is_crossed());
        assert_eq!(book.spread(), Some(dec("-1")));
        book.validate().unwrap();
    }

    #[test]
    fn test_determinism_same_deltas_same_state() {
        let deltas = [
            (BookSide::Bid, "100", "10", 1),
            (BookSide::Ask, "101", "8", 2),
            (BookSide::Bid, "99.5", "3", 3),
            (BookSide::Bid, "100", "0", 4),
            (BookSide::Ask, "101", "2", 5),
        ];
        let run = || {
            let mut book = OrderBook::new("BTCUSDT", 20, DEFAULT_DEEP_CEILING);
            book.init_from_snapshot(&[], &[], Some(0), 0);
            for (side, p, q, id) in deltas {
                book.apply_delta(side, dec(p), dec(q), id, id as i64);
            }
            (book.bid_levels(), book.ask_levels(), book.last_update_id())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_export_restore_round_trip() {
        let mut book = initialized_book();
        book.apply_delta(BookSide::Bid, dec("99"), dec("5"), 7, 1_500);
        let image = book.export();
        let restored = OrderBook::restore(&image, DEFAULT_DEEP_CEILING);
        assert_eq!(restored.bid_levels(), book.bid_levels());
        assert_eq!(restored.ask_levels(), book.ask_levels());
        assert_eq!(restored.last_update_id(), 7);
        assert!(restored.initialized());
        assert_eq!(restored.snapshot_count(), 1);
    }
}
