//! Unified Market Event Model
//!
//! Every input source (columnar history, JSONL captures) is normalized into
//! the single tagged record defined here before it touches the replayer.
//! Exactly the fields for an event's type are populated; everything else
//! stays `None` and is written as null by the columnar sink.

use crate::core::fixed_point::FixedDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A price level: `(price, quantity)`. Quantity zero denotes removal.
pub type Level = (FixedDecimal, FixedDecimal);

/// Discriminator for unified events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "TRADE")]
    Trade,
    #[serde(rename = "BOOK_SNAPSHOT")]
    BookSnapshot,
    #[serde(rename = "BOOK_DELTA")]
    BookDelta,
}

impl EventType {
    /// Wire name used in columnar files and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Trade => "TRADE",
            EventType::BookSnapshot => "BOOK_SNAPSHOT",
            EventType::BookDelta => "BOOK_DELTA",
        }
    }

    /// Parse the wire name.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "TRADE" => Some(EventType::Trade),
            "BOOK_SNAPSHOT" => Some(EventType::BookSnapshot),
            "BOOK_DELTA" => Some(EventType::BookDelta),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl TradeSide {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the order book a delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    #[serde(rename = "BID")]
    Bid,
    #[serde(rename = "ASK")]
    Ask,
}

impl BookSide {
    pub fn as_str(self) -> &'static str {
        match self {
            BookSide::Bid => "BID",
            BookSide::Ask => "ASK",
        }
    }
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified market event.
///
/// Field layout mirrors the columnar output schema one-to-one (see
/// `sink::schema`), so a written event reads back identical on all fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedEvent {
    /// Origin timestamp, nanoseconds UTC.
    pub event_timestamp: i64,
    pub event_type: EventType,
    pub update_id: Option<i64>,

    // Trade fields
    pub trade_id: Option<i64>,
    pub trade_price: Option<FixedDecimal>,
    pub trade_quantity: Option<FixedDecimal>,
    pub trade_side: Option<TradeSide>,

    // Snapshot fields
    pub bids: Option<Vec<Level>>,
    pub asks: Option<Vec<Level>>,
    pub is_snapshot: Option<bool>,

    // Delta fields
    pub delta_side: Option<BookSide>,
    pub delta_price: Option<FixedDecimal>,
    pub delta_quantity: Option<FixedDecimal>,
}

impl UnifiedEvent {
    fn empty(event_timestamp: i64, event_type: EventType) -> Self {
        UnifiedEvent {
            event_timestamp,
            event_type,
            update_id: None,
            trade_id: None,
            trade_price: None,
            trade_quantity: None,
            trade_side: None,
            bids: None,
            asks: None,
            is_snapshot: None,
            delta_side: None,
            delta_price: None,
            delta_quantity: None,
        }
    }

    pub fn trade(
        event_timestamp: i64,
        trade_id: Option<i64>,
        price: FixedDecimal,
        quantity: FixedDecimal,
        side: TradeSide,
    ) -> Self {
        UnifiedEvent {
            trade_id,
            trade_price: Some(price),
            trade_quantity: Some(quantity),
            trade_side: Some(side),
            ..Self::empty(event_timestamp, EventType::Trade)
        }
    }

    pub fn snapshot(
        event_timestamp: i64,
        update_id: Option<i64>,
        bids: Vec<Level>,
        asks: Vec<Level>,
    ) -> Self {
        UnifiedEvent {
            update_id,
            bids: Some(bids),
            asks: Some(asks),
            is_snapshot: Some(true),
            ..Self::empty(event_timestamp, EventType::BookSnapshot)
        }
    }

    pub fn delta(
        event_timestamp: i64,
        update_id: Option<i64>,
        side: BookSide,
        price: FixedDecimal,
        quantity: FixedDecimal,
    ) -> Self {
        UnifiedEvent {
            update_id,
            delta_side: Some(side),
            delta_price: Some(price),
            delta_quantity: Some(quantity),
            ..Self::empty(event_timestamp, EventType::BookDelta)
        }
    }

    /// Sort key for chronological replay: `(event_timestamp, update_id)`.
    ///
    /// Events without an update_id sort before those with one at the same
    /// timestamp, which keeps snapshots ahead of the deltas they anchor.
    #[inline]
    pub fn sort_key(&self) -> (i64, i64) {
        (self.event_timestamp, self.update_id.unwrap_or(i64::MIN))
    }
}

/// A replayer output event: the unified event plus book-state enrichment
/// captured *after* the event was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEvent {
    pub event: UnifiedEvent,
    /// Best bid `(price, quantity)` after application.
    pub top_bid: Option<Level>,
    /// Best ask `(price, quantity)` after application.
    pub top_ask: Option<Level>,
    /// `best_ask.price - best_bid.price`; negative when the book is crossed.
    pub spread: Option<FixedDecimal>,
    /// Drift metrics, present on snapshots once the book is initialized.
    pub drift: Option<DriftMetrics>,
}

/// A detected discontinuity in the delta update_id sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGap {
    pub expected: u64,
    pub actual: u64,
    pub gap_size: u64,
    /// Wall-clock detection time, milliseconds UTC.
    pub wall_time: i64,
    /// Origin time of the event that revealed the gap, if known.
    pub origin_time: Option<i64>,
}

impl fmt::Display for SequenceGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gap: expected={}, actual={}, size={}",
            self.expected, self.actual, self.gap_size
        )
    }
}

/// Drift between the reconstructed book and an authoritative snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetrics {
    /// Combined RMS of per-side relative quantity errors.
    pub rms_error: f64,
    pub bid_rms: f64,
    pub ask_rms: f64,
    /// Largest single-level relative deviation.
    pub max_deviation: f64,
    /// Level-count difference, bid side.
    pub bid_level_diff: u32,
    /// Level-count difference, ask side.
    pub ask_level_diff: u32,
    /// Ordinal of the snapshot this was computed against.
    pub snapshot_number: u64,
    pub exceeded_threshold: bool,
}
