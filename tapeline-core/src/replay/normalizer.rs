//! Schema Normalizer
//!
//! Projects heterogeneous raw records (JSON maps from captures or columnar
//! row dumps) into the unified market event. Field synonyms per source are
//! resolved here, once, at the boundary; everything downstream sees one
//! shape.
//!
//! Prices and quantities are parsed from their *textual* representation
//! (serde_json is built with `arbitrary_precision`, so JSON number literals
//! reach us as the original digits, never as an f64).
//!
//! The normalizer also owns the pending-delta queue used while the pipeline
//! awaits a snapshot after a large sequence gap: deltas are held (bounded)
//! and drained when the snapshot arrives.

use crate::core::{
    BookSide, ErrorKind, EventType, FixedDecimal, Level, Result, TradeSide, UnifiedEvent,
};
use serde_json::Value;
use std::collections::VecDeque;

/// A raw input record: field name to JSON value.
pub type RawRecord = serde_json::Map<String, Value>;

/// Default bound on the pending-delta queue.
pub const DEFAULT_PENDING_QUEUE: usize = 1_000;

/// Timestamps below this magnitude are taken to be microseconds.
const NANOS_MAGNITUDE_FLOOR: i64 = 1_000_000_000_000;

const TRADE_PRICE_FIELDS: &[&str] = &["trade_price", "price", "exec_price"];
const TRADE_QTY_FIELDS: &[&str] = &["trade_quantity", "quantity", "amount", "exec_quantity"];
const TRADE_SIDE_FIELDS: &[&str] = &["trade_side", "side", "exec_side"];
const TRADE_ID_FIELDS: &[&str] = &["trade_id", "id", "exec_id"];
const TIMESTAMP_FIELDS: &[&str] = &["origin_time", "event_timestamp", "timestamp"];

#[derive(Debug)]
pub struct SchemaNormalizer {
    pending: VecDeque<UnifiedEvent>,
    pending_capacity: usize,
    awaiting_snapshot: bool,
    pending_dropped: u64,
}

impl Default for SchemaNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_QUEUE)
    }
}

impl SchemaNormalizer {
    pub fn new(pending_capacity: usize) -> Self {
        SchemaNormalizer {
            pending: VecDeque::new(),
            pending_capacity,
            awaiting_snapshot: false,
            pending_dropped: 0,
        }
    }

    /// Normalize one raw record into a unified event.
    pub fn normalize(&self, raw: &RawRecord) -> Result<UnifiedEvent> {
        let event_type = resolve_event_type(raw)?;
        let timestamp = resolve_timestamp(raw)?;
        let update_id = int_field(raw, &["update_id"]);

        match event_type {
            EventType::Trade => {
                let price = decimal_field(raw, TRADE_PRICE_FIELDS)?
                    .ok_or_else(|| ErrorKind::MalformedInput("trade missing price".into()))?;
                let quantity = decimal_field(raw, TRADE_QTY_FIELDS)?
                    .ok_or_else(|| ErrorKind::MalformedInput("trade missing quantity".into()))?;
                let side = trade_side(raw)?;
                let mut event =
                    UnifiedEvent::trade(timestamp, int_field(raw, TRADE_ID_FIELDS), price, quantity, side);
                event.update_id = update_id;
                Ok(event)
            }
            EventType::BookSnapshot => {
                let bids = raw.get("bids").map(normalize_levels).transpose()?;
                let asks = raw.get("asks").map(normalize_levels).transpose()?;
                if bids.is_none() && asks.is_none() {
                    return Err(ErrorKind::MalformedInput(
                        "snapshot missing both bids and asks".into(),
                    ));
                }
                Ok(UnifiedEvent::snapshot(
                    timestamp,
                    update_id,
                    bids.unwrap_or_default(),
                    asks.unwrap_or_default(),
                ))
            }
            EventType::BookDelta => {
                let side = delta_side(raw)?;
                let price = decimal_field(raw, &["delta_price", "price"])?
                    .ok_or_else(|| ErrorKind::MalformedInput("delta missing price".into()))?;
                let quantity = decimal_field(raw, &["delta_quantity", "quantity"])?
                    .ok_or_else(|| ErrorKind::MalformedInput("delta missing quantity".into()))?;
                Ok(UnifiedEvent::delta(timestamp, update_id, side, price, quantity))
            }
        }
    }

    // ---- pending-delta queue (awaiting-snapshot mode) ----

    #[inline]
    pub fn awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn set_awaiting_snapshot(&mut self, awaiting: bool) {
        self.awaiting_snapshot = awaiting;
    }

    /// Queue a delta while awaiting a snapshot. Bounded: overflow drops the
    /// incoming delta and counts it.
    pub fn queue_delta(&mut self, event: UnifiedEvent) {
        if self.pending.len() >= self.pending_capacity {
            self.pending_dropped += 1;
            tracing::warn!(
                capacity = self.pending_capacity,
                dropped = self.pending_dropped,
                "pending queue full, dropping delta"
            );
            return;
        }
        self.pending.push_back(event);
    }

    /// Drain queued deltas in arrival order and leave awaiting-snapshot
    /// mode. The caller re-applies those still fresh relative to the
    /// resync snapshot.
    pub fn drain_pending(&mut self) -> Vec<UnifiedEvent> {
        self.awaiting_snapshot = false;
        self.pending.drain(..).collect()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn pending_dropped(&self) -> u64 {
        self.pending_dropped
    }
}

/// Explicit `event_type` field, or inference from payload shape.
fn resolve_event_type(raw: &RawRecord) -> Result<EventType> {
    if let Some(Value::String(s)) = raw.get("event_type") {
        return EventType::from_str_opt(s)
            .ok_or_else(|| ErrorKind::MalformedInput(format!("unknown event_type {s:?}")));
    }
    if raw.get("is_snapshot").and_then(Value::as_bool) == Some(true)
        || (raw.contains_key("bids") && raw.contains_key("asks"))
    {
        return Ok(EventType::BookSnapshot);
    }
    if TRADE_ID_FIELDS.iter().any(|f| raw.contains_key(*f))
        && TRADE_SIDE_FIELDS.iter().any(|f| raw.contains_key(*f))
    {
        return Ok(EventType::Trade);
    }
    if raw.contains_key("delta_side") || (raw.contains_key("side") && raw.contains_key("update_id"))
    {
        return Ok(EventType::BookDelta);
    }
    Err(ErrorKind::MalformedInput(
        "event_type absent and not inferable".into(),
    ))
}

/// First non-null timestamp field, scaled to nanoseconds.
///
/// Magnitudes below 10^12 are microseconds and are multiplied by 1000;
/// anything larger is already nanoseconds.
fn resolve_timestamp(raw: &RawRecord) -> Result<i64> {
    match int_field(raw, TIMESTAMP_FIELDS) {
        Some(ts) if ts.abs() < NANOS_MAGNITUDE_FLOOR => Ok(ts * 1_000),
        Some(ts) => Ok(ts),
        None => Err(ErrorKind::MalformedInput("no timestamp field".into())),
    }
}

fn int_field(raw: &RawRecord, names: &[&str]) -> Option<i64> {
    for name in names {
        match raw.get(*name) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    return Some(v);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<i64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}

fn decimal_field(raw: &RawRecord, names: &[&str]) -> Result<Option<FixedDecimal>> {
    for name in names {
        if let Some(value) = raw.get(*name) {
            if value.is_null() {
                continue;
            }
            return value_to_decimal(value).map(Some);
        }
    }
    Ok(None)
}

/// Parse a JSON value into a decimal through its textual form.
fn value_to_decimal(value: &Value) -> Result<FixedDecimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        // With arbitrary_precision these are the literal input digits.
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ErrorKind::MalformedInput(format!(
                "expected decimal, got {other}"
            )))
        }
    };
    FixedDecimal::parse(&text).map_err(ErrorKind::from)
}

fn trade_side(raw: &RawRecord) -> Result<TradeSide> {
    for field in TRADE_SIDE_FIELDS {
        if let Some(Value::String(s)) = raw.get(*field) {
            return match s.to_ascii_uppercase().as_str() {
                "BUY" | "B" | "BID" => Ok(TradeSide::Buy),
                "SELL" | "S" | "ASK" | "OFFER" => Ok(TradeSide::Sell),
                other => Err(ErrorKind::MalformedInput(format!(
                    "unknown trade side {other:?}"
                ))),
            };
        }
    }
    Err(ErrorKind::MalformedInput("trade missing side".into()))
}

fn delta_side(raw: &RawRecord) -> Result<BookSide> {
    for field in ["delta_side", "side"] {
        if let Some(Value::String(s)) = raw.get(field) {
            return match s.to_ascii_uppercase().as_str() {
                "BID" | "B" | "BUY" => Ok(BookSide::Bid),
                "ASK" | "A" | "OFFER" | "SELL" => Ok(BookSide::Ask),
                other => Err(ErrorKind::MalformedInput(format!(
                    "unknown delta side {other:?}"
                ))),
            };
        }
    }
    Err(ErrorKind::MalformedInput("delta missing side".into()))
}

/// Normalize book levels from either `[price, qty]` pairs or
/// `{price, quantity}` maps.
fn normalize_levels(value: &Value) -> Result<Vec<Level>> {
    let Value::Array(items) = value else {
        if value.is_null() {
            return Ok(Vec::new());
        }
        return Err(ErrorKind::MalformedInput(format!(
            "book levels must be an array, got {value}"
        )));
    };

    let mut levels = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(pair) if pair.len() >= 2 => {
                levels.push((value_to_decimal(&pair[0])?, value_to_decimal(&pair[1])?));
            }
            Value::Object(map) => {
                let price = map
                    .get("price")
                    .or_else(|| map.get("p"))
                    .ok_or_else(|| ErrorKind::MalformedInput("level missing price".into()))?;
                let quantity = map
                    .get("quantity")
                    .or_else(|| map.get("q"))
                    .or_else(|| map.get("size"))
                    .ok_or_else(|| ErrorKind::MalformedInput("level missing quantity".into()))?;
                levels.push((value_to_decimal(price)?, value_to_decimal(quantity)?));
            }
            other => {
                return Err(ErrorKind::MalformedInput(format!(
                    "unrecognized level shape: {other}"
                )))
            }
        }
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn dec(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_trade_with_synonyms() {
        let normalizer = SchemaNormalizer::default();
        let record = raw(json!({
            "event_type": "TRADE",
            "origin_time": 1_700_000_000_000_000_000i64,
            "price": "101.5",
            "amount": "3",
            "side": "b",
            "id": 42,
        }));
        let event = normalizer.normalize(&record).unwrap();
        assert_eq!(event.event_type, EventType::Trade);
        assert_eq!(event.trade_price, Some(dec("101.5")));
        assert_eq!(event.trade_quantity, Some(dec("3")));
        assert_eq!(event.trade_side, Some(TradeSide::Buy));
        assert_eq!(event.trade_id, Some(42));
    }

    #[test]
    fn test_microsecond_timestamps_scaled() {
        let normalizer = SchemaNormalizer::default();
        let record = raw(json!({
            "event_type": "TRADE",
            "origin_time": 1_000i64, // magnitude < 10^12: microseconds
            "price": "1",
            "quantity": "1",
            "side": "SELL",
        }));
        let event = normalizer.normalize(&record).unwrap();
        assert_eq!(event.event_timestamp, 1_000_000);
    }

    #[test]
    fn test_nanosecond_timestamps_passed_through() {
        let normalizer = SchemaNormalizer::default();
        let ns = 1_700_000_000_000_000_123i64;
        let record = raw(json!({
            "event_type": "TRADE",
            "timestamp": ns,
            "price": "1",
            "quantity": "1",
            "side": "SELL",
        }));
        assert_eq!(normalizer.normalize(&record).unwrap().event_timestamp, ns);
    }

    #[test]
    fn test_snapshot_levels_both_shapes() {
        let normalizer = SchemaNormalizer::default();
        let record = raw(json!({
            "event_type": "BOOK_SNAPSHOT",
            "origin_time": 1_700_000_000_000_000_000i64,
            "update_id": 10,
            "bids": [["100", "10"], {"price": "99.5", "quantity": "2"}],
            "asks": [{"p": "101", "q": "7"}],
        }));
        let event = normalizer.normalize(&record).unwrap();
        assert_eq!(
            event.bids,
            Some(vec![(dec("100"), dec("10")), (dec("99.5"), dec("2"))])
        );
        assert_eq!(event.asks, Some(vec![(dec("101"), dec("7"))]));
        assert_eq!(event.is_snapshot, Some(true));
        assert_eq!(event.update_id, Some(10));
    }

    #[test]
    fn test_delta_requires_side() {
        let normalizer = SchemaNormalizer::default();
        let record = raw(json!({
            "event_type": "BOOK_DELTA",
            "origin_time": 1_700_000_000_000_000_000i64,
            "update_id": 2,
            "price": "99",
            "quantity": "5",
        }));
        let err = normalizer.normalize(&record).unwrap_err();
        assert!(matches!(err, ErrorKind::MalformedInput(_)));
    }

    #[test]
    fn test_json_number_parses_exactly() {
        // arbitrary_precision keeps the literal digits: no f64 rounding
        let record: RawRecord = serde_json::from_str(
            r#"{"event_type":"BOOK_DELTA","origin_time":1700000000000000000,
                "update_id":2,"side":"ASK","price":0.123456789012345678,"quantity":1}"#,
        )
        .unwrap();
        let normalizer = SchemaNormalizer::default();
        let event = normalizer.normalize(&record).unwrap();
        assert_eq!(event.delta_price.unwrap().to_string(), "0.123456789012345678");
    }

    #[test]
    fn test_event_type_inference() {
        let normalizer = SchemaNormalizer::default();

        let snap = raw(json!({
            "origin_time": 1_700_000_000_000_000_000i64,
            "bids": [], "asks": [],
        }));
        assert_eq!(
            normalizer.normalize(&snap).unwrap().event_type,
            EventType::BookSnapshot
        );

        let trade = raw(json!({
            "origin_time": 1_700_000_000_000_000_000i64,
            "trade_id": 1, "price": "5", "quantity": "1", "side": "BUY",
        }));
        assert_eq!(normalizer.normalize(&trade).unwrap().event_type, EventType::Trade);

        let unknown = raw(json!({"origin_time": 1_700_000_000_000_000_000i64}));
        assert!(normalizer.normalize(&unknown).is_err());
    }

    #[test]
    fn test_pending_queue_bounds() {
        let mut normalizer = SchemaNormalizer::new(2);
        normalizer.set_awaiting_snapshot(true);

        for id in 0..3 {
            normalizer.queue_delta(UnifiedEvent::delta(
                id,
                Some(id),
                BookSide::Bid,
                dec("1"),
                dec("1"),
            ));
        }
        assert_eq!(normalizer.pending_len(), 2);
        assert_eq!(normalizer.pending_dropped(), 1);

        let drained = normalizer.drain_pending();
        assert_eq!(drained.len(), 2);
        assert!(!normalizer.awaiting_snapshot());
        assert_eq!(normalizer.pending_len(), 0);
    }
}
