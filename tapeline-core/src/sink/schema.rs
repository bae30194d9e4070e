//! Columnar Schema
//!
//! One flat Arrow schema for unified events, written to Parquet. Price and
//! quantity columns are `decimal128(38, 18)` and receive the `FixedDecimal`
//! mantissa verbatim. Book levels are nested lists and are stored as JSON
//! text of `[[price, quantity], ...]` string pairs, which keeps the decimal
//! digits exact through the round trip.

use crate::core::{
    ErrorKind, EventType, FixedDecimal, Level, Result, TradeSide, UnifiedEvent,
};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Decimal128Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Decimal precision of price/quantity columns.
pub const DECIMAL_PRECISION: u8 = 38;

/// Decimal scale of price/quantity columns.
pub const DECIMAL_SCALE: i8 = 18;

fn decimal_type() -> DataType {
    DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE)
}

/// The unified event column schema (see the field list in `core::types`).
pub fn unified_event_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("event_timestamp", DataType::Int64, false),
        Field::new("event_type", DataType::Utf8, false),
        Field::new("update_id", DataType::Int64, true),
        Field::new("trade_id", DataType::Int64, true),
        Field::new("trade_price", decimal_type(), true),
        Field::new("trade_quantity", decimal_type(), true),
        Field::new("trade_side", DataType::Utf8, true),
        Field::new("bids", DataType::Utf8, true),
        Field::new("asks", DataType::Utf8, true),
        Field::new("is_snapshot", DataType::Boolean, true),
        Field::new("delta_side", DataType::Utf8, true),
        Field::new("delta_price", decimal_type(), true),
        Field::new("delta_quantity", decimal_type(), true),
    ]))
}

/// Serialize book levels as JSON text of string pairs.
pub fn levels_to_json(levels: &[Level]) -> Result<String> {
    let pairs: Vec<(String, String)> = levels
        .iter()
        .map(|(p, q)| (p.to_string(), q.to_string()))
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

/// Parse book levels back from their JSON text form.
pub fn levels_from_json(text: &str) -> Result<Vec<Level>> {
    let pairs: Vec<(String, String)> = serde_json::from_str(text)?;
    pairs
        .into_iter()
        .map(|(p, q)| {
            Ok((
                FixedDecimal::parse(&p).map_err(ErrorKind::from)?,
                FixedDecimal::parse(&q).map_err(ErrorKind::from)?,
            ))
        })
        .collect()
}

fn decimal_array(values: Vec<Option<i128>>) -> Result<Decimal128Array> {
    Decimal128Array::from(values)
        .with_precision_and_scale(DECIMAL_PRECISION, DECIMAL_SCALE)
        .map_err(ErrorKind::from)
}

/// Build a record batch from unified events.
pub fn events_to_batch(events: &[UnifiedEvent]) -> Result<RecordBatch> {
    let timestamps: Vec<i64> = events.iter().map(|e| e.event_timestamp).collect();
    let event_types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    let update_ids: Vec<Option<i64>> = events.iter().map(|e| e.update_id).collect();
    let trade_ids: Vec<Option<i64>> = events.iter().map(|e| e.trade_id).collect();
    let trade_prices: Vec<Option<i128>> =
        events.iter().map(|e| e.trade_price.map(FixedDecimal::mantissa)).collect();
    let trade_qtys: Vec<Option<i128>> =
        events.iter().map(|e| e.trade_quantity.map(FixedDecimal::mantissa)).collect();
    let trade_sides: Vec<Option<&str>> =
        events.iter().map(|e| e.trade_side.map(TradeSide::as_str)).collect();

    let mut bids = Vec::with_capacity(events.len());
    let mut asks = Vec::with_capacity(events.len());
    for event in events {
        bids.push(event.bids.as_deref().map(levels_to_json).transpose()?);
        asks.push(event.asks.as_deref().map(levels_to_json).transpose()?);
    }

    let is_snapshot: Vec<Option<bool>> = events.iter().map(|e| e.is_snapshot).collect();
    let delta_sides: Vec<Option<&str>> = events
        .iter()
        .map(|e| e.delta_side.map(crate::core::BookSide::as_str))
        .collect();
    let delta_prices: Vec<Option<i128>> =
        events.iter().map(|e| e.delta_price.map(FixedDecimal::mantissa)).collect();
    let delta_qtys: Vec<Option<i128>> =
        events.iter().map(|e| e.delta_quantity.map(FixedDecimal::mantissa)).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(timestamps)),
        Arc::new(StringArray::from(event_types)),
        Arc::new(Int64Array::from(update_ids)),
        Arc::new(Int64Array::from(trade_ids)),
        Arc::new(decimal_array(trade_prices)?),
        Arc::new(decimal_array(trade_qtys)?),
        Arc::new(StringArray::from(trade_sides)),
        Arc::new(StringArray::from(bids)),
        Arc::new(StringArray::from(asks)),
        Arc::new(BooleanArray::from(is_snapshot)),
        Arc::new(StringArray::from(delta_sides)),
        Arc::new(decimal_array(delta_prices)?),
        Arc::new(decimal_array(delta_qtys)?),
    ];

    RecordBatch::try_new(unified_event_schema(), columns).map_err(ErrorKind::from)
}

/// Restore unified events from a record batch.
pub fn batch_to_events(batch: &RecordBatch) -> Result<Vec<UnifiedEvent>> {
    fn col<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<T>())
            .ok_or_else(|| ErrorKind::Columnar(format!("missing or mistyped column {name}")))
    }

    let timestamps: &Int64Array = col(batch, "event_timestamp")?;
    let event_types: &StringArray = col(batch, "event_type")?;
    let update_ids: &Int64Array = col(batch, "update_id")?;
    let trade_ids: &Int64Array = col(batch, "trade_id")?;
    let trade_prices: &Decimal128Array = col(batch, "trade_price")?;
    let trade_qtys: &Decimal128Array = col(batch, "trade_quantity")?;
    let trade_sides: &StringArray = col(batch, "trade_side")?;
    let bids: &StringArray = col(batch, "bids")?;
    let asks: &StringArray = col(batch, "asks")?;
    let is_snapshot: &BooleanArray = col(batch, "is_snapshot")?;
    let delta_sides: &StringArray = col(batch, "delta_side")?;
    let delta_prices: &Decimal128Array = col(batch, "delta_price")?;
    let delta_qtys: &Decimal128Array = col(batch, "delta_quantity")?;

    let opt_i64 = |arr: &Int64Array, i: usize| (!arr.is_null(i)).then(|| arr.value(i));
    let opt_dec = |arr: &Decimal128Array, i: usize| {
        (!arr.is_null(i)).then(|| FixedDecimal::from_mantissa(arr.value(i)))
    };

    let mut events = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let event_type = EventType::from_str_opt(event_types.value(i)).ok_or_else(|| {
            ErrorKind::Columnar(format!("unknown event_type {:?}", event_types.value(i)))
        })?;

        let trade_side = (!trade_sides.is_null(i))
            .then(|| match trade_sides.value(i) {
                "BUY" => Ok(TradeSide::Buy),
                "SELL" => Ok(TradeSide::Sell),
                other => Err(ErrorKind::Columnar(format!("unknown trade_side {other:?}"))),
            })
            .transpose()?;
        let delta_side = (!delta_sides.is_null(i))
            .then(|| match delta_sides.value(i) {
                "BID" => Ok(crate::core::BookSide::Bid),
                "ASK" => Ok(crate::core::BookSide::Ask),
                other => Err(ErrorKind::Columnar(format!("unknown delta_side {other:?}"))),
            })
            .transpose()?;

        events.push(UnifiedEvent {
            event_timestamp: timestamps.value(i),
            event_type,
            update_id: opt_i64(update_ids, i),
            trade_id: opt_i64(trade_ids, i),
            trade_price: opt_dec(trade_prices, i),
            trade_quantity: opt_dec(trade_qtys, i),
            trade_side,
            bids: (!bids.is_null(i))
                .then(|| levels_from_json(bids.value(i)))
                .transpose()?,
            asks: (!asks.is_null(i))
                .then(|| levels_from_json(asks.value(i)))
                .transpose()?,
            is_snapshot: (!is_snapshot.is_null(i)).then(|| is_snapshot.value(i)),
            delta_side,
            delta_price: opt_dec(delta_prices, i),
            delta_quantity: opt_dec(delta_qtys, i),
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BookSide;

    fn dec(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn sample_events() -> Vec<UnifiedEvent> {
        vec![
            UnifiedEvent::snapshot(
                1_000,
                Some(1),
                vec![(dec("100"), dec("10"))],
                vec![(dec("101.000000000000000001"), dec("10"))],
            ),
            UnifiedEvent::delta(1_001, Some(2), BookSide::Bid, dec("99"), dec("5")),
            UnifiedEvent::trade(1_002, Some(7), dec("101"), dec("3.5"), TradeSide::Buy),
        ]
    }

    #[test]
    fn test_schema_shape() {
        let schema = unified_event_schema();
        assert_eq!(schema.fields().len(), 13);
        assert!(!schema.field_with_name("event_timestamp").unwrap().is_nullable());
        assert_eq!(
            schema.field_with_name("trade_price").unwrap().data_type(),
            &DataType::Decimal128(38, 18)
        );
    }

    #[test]
    fn test_batch_round_trip_is_exact() {
        let events = sample_events();
        let batch = events_to_batch(&events).unwrap();
        assert_eq!(batch.num_rows(), 3);
        let back = batch_to_events(&batch).unwrap();
        assert_eq!(back, events);
        // Exactness asserted textually, including the 18th fractional digit
        assert_eq!(
            back[0].asks.as_ref().unwrap()[0].0.to_string(),
            "101.000000000000000001"
        );
    }

    #[test]
    fn test_levels_json_round_trip() {
        let levels = vec![(dec("100.5"), dec("0.000000000000000001"))];
        let json = levels_to_json(&levels).unwrap();
        assert_eq!(json, r#"[["100.5","0.000000000000000001"]]"#);
        assert_eq!(levels_from_json(&json).unwrap(), levels);
    }

    #[test]
    fn test_nulls_preserved_per_event_type() {
        let events = sample_events();
        let batch = events_to_batch(&events).unwrap();
        let back = batch_to_events(&batch).unwrap();
        // Delta row has no trade or snapshot fields
        assert!(back[1].trade_price.is_none());
        assert!(back[1].bids.is_none());
        assert!(back[1].is_snapshot.is_none());
        // Trade row has no book fields
        assert!(back[2].delta_price.is_none());
        assert!(back[2].asks.is_none());
    }
}
