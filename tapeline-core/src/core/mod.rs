//! Core value types: fixed-point decimals, the unified event model, and the
//! pipeline error taxonomy.

pub mod errors;
pub mod fixed_point;
pub mod types;

pub use errors::{ErrorKind, Result};
pub use fixed_point::{DecimalError, FixedDecimal};
pub use types::{
    BookSide, DriftMetrics, EnrichedEvent, EventType, Level, SequenceGap, TradeSide, UnifiedEvent,
};
