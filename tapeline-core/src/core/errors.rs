//! Pipeline error taxonomy
//!
//! One enum covers every failure the pipeline distinguishes. The split that
//! matters operationally is `is_fatal()`: recoverable kinds are counted and
//! logged at the point of occurrence and processing continues; fatal kinds
//! bubble to the worker entry point, which takes a final checkpoint and
//! exits non-zero.

use crate::core::fixed_point::DecimalError;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ErrorKind>;

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Event is missing required fields or carries unparseable values.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Delta arrived with `update_id` at or below the applied cursor.
    #[error("out-of-order update: update_id {update_id} <= last applied {last}")]
    OutOfOrder { update_id: u64, last: u64 },

    /// Decimal parse/arithmetic failure. Fatal: scale loss corrupts books.
    #[error("decimal error: {0}")]
    DecimalOverflow(#[from] DecimalError),

    /// A ladder or book invariant no longer holds after an operation.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Filesystem failure on a write/rename path. Retried with backoff by
    /// the caller; persistent failure becomes fatal.
    #[error("I/O failure: {0}")]
    TransientIo(#[from] std::io::Error),

    /// Arrow/Parquet layer failure while building or writing a batch.
    #[error("columnar write failed: {0}")]
    Columnar(String),

    /// Checkpoint file failed validation (checksum, schema, fields).
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// JSON (de)serialization failure for durable records.
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// A bounded router queue rejected a message.
    #[error("queue full for symbol {symbol}")]
    QueueFull { symbol: String },

    /// A supervised worker terminated abnormally.
    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    /// Shutdown was requested while an operation was in flight.
    #[error("shutdown in progress")]
    Shutdown,
}

impl ErrorKind {
    /// Whether this error must stop the worker.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::DecimalOverflow(_)
                | ErrorKind::InvariantViolation(_)
                | ErrorKind::CorruptCheckpoint(_)
        )
    }
}

impl From<arrow::error::ArrowError> for ErrorKind {
    fn from(e: arrow::error::ArrowError) -> Self {
        ErrorKind::Columnar(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ErrorKind {
    fn from(e: parquet::errors::ParquetError) -> Self {
        ErrorKind::Columnar(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ErrorKind::InvariantViolation("bids unsorted".into()).is_fatal());
        assert!(ErrorKind::CorruptCheckpoint("bad crc".into()).is_fatal());
        assert!(!ErrorKind::MalformedInput("no side".into()).is_fatal());
        assert!(!ErrorKind::OutOfOrder { update_id: 5, last: 9 }.is_fatal());
        assert!(!ErrorKind::QueueFull { symbol: "BTCUSDT".into() }.is_fatal());
    }

    #[test]
    fn test_display_carries_context() {
        let err = ErrorKind::OutOfOrder { update_id: 5, last: 9 };
        let msg = err.to_string();
        assert!(msg.contains('5') && msg.contains('9'));
    }
}
