//! Tapeline Core - Chronological Market Event Reconstruction
//!
//! Tapeline rebuilds a chronologically unified, decimal-exact stream of
//! market events (trades, book snapshots, book deltas) from heterogeneous
//! historical inputs and persists it as hour-partitioned Parquet suitable
//! for backtesting.
//!
//! ## Architecture
//! - **One worker task per symbol**, single-owner state, no shared mutation
//! - **Bounded queues everywhere** (router→worker, worker→sink)
//! - **decimal128(38,18)** fixed-point on every price/quantity path
//! - **Atomic writes** (tmp + rename) for partitions, checkpoints, and the
//!   manifest
//!
//! ## Core Modules
//! - `core`: fixed-point decimal, unified event model, error taxonomy
//! - `orderbook`: bounded ladders and the two-sided book state
//! - `replay`: sequencer, drift tracker, normalizer, chronological replayer
//! - `sink`: partitioned Parquet writer, manifest, input readers
//! - `checkpoint`: checkpoint manager, WAL, recovery manager
//! - `pipeline`: symbol router, per-symbol workers, supervisor
//! - `config`: serde configuration
//! - `perf`: CPU pinning, resource caps

pub mod core;

pub mod checkpoint;
pub mod config;
pub mod orderbook;
pub mod pipeline;
pub mod replay;
pub mod sink;
pub mod utils;

// Performance utilities
pub mod perf;

// Re-export core types
pub use crate::core::{
    BookSide, DriftMetrics, EnrichedEvent, ErrorKind, EventType, FixedDecimal, Level, SequenceGap,
    TradeSide, UnifiedEvent,
};

/// Prelude for convenient imports
pub mod prelude {
    // Value types
    pub use crate::core::{
        BookSide, EnrichedEvent, ErrorKind, EventType, FixedDecimal, Level, Result, TradeSide,
        UnifiedEvent,
    };

    // Replay engine
    pub use crate::orderbook::OrderBook;
    pub use crate::replay::{BookSyncState, ChronologicalReplayer, RawRecord, ReplayConfig};

    // Output
    pub use crate::sink::{DataSink, Manifest, SinkConfig};

    // Checkpointing
    pub use crate::checkpoint::{CheckpointManager, RecoveryManager, StateProvider};

    // Orchestration
    pub use crate::config::{PipelineConfig, SymbolConfig};
    pub use crate::pipeline::{RoutingStrategy, Supervisor, SymbolRouter, WorkerSpec};
}
