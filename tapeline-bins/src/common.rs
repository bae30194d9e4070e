//! Common utilities for all binaries
//!
//! Shared initialization and summary printing.

use anyhow::Result;
use std::collections::HashMap;
use tapeline_core::pipeline::WorkerStats;

/// Initialize tracing/logging
pub fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    tapeline_core::utils::init_logger(level, json_logs)
}

/// Print final per-symbol statistics
pub fn print_worker_stats(stats: &HashMap<String, WorkerStats>) {
    tracing::info!("=== Final Statistics ===");
    for (symbol, s) in stats {
        tracing::info!(
            "{}: messages={} events={} files={} checkpoints={} recoverable_errors={}",
            symbol,
            s.messages,
            s.events_emitted,
            s.sink.files_written,
            s.checkpoints,
            s.recoverable_errors
        );
    }
    let total_events: u64 = stats.values().map(|s| s.events_emitted).sum();
    tracing::info!("Total events written: {}", total_events);
}
