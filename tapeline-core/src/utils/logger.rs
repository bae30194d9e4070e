//! Logging bootstrap
//!
//! One tracing-subscriber initialization shared by every pipeline binary.
//! `RUST_LOG` overrides the configured level; `json_logs` swaps the
//! human-readable layer for JSON lines suitable for log shippers.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `level` is the fallback filter directive when `RUST_LOG` is unset.
/// Errors if the directive does not parse or a subscriber is already
/// installed (second call in the same process).
pub fn init_logger(level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .try_init()?;
    }
    Ok(())
}
