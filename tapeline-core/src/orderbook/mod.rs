//! L2 order book: bounded per-side ladders and the two-sided book state.

pub mod book;
pub mod ladder;

pub use book::{BookImage, OrderBook};
pub use ladder::{BoundedLadder, DEFAULT_DEEP_CEILING, DEFAULT_MAX_LEVELS};
