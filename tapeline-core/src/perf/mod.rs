//! Performance utilities: CPU pinning and resource caps.

pub mod cpu;

pub use cpu::{num_cores, pin_to_core, set_memory_limit_mb};
