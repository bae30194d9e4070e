//! Shared code for the tapeline binaries.

pub mod common;
