//! Pipeline configuration types and loading.

pub mod types;

pub use types::{PipelineConfig, SinkSettings, SymbolConfig};
