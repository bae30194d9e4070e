//! Partitioned columnar output: schema, atomic writer, manifest, and the
//! matching read paths.

pub mod manifest;
pub mod readers;
pub mod schema;
pub mod writer;

pub use manifest::{Manifest, ManifestEntry, ManifestStats};
pub use readers::{list_partition_files, read_events_parquet, read_jsonl_records};
pub use schema::{batch_to_events, events_to_batch, unified_event_schema};
pub use writer::{hour_partition_key, DataSink, SinkConfig, SinkStats};
