//! Checkpoint/recovery: periodic durable state capture with a WAL, and the
//! resume path that validates continuity after a crash.

pub mod manager;
pub mod recovery;
pub mod state;
pub mod wal;

pub use manager::{
    load_checkpoint, CheckpointConfig, CheckpointManager, CheckpointTrigger, EventCountTrigger,
    TimeTrigger, CHECKPOINT_EXT,
};
pub use recovery::{Continuity, RecoveredState, RecoveryManager};
pub use state::{CheckpointState, StateProvider, CHECKPOINT_SCHEMA_VERSION};
pub use wal::{CheckpointWal, WalEntry};
