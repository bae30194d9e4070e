//! Multi-symbol orchestration: router, per-symbol workers, and the
//! supervisor that keeps them alive.

pub mod router;
pub mod supervisor;
pub mod worker;

pub use router::{RouterMetrics, RoutingStrategy, SenderMap, SymbolRouter};
pub use supervisor::{HeartbeatCell, Supervisor, SupervisorConfig, WorkerState};
pub use worker::{SymbolWorker, WorkerMessage, WorkerSpec, WorkerStats};
