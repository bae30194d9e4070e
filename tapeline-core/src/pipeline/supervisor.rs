//! Process Supervisor
//!
//! Spawns one worker task per symbol, watches heartbeat freshness, and
//! restarts crashed workers with bounded exponential backoff. A worker that
//! exhausts its restart budget is stopped permanently; the rest of the
//! pipeline keeps running.
//!
//! Worker lifecycle:
//!
//! ```text
//! INITIALIZING -> RUNNING -> {STOPPING, CRASHED} -> RESTARTING -> RUNNING
//!                                        \-> STOPPED (budget exhausted)
//! ```
//!
//! Shutdown: set the shared flag, send the sentinel on every queue, wait up
//! to `shutdown_timeout`, then abort survivors.

use crate::core::{ErrorKind, Result};
use crate::pipeline::router::SenderMap;
use crate::pipeline::worker::{SymbolWorker, WorkerMessage, WorkerSpec, WorkerStats};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Restarting,
}

/// Shared last-heartbeat cell, written by the worker loop every second and
/// read by the health monitor.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatCell(Arc<AtomicI64>);

impl HeartbeatCell {
    pub fn new() -> Self {
        let cell = HeartbeatCell(Arc::new(AtomicI64::new(0)));
        cell.beat();
        cell
    }

    pub fn beat(&self) {
        self.0
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_beat_ms(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        let now = chrono::Utc::now().timestamp_millis();
        Duration::from_millis((now - self.last_beat_ms()).max(0) as u64)
    }
}

/// Supervision policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Health poll cadence, seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Heartbeat age beyond which a worker counts as crashed, seconds.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Base restart backoff, seconds; doubles per consecutive restart.
    #[serde(default = "default_restart_backoff_secs")]
    pub restart_backoff_secs: f64,

    /// Graceful drain window before survivors are aborted, seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_heartbeat_timeout_secs() -> u64 {
    15
}

fn default_max_restart_attempts() -> u32 {
    5
}

fn default_restart_backoff_secs() -> f64 {
    1.0
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_backoff_secs: default_restart_backoff_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

struct SupervisedWorker {
    spec: WorkerSpec,
    state: WorkerState,
    heartbeat: HeartbeatCell,
    handle: JoinHandle<Result<WorkerStats>>,
    restart_count: u32,
    stats: Option<WorkerStats>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    workers: HashMap<String, SupervisedWorker>,
    senders: SenderMap,
    shutdown: Arc<AtomicBool>,
    /// True once any worker died with a fatal error or crash-looped out.
    degraded: bool,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Supervisor {
            config,
            workers: HashMap::new(),
            senders: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            degraded: false,
        }
    }

    /// The symbol→queue map to hand the router.
    pub fn senders(&self) -> SenderMap {
        self.senders.clone()
    }

    /// The flag every worker observes at its suspension points.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Whether any worker ended fatally or exhausted its restart budget.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn worker_state(&self, symbol: &str) -> Option<WorkerState> {
        self.workers.get(symbol).map(|w| w.state)
    }

    /// Spawn a worker for one symbol and register its queue.
    pub fn spawn_worker(&mut self, spec: WorkerSpec) -> Result<()> {
        if self.workers.contains_key(&spec.symbol) {
            return Err(ErrorKind::WorkerCrash(format!(
                "worker for {} already exists",
                spec.symbol
            )));
        }
        let worker = self.start_worker_task(&spec)?;
        self.workers.insert(spec.symbol.clone(), worker);
        Ok(())
    }

    fn start_worker_task(&self, spec: &WorkerSpec) -> Result<SupervisedWorker> {
        let (tx, rx) = mpsc::channel(spec.queue_size);
        let heartbeat = HeartbeatCell::new();
        let worker = SymbolWorker::new(spec.clone(), heartbeat.clone(), self.shutdown.clone())?;
        let handle = tokio::spawn(worker.run(rx));

        self.senders.write().insert(spec.symbol.clone(), tx);
        tracing::info!(symbol = %spec.symbol, "spawned worker");

        Ok(SupervisedWorker {
            spec: spec.clone(),
            state: WorkerState::Running,
            heartbeat,
            handle,
            restart_count: 0,
            stats: None,
        })
    }

    /// Supervise until shutdown is requested and all workers have exited.
    /// Returns the per-symbol stats of cleanly stopped workers.
    pub async fn supervise(&mut self) -> HashMap<String, WorkerStats> {
        let poll = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        loop {
            tokio::time::sleep(poll).await;
            self.poll_workers().await;

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let all_done = self
                .workers
                .values()
                .all(|w| matches!(w.state, WorkerState::Stopped));
            if all_done {
                break;
            }
        }
        self.shutdown().await
    }

    async fn poll_workers(&mut self) {
        let timeout = Duration::from_secs(self.config.heartbeat_timeout_secs);
        let symbols: Vec<String> = self.workers.keys().cloned().collect();

        for symbol in symbols {
            let (finished, stale) = {
                let worker = &self.workers[&symbol];
                if worker.state == WorkerState::Stopped {
                    continue;
                }
                (worker.handle.is_finished(), worker.heartbeat.age() > timeout)
            };

            if finished {
                let crashed = {
                    let worker = self.workers.get_mut(&symbol).expect("known symbol");
                    let crashed = match (&mut worker.handle).await {
                        Ok(Ok(stats)) => {
                            tracing::info!(%symbol, "worker exited cleanly");
                            worker.stats = Some(stats);
                            false
                        }
                        Ok(Err(err)) => {
                            tracing::error!(%symbol, %err, "worker exited with error");
                            true
                        }
                        Err(err) => {
                            tracing::error!(%symbol, %err, "worker task panicked");
                            true
                        }
                    };
                    worker.state = if crashed {
                        WorkerState::Crashed
                    } else {
                        WorkerState::Stopped
                    };
                    crashed
                };
                if crashed {
                    self.restart_worker(&symbol).await;
                }
            } else if stale && !self.shutdown.load(Ordering::Relaxed) {
                {
                    let worker = self.workers.get_mut(&symbol).expect("known symbol");
                    tracing::error!(
                        %symbol,
                        age_ms = worker.heartbeat.age().as_millis() as u64,
                        "worker heartbeat stale, treating as crashed"
                    );
                    worker.handle.abort();
                    worker.state = WorkerState::Crashed;
                }
                self.restart_worker(&symbol).await;
            }
        }
    }

    async fn restart_worker(&mut self, symbol: &str) {
        let (attempt, spec) = {
            let worker = self.workers.get_mut(symbol).expect("known symbol");
            worker.restart_count += 1;
            if worker.restart_count > self.config.max_restart_attempts {
                tracing::error!(
                    %symbol,
                    attempts = worker.restart_count - 1,
                    "restart budget exhausted, stopping worker permanently"
                );
                worker.state = WorkerState::Stopped;
                self.degraded = true;
                self.senders.write().remove(symbol);
                return;
            }
            worker.state = WorkerState::Restarting;
            (worker.restart_count, worker.spec.clone())
        };

        let delay = self.restart_delay(attempt);
        tracing::warn!(%symbol, attempt, delay_ms = delay.as_millis() as u64, "restarting worker");
        tokio::time::sleep(delay).await;

        match self.start_worker_task(&spec) {
            Ok(mut fresh) => {
                fresh.restart_count = attempt;
                fresh.state = WorkerState::Running;
                self.workers.insert(symbol.to_string(), fresh);
            }
            Err(err) => {
                tracing::error!(%symbol, %err, "respawn failed, stopping worker permanently");
                if let Some(worker) = self.workers.get_mut(symbol) {
                    worker.state = WorkerState::Stopped;
                }
                self.senders.write().remove(symbol);
                self.degraded = true;
            }
        }
    }

    /// Exponential backoff with ±10% jitter, capped at one minute.
    fn restart_delay(&self, attempt: u32) -> Duration {
        let base = self.config.restart_backoff_secs * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        Duration::from_secs_f64((base * jitter).min(60.0))
    }

    /// Flag, sentinel, drain window, then abort.
    pub async fn shutdown(&mut self) -> HashMap<String, WorkerStats> {
        self.shutdown.store(true, Ordering::Relaxed);
        for (symbol, sender) in self.senders.read().iter() {
            if sender.try_send(WorkerMessage::Shutdown).is_err() {
                tracing::debug!(%symbol, "shutdown sentinel not enqueued (queue full or closed)");
            }
        }

        let deadline = Duration::from_secs(self.config.shutdown_timeout_secs);
        let drain = async {
            for worker in self.workers.values_mut() {
                if worker.state == WorkerState::Stopped {
                    continue;
                }
                worker.state = WorkerState::Stopping;
                match (&mut worker.handle).await {
                    Ok(Ok(stats)) => {
                        worker.stats = Some(stats);
                        worker.state = WorkerState::Stopped;
                    }
                    Ok(Err(err)) => {
                        tracing::error!(symbol = %worker.spec.symbol, %err, "worker failed during drain");
                        worker.state = WorkerState::Stopped;
                    }
                    Err(err) => {
                        tracing::error!(symbol = %worker.spec.symbol, %err, "worker panicked during drain");
                        worker.state = WorkerState::Stopped;
                    }
                }
            }
        };

        let drained = tokio::time::timeout(deadline, drain).await;
        if drained.is_err() {
            tracing::error!("shutdown deadline exceeded, aborting surviving workers");
            for worker in self.workers.values_mut() {
                if worker.state != WorkerState::Stopped {
                    worker.handle.abort();
                    worker.state = WorkerState::Stopped;
                    self.degraded = true;
                }
            }
        }

        self.senders.write().clear();
        self.workers
            .iter()
            .filter_map(|(symbol, w)| w.stats.clone().map(|s| (symbol.clone(), s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointConfig;
    use crate::replay::ReplayConfig;
    use crate::sink::SinkConfig;

    fn spec(dir: &std::path::Path, symbol: &str) -> WorkerSpec {
        WorkerSpec {
            symbol: symbol.into(),
            output_root: dir.to_path_buf(),
            replay: ReplayConfig::default(),
            sink: SinkConfig::new(dir, symbol),
            checkpoint: CheckpointConfig::default(),
            queue_size: 16,
            cpu_core: None,
            memory_limit_mb: None,
        }
    }

    #[test]
    fn test_heartbeat_cell() {
        let cell = HeartbeatCell::new();
        assert!(cell.last_beat_ms() > 0);
        assert!(cell.age() < Duration::from_secs(5));
    }

    #[test]
    fn test_restart_delay_grows_and_caps() {
        let supervisor = Supervisor::new(SupervisorConfig {
            restart_backoff_secs: 1.0,
            ..SupervisorConfig::default()
        });
        let d1 = supervisor.restart_delay(1);
        let d3 = supervisor.restart_delay(3);
        assert!(d3 > d1);
        assert!(supervisor.restart_delay(30) <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_spawn_and_graceful_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(SupervisorConfig {
            shutdown_timeout_secs: 10,
            ..SupervisorConfig::default()
        });
        supervisor.spawn_worker(spec(dir.path(), "BTCUSDT")).unwrap();
        supervisor.spawn_worker(spec(dir.path(), "ETHUSDT")).unwrap();
        assert!(supervisor.spawn_worker(spec(dir.path(), "BTCUSDT")).is_err());

        assert_eq!(supervisor.senders().read().len(), 2);

        let stats = supervisor.shutdown().await;
        assert_eq!(stats.len(), 2);
        assert!(!supervisor.degraded());
        assert_eq!(
            supervisor.worker_state("BTCUSDT"),
            Some(WorkerState::Stopped)
        );
    }
}
