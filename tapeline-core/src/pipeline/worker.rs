//! Symbol Worker
//!
//! The single-owner event loop for one symbol: recover from the latest
//! checkpoint, then pull routed records, replay them, feed the enriched
//! stream into the data sink, and checkpoint on the configured cadence.
//!
//! All mutable pipeline state (book, cursors, batches) lives on this task;
//! nothing is shared, so nothing needs locking. The only cross-task edges
//! are the bounded input queue, the bounded sink queue, the heartbeat cell,
//! and the shutdown flag.

use crate::checkpoint::{
    CheckpointConfig, CheckpointManager, CheckpointState, Continuity, RecoveryManager,
    StateProvider, CHECKPOINT_SCHEMA_VERSION,
};
use crate::core::{ErrorKind, Result, UnifiedEvent};
use crate::orderbook::OrderBook;
use crate::pipeline::supervisor::HeartbeatCell;
use crate::replay::normalizer::RawRecord;
use crate::replay::{ChronologicalReplayer, ReplayConfig};
use crate::sink::{DataSink, SinkConfig, SinkStats};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Records replayed per batch before the loop yields back to the queue.
const REPLAY_BATCH: usize = 256;

/// Messages a worker consumes from its router queue.
#[derive(Debug)]
pub enum WorkerMessage {
    Record(RawRecord),
    /// The ingest side started reading a new source file; checkpoints
    /// record this as the resume position.
    SourceMarker { file: String },
    /// Drain the replayer carry and flush the sink.
    Flush,
    /// Shutdown sentinel: drain everything and exit.
    Shutdown,
}

/// Per-worker launch parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub symbol: String,
    pub output_root: PathBuf,
    pub replay: ReplayConfig,
    pub sink: SinkConfig,
    pub checkpoint: CheckpointConfig,
    /// Router→worker queue capacity.
    pub queue_size: usize,
    pub cpu_core: Option<usize>,
    pub memory_limit_mb: Option<u64>,
}

impl WorkerSpec {
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_root.join(&self.symbol).join("checkpoints")
    }
}

/// Final worker accounting, returned when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub messages: u64,
    pub events_emitted: u64,
    pub recoverable_errors: u64,
    pub checkpoints: u64,
    pub sink: SinkStats,
}

struct CapturedState(CheckpointState);

impl StateProvider for CapturedState {
    fn capture(&self) -> CheckpointState {
        self.0.clone()
    }
}

pub struct SymbolWorker {
    spec: WorkerSpec,
    replayer: ChronologicalReplayer,
    checkpoints: CheckpointManager,
    heartbeat: HeartbeatCell,
    shutdown: Arc<AtomicBool>,
    /// Cursor recovered from the checkpoint, pending continuity validation
    /// against the first live delta.
    recovered_cursor: Option<u64>,
    events_processed: u64,
    current_file: Option<String>,
    file_offset: u64,
    stats: WorkerStats,
}

impl SymbolWorker {
    /// Recover state and construct the worker. Fatal on unreadable
    /// checkpoint *directory*; unreadable checkpoint *files* fall back per
    /// the recovery rules.
    pub fn new(
        spec: WorkerSpec,
        heartbeat: HeartbeatCell,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        if let Some(core) = spec.cpu_core {
            if let Err(err) = crate::perf::pin_to_core(core) {
                tracing::warn!(%err, core, "CPU pinning failed, continuing unpinned");
            }
        }
        if let Some(limit) = spec.memory_limit_mb {
            if let Err(err) = crate::perf::set_memory_limit_mb(limit) {
                tracing::warn!(%err, limit, "memory cap not applied");
            }
        }

        let checkpoint_dir = spec.checkpoint_dir();
        let recovery =
            RecoveryManager::new(&checkpoint_dir, &spec.symbol, spec.replay.gap_threshold);
        let recovered = recovery.attempt_recovery()?;

        let (replayer, recovered_cursor, events_processed, current_file, file_offset) =
            match recovered {
                Some(r) => {
                    let book = OrderBook::restore(&r.state.book, spec.replay.deep_ladder_ceiling);
                    let (file, offset, cursor) = {
                        let (f, o, c) = r.resume_position();
                        (f.map(str::to_string), o, c)
                    };
                    (
                        ChronologicalReplayer::with_book(spec.replay.clone(), book),
                        Some(cursor),
                        r.state.events_processed,
                        file,
                        offset,
                    )
                }
                None => (
                    ChronologicalReplayer::new(&spec.symbol, spec.replay.clone()),
                    None,
                    0,
                    None,
                    0,
                ),
            };

        let checkpoints =
            CheckpointManager::new(&checkpoint_dir, &spec.symbol, spec.checkpoint.clone())?;

        Ok(SymbolWorker {
            spec,
            replayer,
            checkpoints,
            heartbeat,
            shutdown,
            recovered_cursor,
            events_processed,
            current_file,
            file_offset,
            stats: WorkerStats::default(),
        })
    }

    /// Run until the queue closes, a shutdown sentinel arrives, or a fatal
    /// error occurs. A final checkpoint is taken on every exit path that
    /// still has a consistent state to record.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) -> Result<WorkerStats> {
        tracing::info!(
            symbol = %self.spec.symbol,
            recovered_cursor = ?self.recovered_cursor,
            "worker started"
        );

        let sink = DataSink::new(self.spec.sink.clone())?;
        let (sink_tx, sink_rx) = mpsc::channel::<UnifiedEvent>(self.spec.sink.queue_size);
        let sink_task = tokio::spawn(sink.run(sink_rx));

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut batch: Vec<RawRecord> = Vec::with_capacity(REPLAY_BATCH);

        let outcome: Result<()> = loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(WorkerMessage::Record(record)) => {
                            self.stats.messages += 1;
                            self.file_offset += 1;
                            batch.push(record);
                            if batch.len() >= REPLAY_BATCH {
                                if let Err(err) = self.replay_batch(&mut batch, &sink_tx).await {
                                    break Err(err);
                                }
                            }
                        }
                        Some(WorkerMessage::SourceMarker { file }) => {
                            self.current_file = Some(file);
                            self.file_offset = 0;
                        }
                        Some(WorkerMessage::Flush) => {
                            if let Err(err) = self.replay_batch(&mut batch, &sink_tx).await {
                                break Err(err);
                            }
                            if let Err(err) = self.flush_carry(&sink_tx).await {
                                break Err(err);
                            }
                        }
                        Some(WorkerMessage::Shutdown) => {
                            break self.drain_queue(&mut rx, &mut batch, &sink_tx).await;
                        }
                        None => break Ok(()),
                    }
                }
                _ = ticker.tick() => {
                    self.heartbeat.beat();
                    if self.shutdown.load(Ordering::Relaxed) {
                        break self.drain_queue(&mut rx, &mut batch, &sink_tx).await;
                    }
                    if let Err(err) = self.replay_batch(&mut batch, &sink_tx).await {
                        break Err(err);
                    }
                    match self.checkpoints.maybe_checkpoint(&CapturedState(self.capture_state())) {
                        Ok(Some(_)) => self.stats.checkpoints += 1,
                        Ok(None) => {}
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        // Drain: pending batch, replayer carry, then the sink.
        let drain: Result<()> = async {
            self.replay_batch(&mut batch, &sink_tx).await?;
            self.flush_carry(&sink_tx).await?;
            Ok(())
        }
        .await;

        drop(sink_tx);
        match sink_task.await {
            Ok(Ok(sink_stats)) => self.stats.sink = sink_stats,
            Ok(Err(err)) => {
                tracing::error!(symbol = %self.spec.symbol, %err, "sink failed during drain");
                if outcome.is_ok() && drain.is_ok() {
                    return Err(err);
                }
            }
            Err(err) => {
                tracing::error!(symbol = %self.spec.symbol, %err, "sink task panicked");
            }
        }

        // Final checkpoint regardless of outcome: the state is consistent
        // up to the last applied event.
        if let Err(err) = self
            .checkpoints
            .checkpoint(&CapturedState(self.capture_state()))
        {
            tracing::error!(symbol = %self.spec.symbol, %err, "final checkpoint failed");
        } else {
            self.stats.checkpoints += 1;
        }

        outcome.and(drain)?;
        tracing::info!(
            symbol = %self.spec.symbol,
            messages = self.stats.messages,
            events = self.stats.events_emitted,
            "worker stopped cleanly"
        );
        Ok(self.stats)
    }

    /// Drain queued messages up to the queue high-water mark on shutdown so
    /// routed-but-unprocessed records are not lost.
    async fn drain_queue(
        &mut self,
        rx: &mut mpsc::Receiver<WorkerMessage>,
        batch: &mut Vec<RawRecord>,
        sink_tx: &mpsc::Sender<UnifiedEvent>,
    ) -> Result<()> {
        let mut drained = 0usize;
        while drained < self.spec.queue_size {
            match rx.try_recv() {
                Ok(WorkerMessage::Record(record)) => {
                    self.stats.messages += 1;
                    self.file_offset += 1;
                    batch.push(record);
                    drained += 1;
                    if batch.len() >= REPLAY_BATCH {
                        self.replay_batch(batch, sink_tx).await?;
                    }
                }
                Ok(WorkerMessage::SourceMarker { file }) => {
                    self.current_file = Some(file);
                    self.file_offset = 0;
                }
                Ok(WorkerMessage::Flush) => {}
                Ok(WorkerMessage::Shutdown) | Err(_) => break,
            }
        }
        Ok(())
    }

    async fn replay_batch(
        &mut self,
        batch: &mut Vec<RawRecord>,
        sink_tx: &mpsc::Sender<UnifiedEvent>,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(batch);
        self.check_continuity(&records);

        let enriched = match self.replayer.process_raw_batch(&records) {
            Ok(events) => events,
            Err(err) if err.is_fatal() => {
                tracing::error!(symbol = %self.spec.symbol, %err, "fatal replay error");
                return Err(err);
            }
            Err(err) => {
                self.stats.recoverable_errors += 1;
                tracing::warn!(symbol = %self.spec.symbol, %err, "recoverable replay error");
                return Ok(());
            }
        };

        self.events_processed += enriched.len() as u64;
        for event in enriched {
            self.stats.events_emitted += 1;
            // Bounded send: sink backpressure suspends the worker here.
            sink_tx
                .send(event.event)
                .await
                .map_err(|_| ErrorKind::WorkerCrash("sink queue closed".into()))?;
        }
        Ok(())
    }

    async fn flush_carry(&mut self, sink_tx: &mpsc::Sender<UnifiedEvent>) -> Result<()> {
        let tail = self.replayer.flush()?;
        self.events_processed += tail.len() as u64;
        for event in tail {
            self.stats.events_emitted += 1;
            sink_tx
                .send(event.event)
                .await
                .map_err(|_| ErrorKind::WorkerCrash("sink queue closed".into()))?;
        }
        Ok(())
    }

    /// Validate the first live delta against the recovered cursor, once.
    /// Duplicates below the cursor are dropped by the sequencer; a gap
    /// beyond the threshold forces AWAITING_RESYNC before the batch runs.
    fn check_continuity(&mut self, records: &[RawRecord]) {
        let Some(last) = self.recovered_cursor else {
            return;
        };
        let first_update_id = records.iter().find_map(|r| {
            r.get("update_id")
                .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        });
        let Some(first) = first_update_id else {
            return;
        };
        self.recovered_cursor = None;

        let recovery = RecoveryManager::new(
            &self.spec.checkpoint_dir(),
            &self.spec.symbol,
            self.spec.replay.gap_threshold,
        );
        match recovery.validate_continuity(last, first.max(0) as u64) {
            Continuity::Duplicate => {
                tracing::warn!(
                    symbol = %self.spec.symbol,
                    first, last,
                    "resuming inside duplicate region, dropping until past cursor"
                );
            }
            Continuity::PerfectResume => {
                tracing::info!(symbol = %self.spec.symbol, first, "perfect resume after recovery");
            }
            Continuity::SmallGap(gap) => {
                tracing::warn!(symbol = %self.spec.symbol, gap, "small gap after recovery, accepting");
            }
            Continuity::ResyncRequired(gap) => {
                tracing::warn!(
                    symbol = %self.spec.symbol,
                    gap,
                    "large gap after recovery, awaiting snapshot"
                );
                self.replayer.enter_awaiting_resync();
            }
        }
    }

    fn capture_state(&self) -> CheckpointState {
        CheckpointState {
            symbol: self.spec.symbol.clone(),
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            last_update_id: self.replayer.book().last_update_id(),
            events_processed: self.events_processed,
            book: self.replayer.book().export(),
            gap_stats: self.replayer.sequencer().stats().clone(),
            drift_summary: self.replayer.drift_tracker().summary(),
            current_file: self.current_file.clone(),
            file_offset: self.file_offset,
            snapshot_count: self.replayer.book().snapshot_count(),
            wall_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(dir: &std::path::Path) -> WorkerSpec {
        WorkerSpec {
            symbol: "BTCUSDT".into(),
            output_root: dir.to_path_buf(),
            replay: ReplayConfig::default(),
            sink: SinkConfig::new(dir, "BTCUSDT"),
            checkpoint: CheckpointConfig::default(),
            queue_size: 64,
            cpu_core: None,
            memory_limit_mb: None,
        }
    }

    fn raw(value: serde_json::Value) -> RawRecord {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_worker_processes_and_drains_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let heartbeat = HeartbeatCell::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = SymbolWorker::new(spec(dir.path()), heartbeat, shutdown).unwrap();

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(worker.run(rx));

        tx.send(WorkerMessage::SourceMarker { file: "capture.jsonl".into() })
            .await
            .unwrap();
        tx.send(WorkerMessage::Record(raw(json!({
            "event_type": "BOOK_SNAPSHOT",
            "origin_time": 1_704_110_400_000_000_000i64,
            "update_id": 1,
            "bids": [["100", "10"]],
            "asks": [["101", "10"]],
        }))))
        .await
        .unwrap();
        tx.send(WorkerMessage::Record(raw(json!({
            "event_type": "BOOK_DELTA",
            "origin_time": 1_704_110_401_000_000_000i64,
            "update_id": 2,
            "side": "BID",
            "price": "99",
            "quantity": "5",
        }))))
        .await
        .unwrap();
        tx.send(WorkerMessage::Shutdown).await.unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.events_emitted, 2);
        assert_eq!(stats.sink.events_written, 2);
        // Shutdown took the final checkpoint
        assert!(stats.checkpoints >= 1);

        // State is recoverable for the next run
        let recovery = RecoveryManager::new(
            &dir.path().join("BTCUSDT/checkpoints"),
            "BTCUSDT",
            1_000,
        );
        let recovered = recovery.attempt_recovery().unwrap().unwrap();
        assert_eq!(recovered.state.last_update_id, 2);
        assert_eq!(recovered.state.current_file.as_deref(), Some("capture.jsonl"));
    }

    #[tokio::test]
    async fn test_worker_restarts_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        // First run: initialize and stop
        {
            let worker =
                SymbolWorker::new(spec(dir.path()), HeartbeatCell::new(), shutdown.clone())
                    .unwrap();
            let (tx, rx) = mpsc::channel(64);
            let handle = tokio::spawn(worker.run(rx));
            tx.send(WorkerMessage::Record(raw(json!({
                "event_type": "BOOK_SNAPSHOT",
                "origin_time": 1_704_110_400_000_000_000i64,
                "update_id": 5_000,
                "bids": [["100", "10"]],
                "asks": [["101", "10"]],
            }))))
            .await
            .unwrap();
            drop(tx);
            handle.await.unwrap().unwrap();
        }

        // Second run: book restored, duplicate region dropped
        let worker =
            SymbolWorker::new(spec(dir.path()), HeartbeatCell::new(), shutdown).unwrap();
        assert_eq!(worker.replayer.book().last_update_id(), 5_000);
        assert!(worker.replayer.book().initialized());

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(worker.run(rx));
        // Duplicate: update_id 4_998 <= 5_000 must not reach the sink twice
        tx.send(WorkerMessage::Record(raw(json!({
            "event_type": "BOOK_DELTA",
            "origin_time": 1_704_110_402_000_000_000i64,
            "update_id": 4_998,
            "side": "BID",
            "price": "99",
            "quantity": "1",
        }))))
        .await
        .unwrap();
        // Perfectly sequenced successor
        tx.send(WorkerMessage::Record(raw(json!({
            "event_type": "BOOK_DELTA",
            "origin_time": 1_704_110_403_000_000_000i64,
            "update_id": 5_001,
            "side": "BID",
            "price": "99",
            "quantity": "1",
        }))))
        .await
        .unwrap();
        drop(tx);
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.events_emitted, 1);
    }
}
