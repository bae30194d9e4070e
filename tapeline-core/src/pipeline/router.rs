//! Symbol Router
//!
//! Dispatches raw input records onto per-symbol worker queues. Queues are
//! bounded; a full queue drops the record and bumps the per-symbol dropped
//! counter (ingest must never block on one slow symbol).
//!
//! Strategies:
//! - DIRECT: read the record's `symbol` field (alias `s`),
//! - HASH: hash the whole record across workers (symbol-less feeds),
//! - ROUND_ROBIN: rotate across workers.
//!
//! The sender map is shared with the supervisor behind a lock so worker
//! restarts swap in fresh queues without rebuilding the router.

use crate::pipeline::worker::WorkerMessage;
use crate::replay::normalizer::RawRecord;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Queue-depth fraction at which fullness warnings fire.
pub const QUEUE_FULLNESS_WARN: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutingStrategy {
    #[default]
    #[serde(rename = "DIRECT")]
    Direct,
    #[serde(rename = "HASH")]
    Hash,
    #[serde(rename = "ROUND_ROBIN")]
    RoundRobin,
}

/// Shared symbol → queue map (supervisor writes on restart, router reads).
pub type SenderMap = Arc<RwLock<HashMap<String, mpsc::Sender<WorkerMessage>>>>;

/// Routing counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterMetrics {
    pub routed: u64,
    pub dropped: u64,
    pub errors: u64,
    /// Wall time of the last successful route, milliseconds UTC.
    pub last_routed_ms: i64,
    pub routed_per_symbol: HashMap<String, u64>,
    pub dropped_per_symbol: HashMap<String, u64>,
    pub fullness_warnings: u64,
}

pub struct SymbolRouter {
    strategy: RoutingStrategy,
    /// Worker symbols in stable order, for HASH and ROUND_ROBIN indexing.
    symbols: Vec<String>,
    senders: SenderMap,
    rr_next: usize,
    metrics: RouterMetrics,
}

impl SymbolRouter {
    pub fn new(strategy: RoutingStrategy, senders: SenderMap) -> Self {
        let mut symbols: Vec<String> = senders.read().keys().cloned().collect();
        symbols.sort();
        SymbolRouter {
            strategy,
            symbols,
            senders,
            rr_next: 0,
            metrics: RouterMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Route one record. Returns `true` if it was enqueued.
    pub fn route(&mut self, record: RawRecord) -> bool {
        let symbol = match self.target_symbol(&record) {
            Some(symbol) => symbol,
            None => {
                self.metrics.errors += 1;
                tracing::warn!("record has no routable symbol, dropping");
                return false;
            }
        };

        let sender = self.senders.read().get(&symbol).cloned();
        let Some(sender) = sender else {
            self.metrics.errors += 1;
            tracing::warn!(%symbol, "no worker registered for symbol, dropping");
            return false;
        };

        self.warn_on_fullness(&symbol, &sender);

        match sender.try_send(WorkerMessage::Record(record)) {
            Ok(()) => {
                self.metrics.routed += 1;
                self.metrics.last_routed_ms = chrono::Utc::now().timestamp_millis();
                *self
                    .metrics
                    .routed_per_symbol
                    .entry(symbol)
                    .or_insert(0) += 1;
                true
            }
            Err(_) => {
                self.metrics.dropped += 1;
                *self
                    .metrics
                    .dropped_per_symbol
                    .entry(symbol)
                    .or_insert(0) += 1;
                tracing::debug!("worker queue full, dropping record");
                false
            }
        }
    }

    fn target_symbol(&mut self, record: &RawRecord) -> Option<String> {
        match self.strategy {
            RoutingStrategy::Direct => extract_symbol(record).map(str::to_string),
            RoutingStrategy::Hash => {
                if self.symbols.is_empty() {
                    return None;
                }
                let mut hasher = DefaultHasher::new();
                // Hash the whole record; symbol-less feeds have nothing
                // better to key on.
                serde_json::to_string(record).ok()?.hash(&mut hasher);
                let idx = (hasher.finish() % self.symbols.len() as u64) as usize;
                Some(self.symbols[idx].clone())
            }
            RoutingStrategy::RoundRobin => {
                if self.symbols.is_empty() {
                    return None;
                }
                let idx = self.rr_next % self.symbols.len();
                self.rr_next = self.rr_next.wrapping_add(1);
                Some(self.symbols[idx].clone())
            }
        }
    }

    fn warn_on_fullness(&mut self, symbol: &str, sender: &mpsc::Sender<WorkerMessage>) {
        let max = sender.max_capacity();
        if max == 0 {
            return;
        }
        let depth = max - sender.capacity();
        if depth as f64 >= max as f64 * QUEUE_FULLNESS_WARN {
            self.metrics.fullness_warnings += 1;
            tracing::warn!(symbol, depth, capacity = max, "worker queue above fullness threshold");
        }
    }
}

/// The record's own symbol: `symbol` or the `s` alias.
fn extract_symbol(record: &RawRecord) -> Option<&str> {
    for key in ["symbol", "s"] {
        if let Some(serde_json::Value::String(s)) = record.get(key) {
            return Some(s);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sender_map(symbols: &[&str], capacity: usize) -> (SenderMap, Vec<mpsc::Receiver<WorkerMessage>>) {
        let mut map = HashMap::new();
        let mut receivers = Vec::new();
        for symbol in symbols {
            let (tx, rx) = mpsc::channel(capacity);
            map.insert(symbol.to_string(), tx);
            receivers.push(rx);
        }
        (Arc::new(RwLock::new(map)), receivers)
    }

    #[test]
    fn test_direct_routing() {
        let (senders, mut rxs) = sender_map(&["BTCUSDT", "ETHUSDT"], 4);
        let mut router = SymbolRouter::new(RoutingStrategy::Direct, senders);

        assert!(router.route(record(json!({"symbol": "BTCUSDT", "price": "1"}))));
        assert!(router.route(record(json!({"s": "BTCUSDT", "price": "2"}))));
        assert!(!router.route(record(json!({"price": "3"})))); // no symbol
        assert!(!router.route(record(json!({"symbol": "XRPUSDT"})))); // no worker

        assert_eq!(router.metrics().routed, 2);
        assert_eq!(router.metrics().errors, 2);
        assert_eq!(router.metrics().routed_per_symbol["BTCUSDT"], 2);

        let mut delivered = 0;
        while rxs[0].try_recv().is_ok() || rxs[1].try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);
    }

    #[test]
    fn test_full_queue_drops() {
        let (senders, _rxs) = sender_map(&["BTCUSDT"], 1);
        let mut router = SymbolRouter::new(RoutingStrategy::Direct, senders);

        assert!(router.route(record(json!({"symbol": "BTCUSDT"}))));
        assert!(!router.route(record(json!({"symbol": "BTCUSDT"}))));
        assert_eq!(router.metrics().dropped, 1);
        assert_eq!(router.metrics().dropped_per_symbol["BTCUSDT"], 1);
    }

    #[test]
    fn test_round_robin_rotates() {
        let (senders, mut rxs) = sender_map(&["AAA", "BBB"], 8);
        let mut router = SymbolRouter::new(RoutingStrategy::RoundRobin, senders);
        for _ in 0..4 {
            assert!(router.route(record(json!({"x": 1}))));
        }
        let mut counts = [0usize; 2];
        for (i, rx) in rxs.iter_mut().enumerate() {
            while rx.try_recv().is_ok() {
                counts[i] += 1;
            }
        }
        assert_eq!(counts, [2, 2]);
    }

    #[test]
    fn test_hash_routing_is_deterministic() {
        let (senders, _rxs) = sender_map(&["AAA", "BBB"], 8);
        let mut router = SymbolRouter::new(RoutingStrategy::Hash, senders.clone());
        let rec = record(json!({"update_id": 7, "price": "1"}));
        assert!(router.route(rec.clone()));

        let mut router2 = SymbolRouter::new(RoutingStrategy::Hash, senders);
        assert!(router2.route(rec));
        assert_eq!(
            router.metrics().routed_per_symbol,
            router2.metrics().routed_per_symbol
        );
    }

    #[test]
    fn test_sender_swap_after_restart() {
        let (senders, _old_rx) = sender_map(&["BTCUSDT"], 1);
        let mut router = SymbolRouter::new(RoutingStrategy::Direct, senders.clone());

        // Replace the worker queue as the supervisor would on restart
        let (tx, mut new_rx) = mpsc::channel(4);
        senders.write().insert("BTCUSDT".to_string(), tx);

        assert!(router.route(record(json!({"symbol": "BTCUSDT"}))));
        assert!(new_rx.try_recv().is_ok());
    }
}
