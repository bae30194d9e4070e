use crate::checkpoint::CheckpointConfig;
use crate::core::Result;
use crate::pipeline::router::RoutingStrategy;
use crate::pipeline::supervisor::SupervisorConfig;
use crate::pipeline::worker::WorkerSpec;
use crate::replay::ReplayConfig;
use crate::sink::SinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration, loaded from a JSON file. Every field
/// has a default so a minimal config is just an output root and a symbol
/// list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output_root: PathBuf,

    pub symbols: Vec<SymbolConfig>,

    #[serde(default)]
    pub routing_strategy: RoutingStrategy,

    /// Router→worker queue capacity per symbol.
    #[serde(default = "default_input_queue_size")]
    pub input_queue_size: usize,

    #[serde(default)]
    pub replay: ReplayConfig,

    #[serde(default)]
    pub sink: SinkSettings,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,
}

fn default_input_queue_size() -> usize {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One symbol's worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pin this symbol's worker to a core.
    #[serde(default)]
    pub cpu_core: Option<usize>,

    /// Address-space cap (process-wide when set).
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl SymbolConfig {
    pub fn new(name: &str) -> Self {
        SymbolConfig {
            name: name.to_string(),
            enabled: true,
            cpu_core: None,
            memory_limit_mb: None,
        }
    }
}

/// Sink tunables shared by all symbols; the per-symbol `SinkConfig` is
/// derived by joining in the output root and symbol name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_batch_memory_mb")]
    pub max_batch_memory_mb: usize,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: usize,

    #[serde(default = "default_compression")]
    pub compression_codec: String,

    #[serde(default = "default_sink_queue_size")]
    pub queue_size: usize,
}

fn default_batch_size() -> usize {
    5_000
}

fn default_max_batch_memory_mb() -> usize {
    500
}

fn default_max_file_size_mb() -> usize {
    400
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_sink_queue_size() -> usize {
    5_000
}

impl Default for SinkSettings {
    fn default() -> Self {
        SinkSettings {
            batch_size: default_batch_size(),
            max_batch_memory_mb: default_max_batch_memory_mb(),
            max_file_size_mb: default_max_file_size_mb(),
            compression_codec: default_compression(),
            queue_size: default_sink_queue_size(),
        }
    }
}

impl SinkSettings {
    pub fn to_sink_config(&self, output_root: &Path, symbol: &str) -> SinkConfig {
        let mut config = SinkConfig::new(output_root, symbol);
        config.batch_size = self.batch_size;
        config.max_batch_memory_mb = self.max_batch_memory_mb;
        config.max_file_size_mb = self.max_file_size_mb;
        config.compression_codec = self.compression_codec.clone();
        config.queue_size = self.queue_size;
        config
    }
}

impl PipelineConfig {
    pub fn new(output_root: impl Into<PathBuf>, symbols: &[&str]) -> Self {
        PipelineConfig {
            output_root: output_root.into(),
            symbols: symbols.iter().map(|s| SymbolConfig::new(s)).collect(),
            routing_strategy: RoutingStrategy::default(),
            input_queue_size: default_input_queue_size(),
            replay: ReplayConfig::default(),
            sink: SinkSettings::default(),
            checkpoint: CheckpointConfig::default(),
            supervisor: SupervisorConfig::default(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Enabled symbols only.
    pub fn enabled_symbols(&self) -> impl Iterator<Item = &SymbolConfig> {
        self.symbols.iter().filter(|s| s.enabled)
    }

    /// Build the launch spec for one symbol's worker.
    pub fn worker_spec(&self, symbol: &SymbolConfig) -> WorkerSpec {
        WorkerSpec {
            symbol: symbol.name.clone(),
            output_root: self.output_root.clone(),
            replay: self.replay.clone(),
            sink: self.sink.to_sink_config(&self.output_root, &symbol.name),
            checkpoint: self.checkpoint.clone(),
            queue_size: self.input_queue_size,
            cpu_core: symbol.cpu_core,
            memory_limit_mb: symbol.memory_limit_mb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let json = r#"{
            "output_root": "/data/out",
            "symbols": [{"name": "BTCUSDT"}, {"name": "ETHUSDT", "enabled": false}]
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.replay.max_book_levels, 20);
        assert_eq!(config.replay.gap_threshold, 1_000);
        assert_eq!(config.sink.batch_size, 5_000);
        assert_eq!(config.sink.max_file_size_mb, 400);
        assert_eq!(config.checkpoint.time_interval_secs, 300);
        assert_eq!(config.checkpoint.max_checkpoints, 3);
        assert_eq!(config.supervisor.max_restart_attempts, 5);
        assert_eq!(config.input_queue_size, 5_000);
        assert_eq!(config.routing_strategy, RoutingStrategy::Direct);
        assert_eq!(config.enabled_symbols().count(), 1);
    }

    #[test]
    fn test_routing_strategy_wire_names() {
        let json = r#"{
            "output_root": "/data/out",
            "symbols": [],
            "routing_strategy": "ROUND_ROBIN"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.routing_strategy, RoutingStrategy::RoundRobin);
    }

    #[test]
    fn test_worker_spec_derivation() {
        let mut config = PipelineConfig::new("/data/out", &["BTCUSDT"]);
        config.symbols[0].cpu_core = Some(3);
        let spec = config.worker_spec(&config.symbols[0]);

        assert_eq!(spec.symbol, "BTCUSDT");
        assert_eq!(spec.sink.symbol, "BTCUSDT");
        assert_eq!(spec.sink.output_root, PathBuf::from("/data/out"));
        assert_eq!(spec.cpu_core, Some(3));
        assert_eq!(
            spec.checkpoint_dir(),
            PathBuf::from("/data/out/BTCUSDT/checkpoints")
        );
    }

    #[test]
    fn test_config_round_trip() {
        let config = PipelineConfig::new("/data/out", &["BTCUSDT"]);
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.symbols.len(), 1);
        assert_eq!(back.output_root, config.output_root);
    }
}
