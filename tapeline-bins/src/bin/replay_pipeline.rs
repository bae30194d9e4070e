//! Multi-Symbol Replay Pipeline
//!
//! Reads JSONL capture files, routes records to one worker per symbol, and
//! writes hour-partitioned Parquet with checkpoints under the output root.
//! TERM/INT trigger a graceful drain; exit is non-zero when any worker
//! ended fatally or crash-looped out.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tapeline_bins::common::{init_logging, print_worker_stats};
use tapeline_core::config::PipelineConfig;
use tapeline_core::pipeline::{Supervisor, SymbolRouter, WorkerMessage};
use tapeline_core::sink::read_jsonl_records;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Pipeline configuration file (JSON)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Output root (used when no config file is given)
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Symbols to process (used when no config file is given)
    #[arg(short, long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// JSONL capture files to replay, in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    if let Some(path) = &args.config {
        return PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()));
    }
    anyhow::ensure!(
        !args.symbols.is_empty(),
        "either --config or --symbols must be given"
    );
    let symbols: Vec<&str> = args.symbols.iter().map(String::as_str).collect();
    Ok(PipelineConfig::new(&args.output, &symbols))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.log_level, config.json_logs || args.json_logs)?;

    tracing::info!("=== Tapeline: Multi-Symbol Replay Pipeline ===");
    tracing::info!(
        "Output: {} | Symbols: {}",
        config.output_root.display(),
        config
            .enabled_symbols()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Spawn one worker per enabled symbol
    let mut supervisor = Supervisor::new(config.supervisor.clone());
    for symbol in config.enabled_symbols() {
        supervisor
            .spawn_worker(config.worker_spec(symbol))
            .with_context(|| format!("spawning worker for {}", symbol.name))?;
    }
    let senders = supervisor.senders();
    let shutdown = supervisor.shutdown_flag();
    let mut router = SymbolRouter::new(config.routing_strategy, senders.clone());

    // TERM/INT set the shared flag; every worker observes it at its
    // suspension points and the supervisor starts the drain.
    let ctrlc_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("shutdown signal received");
        ctrlc_flag.store(true, Ordering::Relaxed);
    })
    .context("installing signal handler")?;

    // Health monitoring + drain run concurrently with ingest
    let supervise_handle = tokio::spawn(async move {
        let stats = supervisor.supervise().await;
        (stats, supervisor.degraded())
    });

    // Ingest: read each capture file and route its records
    'ingest: for input in &args.inputs {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        tracing::info!("reading {}", input.display());
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        for sender in senders.read().values() {
            let _ = sender
                .try_send(WorkerMessage::SourceMarker { file: file_name.clone() });
        }

        let records =
            read_jsonl_records(input).with_context(|| format!("reading {}", input.display()))?;
        for record in records {
            if shutdown.load(Ordering::Relaxed) {
                break 'ingest;
            }
            if !router.route(record) {
                // Bounded queues drop on overload; yield so workers catch up
                tokio::task::yield_now().await;
            }
        }
    }

    let metrics = router.metrics();
    tracing::info!(
        "ingest complete: routed={} dropped={} errors={}",
        metrics.routed,
        metrics.dropped,
        metrics.errors
    );

    // Drain and collect final statistics
    shutdown.store(true, Ordering::Relaxed);
    let (stats, degraded) = supervise_handle
        .await
        .context("supervisor task panicked")?;
    print_worker_stats(&stats);

    if degraded {
        tracing::error!("pipeline degraded: one or more workers failed");
        std::process::exit(1);
    }
    Ok(())
}
