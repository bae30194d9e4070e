//! Manifest Inspector
//!
//! Prints the manifest entries and derived statistics for one symbol's
//! output tree. Useful for checking what a pipeline run produced without
//! opening the Parquet files.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tapeline_bins::common::init_logging;
use tapeline_core::sink::{list_partition_files, Manifest};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output root the pipeline wrote to
    #[arg(short, long)]
    output: PathBuf,

    /// Symbol to inspect
    #[arg(short, long)]
    symbol: String,

    /// Also verify each manifest entry's file exists on disk
    #[arg(long)]
    verify: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, false)?;

    let symbol_root = args.output.join(&args.symbol);
    let manifest = Manifest::open(&symbol_root).context("opening manifest")?;
    let entries = manifest.read_entries().context("reading manifest")?;

    println!("{:<40} {:>10} {:>14} {:>22} {:>22}", "file", "rows", "bytes", "ts_min", "ts_max");
    for entry in &entries {
        println!(
            "{:<40} {:>10} {:>14} {:>22} {:>22}",
            format!("{}/{}", entry.partition_path, entry.file_name),
            entry.row_count,
            entry.file_size_bytes,
            entry.timestamp_min,
            entry.timestamp_max
        );
    }

    let stats = manifest.statistics()?;
    println!();
    println!("files: {}", stats.total_files);
    println!("rows: {}", stats.total_rows);
    println!("bytes: {}", stats.total_bytes);
    println!(
        "time range: {:?} .. {:?}",
        stats.earliest_timestamp, stats.latest_timestamp
    );
    println!(
        "event types: {}",
        stats.event_types.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    if args.verify {
        let on_disk = list_partition_files(&args.output, &args.symbol)?;
        let mut missing = 0usize;
        for entry in &entries {
            let path = args
                .output
                .join(&entry.partition_path)
                .join(&entry.file_name);
            if !path.exists() {
                missing += 1;
                tracing::error!("manifest entry missing on disk: {}", path.display());
            }
        }
        println!();
        println!(
            "verify: {} entries, {} parquet files on disk, {} missing",
            entries.len(),
            on_disk.len(),
            missing
        );
        anyhow::ensure!(missing == 0, "{missing} manifest entries missing on disk");
    }

    Ok(())
}
