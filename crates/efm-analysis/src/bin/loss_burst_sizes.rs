//! Loss burst sizes
//!
//! Derives loss burst sizes from the queue-monitor log of the switch-to-server
//! interface and writes them, with summary statistics, to
//! `<base>burst_sizes_switchserver.csv`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use efm_analysis::groundtruth::{self, BurstSummary, DeviceRole};

/// Loss burst size derivation from queue-monitor logs.
#[derive(Parser, Debug)]
#[command(name = "loss-burst-sizes", about = "Derive loss burst sizes")]
struct Cli {
    /// Queue-monitor log file.
    #[arg(long)]
    queue_monitor: PathBuf,

    /// Prefix for the output CSV file.
    #[arg(long, default_value = "")]
    output_base: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let log = BufReader::new(File::open(&cli.queue_monitor)?);
    let samples = groundtruth::parse_queue_log(log)?;

    let grouped = groundtruth::group_by_role(&samples);
    let bursts = groundtruth::burst_sizes(
        grouped
            .get(&DeviceRole::SwitchServer)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    );
    info!(bursts = bursts.len(), "burst sizes derived");

    let path = format!("{}burst_sizes_switchserver.csv", cli.output_base);
    let mut out = BufWriter::new(File::create(&path)?);
    for burst in &bursts {
        writeln!(out, "{},{}", burst.timestamp, burst.size)?;
    }
    match BurstSummary::from_bursts(&bursts) {
        None => writeln!(out, "No Bursts")?,
        Some(summary) => {
            writeln!(
                out,
                "Overall Burst Size: {}, Number of Bursts: {}, Average Burst Size: {}",
                summary.total_size, summary.burst_count, summary.average_size
            )?;
            for burst in &summary.large_bursts {
                writeln!(out, "Burst Size: {burst}")?;
            }
            writeln!(
                out,
                "Bursts >= {}: {}, Max Burst: {}",
                groundtruth::LARGE_BURST_THRESHOLD,
                summary.large_bursts.len(),
                summary.max_burst
            )?;
        }
    }
    out.flush()?;
    info!(path = %path, "burst sizes written");

    Ok(())
}
