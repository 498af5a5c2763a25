//! Queue-monitor ground truth
//!
//! Derives the packet-loss ground truth of a testbed run from the switch
//! queue-monitor log, plus an overall packet count from the capture taken on
//! the inbound interface of the dropping switch. Writes one
//! `groundtruth_loss_<role>.csv` per interface role and a combined
//! `groundtruth_overall_packets_and_loss_count.csv`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use efm_analysis::capture::PcapFileSource;
use efm_analysis::groundtruth::{self, DeviceRole};

/// Ground-truth derivation from queue-monitor logs.
#[derive(Parser, Debug)]
#[command(name = "queue-groundtruth", about = "Derive packet-loss ground truth")]
struct Cli {
    /// Queue-monitor log file.
    #[arg(long)]
    queue_monitor: PathBuf,

    /// Prefix for the output CSV files.
    #[arg(long, default_value = "")]
    output_base: String,

    /// Capture of the dropping switch's inbound interface, for packet counts.
    #[arg(long)]
    inbound_pcap: Option<PathBuf>,

    /// Server address, source of the counted packets.
    #[arg(long, default_value = "10.0.1.2")]
    server: Ipv4Addr,

    /// Client address, destination of the counted packets.
    #[arg(long, default_value = "10.0.1.1")]
    client: Ipv4Addr,
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
    info!(samples = samples.len(), "queue monitor log parsed");

    let grouped = groundtruth::group_by_role(&samples);

    // One drop-count series per interface role, empty file if never sampled.
    for role in DeviceRole::ALL {
        let path = format!("{}groundtruth_loss_{}.csv", cli.output_base, role.label());
        let mut out = BufWriter::new(File::create(&path)?);
        for sample in grouped.get(&role).map(Vec::as_slice).unwrap_or(&[]) {
            writeln!(out, "{},{}", sample.timestamp, sample.drops)?;
        }
        out.flush()?;
        info!(path = %path, "ground truth written");
    }

    // The evaluation compares drops on the switch-to-server interface against
    // the packets that entered the switch, so both go into one file.
    let counts = match &cli.inbound_pcap {
        Some(path) => {
            let mut source = PcapFileSource::open(path)?;
            groundtruth::count_packets(&mut source, cli.server, cli.client)?
        }
        None => {
            warn!("no inbound capture given, overall packet counts will be empty");
            Vec::new()
        }
    };

    let combined_path = format!(
        "{}groundtruth_overall_packets_and_loss_count.csv",
        cli.output_base
    );
    let mut out = BufWriter::new(File::create(&combined_path)?);
    for sample in grouped
        .get(&DeviceRole::SwitchServer)
        .map(Vec::as_slice)
        .unwrap_or(&[])
    {
        writeln!(out, "losscount,{},{}", sample.timestamp, sample.drops)?;
    }
    for count in &counts {
        writeln!(out, "overallcount,{},{}", count.timestamp, count.count)?;
    }
    out.flush()?;
    info!(
        path = %combined_path,
        packet_counts = counts.len(),
        "combined ground truth written"
    );

    Ok(())
}
