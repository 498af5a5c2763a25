//! EFM pcap analyzer
//!
//! Offline analysis of the EFM signal bits in two directional pcap files,
//! one per traffic direction. Writes one CSV file per measurement technique
//! (`<base>lbit.csv`, `tbit.csv`, `qbit.csv`, `rbit.csv`) with both
//! directions appended to each file.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use efm_analysis::capture::PcapFileSource;
use efm_analysis::driver::{AnalysisMode, DirectionAnalyzer, DirectionReport, SignalMap};
use efm_analysis::report;

/// Passive EFM signal-bit analyzer for QUIC captures.
#[derive(Parser, Debug)]
#[command(name = "efm-pcap-analyzer", about = "Analyze EFM signal bits in QUIC pcap files")]
struct Cli {
    /// Capture of the first traffic direction.
    #[arg(long)]
    first_pcap: Option<PathBuf>,

    /// Capture of the second traffic direction.
    #[arg(long)]
    second_pcap: Option<PathBuf>,

    /// Source address selecting packets of the first direction.
    #[arg(long, default_value = "10.0.1.1")]
    first_source: Ipv4Addr,

    /// Source address selecting packets of the second direction.
    #[arg(long, default_value = "10.0.1.2")]
    second_source: Ipv4Addr,

    /// Prefix for the per-technique output CSV files.
    #[arg(long, default_value = "")]
    output_base: String,

    /// Technique selector: 42 and 43 both run the full set.
    #[arg(long, default_value_t = 42)]
    techniques: u32,
}

/// Run one capture pass, or produce an empty report if the file is missing
/// or unreadable so the other direction is still analyzed and written.
fn analyze_direction(pcap: Option<&PathBuf>, source_ip: Ipv4Addr) -> DirectionReport {
    let Some(path) = pcap else {
        info!(%source_ip, "no capture for this direction");
        return DirectionReport::empty();
    };
    let mut source = match PcapFileSource::open(path) {
        Ok(source) => source,
        Err(err) => {
            error!(path = %path.display(), %err, "cannot open capture");
            return DirectionReport::empty();
        }
    };
    let mut analyzer = DirectionAnalyzer::new(source_ip, SignalMap::default());
    if let Err(err) = analyzer.process(&mut source) {
        error!(path = %path.display(), %err, "capture read failed mid-file");
    }
    analyzer.into_report()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mode = AnalysisMode::from_selector(cli.techniques);
    if !mode.is_active() {
        info!(selector = cli.techniques, "no techniques selected, nothing to do");
        return Ok(());
    }

    info!(
        first_source = %cli.first_source,
        second_source = %cli.second_source,
        output_base = %cli.output_base,
        "starting signal-bit analysis"
    );

    let first = analyze_direction(cli.first_pcap.as_ref(), cli.first_source);
    let second = analyze_direction(cli.second_pcap.as_ref(), cli.second_source);

    report::write_all(&cli.output_base, &[&first, &second])?;

    Ok(())
}
