//! # Loss Ground Truth
//!
//! Parsers and counters for the testbed collaterals that accompany a capture:
//! the switch queue-monitor log (actual packet drops per interface) and a
//! packet count taken on the inbound interface of the dropping switch. These
//! give the reference values the signal-bit measurements are compared against.

use std::collections::HashMap;
use std::io::BufRead;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::capture::{decode_datagram, CaptureError, FrameSource};
use crate::wire::FIXED_BIT;

/// Bursts at or above this size span more than one square-wave phase.
pub const LARGE_BURST_THRESHOLD: i64 = 64;

#[derive(Debug, Error)]
pub enum GroundTruthError {
    #[error("queue log read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// One line of the queue-monitor log: a cumulative drop counter sampled on a
/// single switch interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSample {
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub drops: i64,
}

/// Role of a switch interface in the two-switch testbed topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceRole {
    ClientSwitch,
    SwitchClient,
    SwitchServer,
    ServerSwitch,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 4] = [
        DeviceRole::ClientSwitch,
        DeviceRole::SwitchClient,
        DeviceRole::SwitchServer,
        DeviceRole::ServerSwitch,
    ];

    pub fn from_device(device: &str) -> Option<Self> {
        match device {
            "s1-eth1" => Some(DeviceRole::ClientSwitch),
            "s1-eth2" => Some(DeviceRole::SwitchClient),
            "s3-eth1" => Some(DeviceRole::SwitchServer),
            "s3-eth2" => Some(DeviceRole::ServerSwitch),
            _ => None,
        }
    }

    /// Label used in output file names.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceRole::ClientSwitch => "clientswitch",
            DeviceRole::SwitchClient => "switchclient",
            DeviceRole::SwitchServer => "switchserver",
            DeviceRole::ServerSwitch => "serverswitch",
        }
    }
}

/// Parse a queue-monitor log.
///
/// Expected line format, after a `TIME(s) dev drops real_time` header:
///
/// ```text
/// 4085365.42965   s3-eth1   0   2021-06-10T14:12:34.795822Z
/// ```
///
/// Malformed lines are logged and skipped rather than failing the whole run,
/// since the monitor occasionally truncates its last line on shutdown.
pub fn parse_queue_log<R: BufRead>(reader: R) -> Result<Vec<QueueSample>, GroundTruthError> {
    let mut samples = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.starts_with("TIME") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            warn!(line = %line, "queue log line has too few fields, skipping");
            continue;
        }
        let drops = match fields[2].parse::<i64>() {
            Ok(d) => d,
            Err(_) => {
                warn!(value = fields[2], "unparseable drop count, skipping line");
                continue;
            }
        };
        let timestamp = match DateTime::parse_from_rfc3339(fields[3]) {
            Ok(t) => t.with_timezone(&Utc),
            Err(err) => {
                warn!(value = fields[3], %err, "unparseable timestamp, skipping line");
                continue;
            }
        };
        samples.push(QueueSample {
            timestamp,
            device: fields[1].to_owned(),
            drops,
        });
    }
    Ok(samples)
}

/// Group samples by interface role, dropping interfaces outside the topology.
pub fn group_by_role(samples: &[QueueSample]) -> HashMap<DeviceRole, Vec<QueueSample>> {
    let mut grouped: HashMap<DeviceRole, Vec<QueueSample>> = HashMap::new();
    for sample in samples {
        if let Some(role) = DeviceRole::from_device(&sample.device) {
            grouped.entry(role).or_default().push(sample.clone());
        }
    }
    grouped
}

/// A completed loss burst: consecutive samples with a strictly increasing
/// cumulative drop counter, closed by the first non-increasing sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurstRecord {
    pub timestamp: DateTime<Utc>,
    pub size: i64,
}

/// Derive loss burst sizes from the samples of one interface.
///
/// The queue monitor reports a cumulative drop counter. Every sample that
/// raises the counter extends the current burst by one; the first positive
/// sample that does not raise it closes the burst and emits its size. A burst
/// still open at the end of the log is never emitted, matching a monitor that
/// was stopped mid-drop.
pub fn burst_sizes(samples: &[QueueSample]) -> Vec<BurstRecord> {
    let mut bursts = Vec::new();
    let mut current_size: i64 = 0;
    let mut previous_drops: i64 = 0;
    let mut reported = false;
    for sample in samples {
        if sample.drops <= 0 {
            continue;
        }
        if sample.drops > previous_drops {
            current_size += 1;
            previous_drops = sample.drops;
            reported = false;
        } else if !reported {
            bursts.push(BurstRecord {
                timestamp: sample.timestamp,
                size: current_size,
            });
            current_size = 0;
            reported = true;
        }
    }
    bursts
}

/// Aggregate burst statistics for one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurstSummary {
    pub total_size: i64,
    pub burst_count: i64,
    pub average_size: i64,
    pub large_bursts: Vec<i64>,
    pub max_burst: i64,
}

impl BurstSummary {
    pub fn from_bursts(bursts: &[BurstRecord]) -> Option<Self> {
        if bursts.is_empty() {
            return None;
        }
        let total_size: i64 = bursts.iter().map(|b| b.size).sum();
        let burst_count = bursts.len() as i64;
        let large_bursts: Vec<i64> = bursts
            .iter()
            .map(|b| b.size)
            .filter(|&s| s >= LARGE_BURST_THRESHOLD)
            .collect();
        let max_burst = large_bursts.iter().copied().max().unwrap_or(0);
        Some(BurstSummary {
            total_size,
            burst_count,
            average_size: total_size / burst_count,
            large_bursts,
            max_burst,
        })
    }
}

/// Cumulative count of matching packets at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketCount {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

/// Count the packets entering the dropping switch with the given addresses.
///
/// Any datagram whose first payload byte carries the fixed bit counts, long
/// and short headers alike; the total at each matching packet is recorded so
/// the count can be read off at arbitrary points in time.
pub fn count_packets(
    source: &mut dyn FrameSource,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<Vec<PacketCount>, GroundTruthError> {
    let mut counts = Vec::new();
    let mut total: u64 = 0;
    while let Some(frame) = source.next_frame()? {
        let Some(datagram) = decode_datagram(&frame.data) else {
            continue;
        };
        if datagram.src != src || datagram.dst != dst {
            continue;
        }
        let Some(&first) = datagram.payload.first() else {
            continue;
        };
        if first & FIXED_BIT == 0 {
            continue;
        }
        total += 1;
        counts.push(PacketCount {
            timestamp: frame.timestamp,
            count: total,
        });
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{build_udp_frame, CapturedFrame, MemorySource};
    use chrono::TimeZone;
    use std::io::Cursor;

    const LOG: &str = "\
TIME(s)       \tdev                  \tdrops     \treal_time
3053048.66199 \ts3-eth1              \t10        \t2021-05-20T15:33:06.688819Z
3053048.66342 \ts3-eth1              \t10        \t2021-05-20T15:33:06.690248Z
3053048.66447 \ts1-eth2              \t3         \t2021-05-20T15:33:06.691302Z
";

    #[test]
    fn parses_log_and_skips_header() {
        let samples = parse_queue_log(Cursor::new(LOG)).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].device, "s3-eth1");
        assert_eq!(samples[0].drops, 10);
        assert_eq!(
            samples[0].timestamp,
            Utc.with_ymd_and_hms(2021, 5, 20, 15, 33, 6).unwrap()
                + chrono::Duration::microseconds(688_819)
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let log = "TIME(s) dev drops real_time\n1.0 s3-eth1 oops 2021-05-20T15:33:06Z\n1.1 s3-eth1 4 not-a-time\n1.2 s3-eth1 4 2021-05-20T15:33:07Z\n";
        let samples = parse_queue_log(Cursor::new(log)).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].drops, 4);
    }

    #[test]
    fn groups_by_interface_role() {
        let samples = parse_queue_log(Cursor::new(LOG)).unwrap();
        let grouped = group_by_role(&samples);
        assert_eq!(grouped[&DeviceRole::SwitchServer].len(), 2);
        assert_eq!(grouped[&DeviceRole::SwitchClient].len(), 1);
        assert!(!grouped.contains_key(&DeviceRole::ClientSwitch));
    }

    fn sample(second: u32, drops: i64) -> QueueSample {
        QueueSample {
            timestamp: Utc.with_ymd_and_hms(2021, 5, 20, 15, 33, second).unwrap(),
            device: "s3-eth1".to_owned(),
            drops,
        }
    }

    #[test]
    fn increasing_counter_forms_one_burst() {
        let samples: Vec<QueueSample> = [(0, 1), (1, 2), (2, 3), (3, 3)]
            .into_iter()
            .map(|(s, d)| sample(s, d))
            .collect();
        let bursts = burst_sizes(&samples);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].size, 3);
        assert_eq!(
            bursts[0].timestamp,
            Utc.with_ymd_and_hms(2021, 5, 20, 15, 33, 3).unwrap()
        );
    }

    #[test]
    fn plateau_reports_each_burst_once() {
        let samples: Vec<QueueSample> = [(0, 1), (1, 1), (2, 1), (3, 2), (4, 2)]
            .into_iter()
            .map(|(s, d)| sample(s, d))
            .collect();
        let bursts = burst_sizes(&samples);
        assert_eq!(bursts.len(), 2);
        assert_eq!(bursts[0].size, 1);
        assert_eq!(bursts[1].size, 1);
    }

    #[test]
    fn open_burst_at_end_of_log_is_not_emitted() {
        let samples: Vec<QueueSample> = [(0, 1), (1, 2)]
            .into_iter()
            .map(|(s, d)| sample(s, d))
            .collect();
        assert!(burst_sizes(&samples).is_empty());
    }

    #[test]
    fn summary_flags_large_bursts() {
        let bursts = vec![
            BurstRecord {
                timestamp: Utc.with_ymd_and_hms(2021, 5, 20, 15, 33, 0).unwrap(),
                size: 70,
            },
            BurstRecord {
                timestamp: Utc.with_ymd_and_hms(2021, 5, 20, 15, 33, 1).unwrap(),
                size: 10,
            },
        ];
        let summary = BurstSummary::from_bursts(&bursts).unwrap();
        assert_eq!(summary.total_size, 80);
        assert_eq!(summary.burst_count, 2);
        assert_eq!(summary.average_size, 40);
        assert_eq!(summary.large_bursts, vec![70]);
        assert_eq!(summary.max_burst, 70);
    }

    #[test]
    fn empty_burst_list_has_no_summary() {
        assert!(BurstSummary::from_bursts(&[]).is_none());
    }

    #[test]
    fn packet_count_filters_direction_and_fixed_bit() {
        let server = Ipv4Addr::new(10, 0, 1, 2);
        let client = Ipv4Addr::new(10, 0, 1, 1);
        let at = |s: u32| Utc.with_ymd_and_hms(2021, 5, 20, 15, 33, s).unwrap();
        let frames = vec![
            CapturedFrame {
                timestamp: at(0),
                data: build_udp_frame(server, client, 4433, 51000, &[0x43, 0x00]),
            },
            // reverse direction, not counted
            CapturedFrame {
                timestamp: at(1),
                data: build_udp_frame(client, server, 51000, 4433, &[0x43, 0x00]),
            },
            // fixed bit clear, not counted
            CapturedFrame {
                timestamp: at(2),
                data: build_udp_frame(server, client, 4433, 51000, &[0x03, 0x00]),
            },
            CapturedFrame {
                timestamp: at(3),
                data: build_udp_frame(server, client, 4433, 51000, &[0xc3, 0x00]),
            },
        ];
        let mut source = MemorySource::new(frames);
        let counts = count_packets(&mut source, server, client).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].count, 1);
        assert_eq!(counts[1].count, 2);
        assert_eq!(counts[1].timestamp, at(3));
    }
}
