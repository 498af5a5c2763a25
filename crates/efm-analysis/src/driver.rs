//! # Capture Driver
//!
//! Runs one single-threaded, single-pass analysis per capture file: every
//! frame is decoded, direction-filtered, scanned for a short-header QUIC
//! packet, and the resulting bit sample is dispatched to all four signal
//! automata. The two traffic directions are analyzed independently.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tracing::info;

use crate::capture::{decode_datagram, CaptureError, FrameSource};
use crate::flow::{FlowAnalysis, FlowId};
use crate::loss::{LossEventAutomaton, LossEventRecord};
use crate::reflect::{ReflectedPeriodRecord, ReflectedSquareWaveAutomaton};
use crate::roundtrip::{RoundTripAutomaton, RoundTripRecord};
use crate::square::{SquarePeriodRecord, SquareWaveAutomaton};
use crate::wire::{scan_datagram, BitPosition};

// ─── Signal-bit assignment ───────────────────────────────────────────────────

/// Which named bit position carries which semantic signal.
///
/// The byte layout fixes the positions; the mapping to L/T/Q/R is an
/// experiment configuration. The default matches the emulation setup.
#[derive(Debug, Clone, Copy)]
pub struct SignalMap {
    /// Loss-event (L) bit.
    pub loss: BitPosition,
    /// Reference square wave for the round-trip automaton.
    pub spin: BitPosition,
    /// Counted round-trip (T) bit.
    pub round_trip: BitPosition,
    /// Square-wave (Q) bit.
    pub square: BitPosition,
    /// Reflected-square-wave (R) bit.
    pub reflected: BitPosition,
}

impl Default for SignalMap {
    fn default() -> Self {
        SignalMap {
            loss: BitPosition::ExtByte3,
            spin: BitPosition::Spin,
            round_trip: BitPosition::ExtByte4,
            square: BitPosition::ExtByte1,
            reflected: BitPosition::ExtByte2,
        }
    }
}

// ─── Technique selector ──────────────────────────────────────────────────────

/// Measurement-technique selector, preserved from the original integer flag:
/// 42 runs all techniques, 43 the loss techniques (currently also all four),
/// anything else runs none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    All,
    Disabled,
}

impl AnalysisMode {
    pub fn from_selector(selector: u32) -> Self {
        match selector {
            42 | 43 => AnalysisMode::All,
            _ => AnalysisMode::Disabled,
        }
    }

    pub fn is_active(self) -> bool {
        self == AnalysisMode::All
    }
}

// ─── Direction analysis ──────────────────────────────────────────────────────

/// All four automata plus their flow tables for one traffic direction.
pub struct DirectionAnalyzer {
    source_ip: Ipv4Addr,
    loss: FlowAnalysis<LossEventAutomaton>,
    round_trip: FlowAnalysis<RoundTripAutomaton>,
    square: FlowAnalysis<SquareWaveAutomaton>,
    reflected: FlowAnalysis<ReflectedSquareWaveAutomaton>,
    frames: u64,
    samples: u64,
}

impl DirectionAnalyzer {
    pub fn new(source_ip: Ipv4Addr, map: SignalMap) -> Self {
        DirectionAnalyzer {
            source_ip,
            loss: FlowAnalysis::new(LossEventAutomaton { position: map.loss }),
            round_trip: FlowAnalysis::new(RoundTripAutomaton {
                spin: map.spin,
                counted: map.round_trip,
            }),
            square: FlowAnalysis::new(SquareWaveAutomaton {
                position: map.square,
            }),
            reflected: FlowAnalysis::new(ReflectedSquareWaveAutomaton {
                position: map.reflected,
            }),
            frames: 0,
            samples: 0,
        }
    }

    /// Drain `source`, dispatching every matching sample. Per-flow sample
    /// order follows capture order; a frame that fails to decode or scan
    /// only skips that frame.
    pub fn process(&mut self, source: &mut dyn FrameSource) -> Result<(), CaptureError> {
        while let Some(frame) = source.next_frame()? {
            self.frames += 1;
            let Some(dgram) = decode_datagram(&frame.data) else {
                continue;
            };
            if dgram.src != self.source_ip {
                continue;
            }
            let Some(bits) = scan_datagram(dgram.payload) else {
                continue;
            };
            self.samples += 1;

            let flow = FlowId::new(dgram.src, dgram.dst, dgram.src_port, dgram.dst_port);
            self.loss.ingest(flow, frame.timestamp, &bits);
            self.round_trip.ingest(flow, frame.timestamp, &bits);
            self.square.ingest(flow, frame.timestamp, &bits);
            self.reflected.ingest(flow, frame.timestamp, &bits);
        }

        info!(
            source_ip = %self.source_ip,
            frames = self.frames,
            samples = self.samples,
            flows = self.loss.flow_count(),
            "capture pass complete"
        );
        Ok(())
    }

    pub fn into_report(self) -> DirectionReport {
        DirectionReport {
            loss: self.loss.into_measurements(),
            round_trip: self.round_trip.into_measurements(),
            square: self.square.into_measurements(),
            reflected: self.reflected.into_measurements(),
        }
    }
}

/// Measurement records collected from one direction's capture file.
#[derive(Debug, Default)]
pub struct DirectionReport {
    pub loss: HashMap<FlowId, Vec<LossEventRecord>>,
    pub round_trip: HashMap<FlowId, Vec<RoundTripRecord>>,
    pub square: HashMap<FlowId, Vec<SquarePeriodRecord>>,
    pub reflected: HashMap<FlowId, Vec<ReflectedPeriodRecord>>,
}

impl DirectionReport {
    /// Report of a direction whose capture file could not be analyzed.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{build_udp_frame, CapturedFrame, MemorySource};
    use chrono::{TimeZone, Utc};

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);

    /// Short-header packet with the given spin/T/Q/R/L values, default map.
    fn frame(i: u32, spin: u8, l: u8, t: u8, q: u8, r: u8) -> CapturedFrame {
        let byte0 = 0x40 | (spin << 5);
        let byte1 = (q << 7) | (r << 6) | (l << 5) | (t << 4);
        CapturedFrame {
            timestamp: Utc.with_ymd_and_hms(2021, 6, 10, 14, 0, 0).unwrap()
                + chrono::Duration::milliseconds(i as i64),
            data: build_udp_frame(SRC, DST, 4433, 51000, &[byte0, byte1, 0xAB]),
        }
    }

    #[test]
    fn mode_selector() {
        assert!(AnalysisMode::from_selector(42).is_active());
        assert!(AnalysisMode::from_selector(43).is_active());
        assert!(!AnalysisMode::from_selector(0).is_active());
        assert!(!AnalysisMode::from_selector(7).is_active());
    }

    #[test]
    fn single_flow_round_trip_measurement() {
        let mut frames = Vec::new();
        let mut i = 0u32;
        for _ in 0..10 {
            frames.push(frame(i, 0, 0, 1, 0, 0));
            i += 1;
        }
        frames.push(frame(i, 1, 0, 0, 0, 0));
        i += 1;
        for _ in 0..6 {
            frames.push(frame(i, 1, 0, 1, 0, 0));
            i += 1;
        }
        frames.push(frame(i, 0, 0, 0, 0, 0));

        let mut analyzer = DirectionAnalyzer::new(SRC, SignalMap::default());
        let mut source = MemorySource::new(frames);
        analyzer.process(&mut source).unwrap();
        let report = analyzer.into_report();

        let flow = FlowId::new(SRC, DST, 4433, 51000);
        let records = &report.round_trip[&flow];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].generation, 10);
        assert_eq!(records[0].reflection, 6);

        // Every matching packet also produced a loss-event record.
        assert_eq!(report.loss[&flow].len(), 18);
    }

    #[test]
    fn direction_filter_excludes_reverse_traffic() {
        let reverse = CapturedFrame {
            timestamp: Utc.with_ymd_and_hms(2021, 6, 10, 14, 0, 0).unwrap(),
            data: build_udp_frame(DST, SRC, 51000, 4433, &[0x40, 0x20]),
        };
        let mut analyzer = DirectionAnalyzer::new(SRC, SignalMap::default());
        let mut source = MemorySource::new([reverse, frame(1, 0, 1, 0, 0, 0)]);
        analyzer.process(&mut source).unwrap();
        let report = analyzer.into_report();

        assert_eq!(report.loss.len(), 1);
        let flow = FlowId::new(SRC, DST, 4433, 51000);
        assert_eq!(report.loss[&flow].len(), 1);
        assert!(report.loss[&flow][0].loss_event);
    }

    #[test]
    fn non_quic_datagrams_are_ignored() {
        let bogus = CapturedFrame {
            timestamp: Utc.with_ymd_and_hms(2021, 6, 10, 14, 0, 0).unwrap(),
            data: build_udp_frame(SRC, DST, 4433, 51000, &[0x00, 0xFF, 0xFF]),
        };
        let mut analyzer = DirectionAnalyzer::new(SRC, SignalMap::default());
        let mut source = MemorySource::new([bogus]);
        analyzer.process(&mut source).unwrap();
        assert!(analyzer.into_report().loss.is_empty());
    }
}
