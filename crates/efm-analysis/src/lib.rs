//! # efm-analysis
//!
//! Passive analysis of Explicit Flow Measurement signal bits in QUIC traffic.
//!
//! Reads packet captures, locates the signal bits in QUIC short headers, and
//! runs per-flow measurement automata for loss events, round trips, and the
//! square-wave loss signals, alongside ground-truth derivation from testbed
//! queue-monitor logs.
//!
//! ## Crate structure
//!
//! - [`wire`] — Signal-bit extraction from coalesced QUIC datagrams
//! - [`flow`] — Flow identification and the per-flow automaton table
//! - [`loss`] — Per-packet loss-event bit logging
//! - [`roundtrip`] — Spin-edge delimited round-trip counter pairs
//! - [`square`] — Square-wave phase counting with reordering tolerance
//! - [`reflect`] — Reflected square-wave phase counting
//! - [`capture`] — Pcap file reading and Ethernet/IPv4/UDP decoding
//! - [`driver`] — Per-direction pipeline tying capture to the automata
//! - [`report`] — CSV serialization of measurement logs
//! - [`groundtruth`] — Queue-monitor parsing, burst sizes, packet counts

pub mod capture;
pub mod driver;
pub mod flow;
pub mod groundtruth;
pub mod loss;
pub mod reflect;
pub mod report;
pub mod roundtrip;
pub mod square;
pub mod wire;
