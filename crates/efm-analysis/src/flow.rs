//! # Flow Identification and Per-Flow Analysis
//!
//! A flow is one direction of traffic between an address/port 4-tuple,
//! analyzed independently of its return direction. [`FlowAnalysis`] pairs a
//! signal automaton with the mutable per-flow state table and the per-flow
//! measurement log, so the four automata share one table implementation.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::wire::SignalBits;

// ─── Flow identifier ─────────────────────────────────────────────────────────

/// Addressing 4-tuple of a unidirectional flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowId {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowId {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        FlowId {
            src,
            dst,
            src_port,
            dst_port,
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.src, self.dst, self.src_port, self.dst_port
        )
    }
}

// ─── Automaton capability ────────────────────────────────────────────────────

/// A per-flow signal-interpretation state machine.
///
/// The automaton value itself is immutable configuration (which named bit
/// positions it reads); all mutable state lives in `State`, one instance per
/// flow, created on first sample and mutated only through [`observe`].
///
/// Samples for one flow arrive in non-decreasing timestamp order, but no
/// bound on the gap between samples may be assumed: loss can create
/// arbitrarily long gaps.
///
/// [`observe`]: SignalAutomaton::observe
pub trait SignalAutomaton {
    type State: Default;
    type Measurement;

    /// Feed one bit sample; returns a completed measurement, if any.
    fn observe(
        &self,
        state: &mut Self::State,
        timestamp: DateTime<Utc>,
        bits: &SignalBits,
    ) -> Option<Self::Measurement>;
}

// ─── Flow table + measurement log ────────────────────────────────────────────

/// Flow table and measurement accumulator for one automaton.
///
/// State entries are created lazily on first observation and live for the
/// whole run. Measurements are kept per flow in insertion order; this
/// sequence is the output artifact of the analysis.
pub struct FlowAnalysis<A: SignalAutomaton> {
    automaton: A,
    flows: HashMap<FlowId, A::State>,
    measurements: HashMap<FlowId, Vec<A::Measurement>>,
}

impl<A: SignalAutomaton> FlowAnalysis<A> {
    pub fn new(automaton: A) -> Self {
        FlowAnalysis {
            automaton,
            flows: HashMap::new(),
            measurements: HashMap::new(),
        }
    }

    /// Dispatch one sample to the automaton state of `flow`.
    pub fn ingest(&mut self, flow: FlowId, timestamp: DateTime<Utc>, bits: &SignalBits) {
        let state = self.flows.entry(flow).or_default();
        if let Some(measurement) = self.automaton.observe(state, timestamp, bits) {
            self.measurements.entry(flow).or_default().push(measurement);
        }
    }

    /// Number of flows with at least one observed sample.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Consume the analysis, keeping only the measurement log.
    pub fn into_measurements(self) -> HashMap<FlowId, Vec<A::Measurement>> {
        self.measurements
    }
}
