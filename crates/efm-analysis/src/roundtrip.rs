//! Round-Trip-Phase (T bit) automaton.
//!
//! The T bit marks packet trains in alternating phases: one endpoint
//! generates a train of marked packets, the peer reflects it. The observer
//! counts marked packets per phase, using spin-bit edges as phase
//! delimiters. A reflection can never carry more markings than its
//! generation, so `reflection > generation` signals desynchronization
//! (coalesced or duplicated cycles) and resynchronizes instead of emitting
//! a corrupt measurement.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::flow::SignalAutomaton;
use crate::wire::{BitPosition, SignalBits};

/// Counts T-bit-marked packets per generation/reflection phase, delimited by
/// spin-bit edges.
pub struct RoundTripAutomaton {
    /// Reference square-wave bit whose edges delimit phases.
    pub spin: BitPosition,
    /// The counted (T) bit.
    pub counted: BitPosition,
}

#[derive(Debug, Default)]
pub struct RoundTripState {
    started: bool,
    spin_value: u8,
    /// No counted bit observed since the last spin edge.
    cycle_empty: bool,
    current: u32,
    previous: u32,
    in_reflection: bool,
    pending_start: Option<DateTime<Utc>>,
}

/// A completed generation/reflection phase pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTripRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub generation: u32,
    pub reflection: u32,
}

impl SignalAutomaton for RoundTripAutomaton {
    type State = RoundTripState;
    type Measurement = RoundTripRecord;

    fn observe(
        &self,
        state: &mut RoundTripState,
        timestamp: DateTime<Utc>,
        bits: &SignalBits,
    ) -> Option<RoundTripRecord> {
        let spin = bits.bit(self.spin);

        if !state.started {
            state.started = true;
            state.spin_value = spin;
            state.cycle_empty = true;
            state.pending_start = Some(timestamp);
            if bits.is_set(self.counted) {
                state.current = 1;
                state.cycle_empty = false;
            }
            return None;
        }

        let mut completed = None;

        if spin != state.spin_value {
            state.spin_value = spin;

            // A spin edge with no counted bits since the previous edge is a
            // glitch: the phase must not advance on it.
            if !state.cycle_empty {
                if state.in_reflection {
                    if state.current <= state.previous {
                        completed = Some(RoundTripRecord {
                            start: state.pending_start.unwrap_or(timestamp),
                            end: timestamp,
                            generation: state.previous,
                            reflection: state.current,
                        });
                        state.pending_start = Some(timestamp);
                    } else {
                        // The oversized count becomes the new generation
                        // phase; the toggle below puts its reflection next.
                        debug!(
                            current = state.current,
                            previous = state.previous,
                            "reflection exceeds generation, resynchronizing"
                        );
                        state.previous = state.current;
                        state.in_reflection = false;
                    }
                }
                state.previous = state.current;
                state.current = 0;
                state.in_reflection = !state.in_reflection;
            }
            state.cycle_empty = true;
        }

        // Counted regardless of the spin value.
        if bits.is_set(self.counted) {
            state.current += 1;
            state.cycle_empty = false;
        }

        completed
    }
}
