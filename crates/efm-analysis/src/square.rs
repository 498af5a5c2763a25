//! Square-Wave (Q bit) automaton.
//!
//! The Q bit toggles with a fixed nominal period of 64 packets. An observer
//! counts packets per half-period; a short count reveals loss. Reordered
//! packets would fake transitions, so a value change is only accepted after
//! [`REORDER_THRESHOLD`] differing samples. Equal-value samples never reset
//! a pending threshold count: a short run of opposite-value samples is
//! discarded as reordering noise without disturbing the in-progress period
//! count.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::flow::SignalAutomaton;
use crate::wire::{BitPosition, SignalBits};

/// Nominal square-wave half-period in packets.
pub const NOMINAL_PERIOD: u32 = 64;

/// Consecutive differing samples required to accept a transition.
pub const REORDER_THRESHOLD: u32 = 8;

/// Detects accepted square-wave transitions and reports per-period counts.
pub struct SquareWaveAutomaton {
    pub position: BitPosition,
}

#[derive(Debug, Default)]
pub struct SquareWaveState {
    started: bool,
    value: u8,
    period_count: u32,
    threshold_count: u32,
    period_start: Option<DateTime<Utc>>,
}

/// One completed square-wave half-period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SquarePeriodRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Bit value held during the completed period.
    pub phase_value: u8,
    /// Packets observed in the completed period.
    pub phase_count: u32,
    pub nominal_period: u32,
    pub nominal_threshold: u32,
}

impl SignalAutomaton for SquareWaveAutomaton {
    type State = SquareWaveState;
    type Measurement = SquarePeriodRecord;

    fn observe(
        &self,
        state: &mut SquareWaveState,
        timestamp: DateTime<Utc>,
        bits: &SignalBits,
    ) -> Option<SquarePeriodRecord> {
        let value = bits.bit(self.position);

        if !state.started {
            state.started = true;
            state.value = value;
            state.period_count = 1;
            state.threshold_count = 0;
            state.period_start = Some(timestamp);
            return None;
        }

        if value == state.value {
            state.period_count += 1;
            return None;
        }

        state.threshold_count += 1;
        if state.threshold_count < REORDER_THRESHOLD {
            return None;
        }

        // Transition accepted: the completed period ends here, and the
        // samples that triggered the flip count toward the new period.
        let record = SquarePeriodRecord {
            start: state.period_start.unwrap_or(timestamp),
            end: timestamp,
            phase_value: state.value,
            phase_count: state.period_count,
            nominal_period: NOMINAL_PERIOD,
            nominal_threshold: REORDER_THRESHOLD,
        };
        if state.period_count > NOMINAL_PERIOD {
            warn!(
                count = state.period_count,
                nominal = NOMINAL_PERIOD,
                "square period with too many signals"
            );
        } else if state.period_count < NOMINAL_PERIOD {
            debug!(
                count = state.period_count,
                nominal = NOMINAL_PERIOD,
                "short square period, consistent with loss"
            );
        }

        state.value = value;
        state.period_start = Some(timestamp);
        state.period_count = REORDER_THRESHOLD;
        state.threshold_count = 0;
        Some(record)
    }
}
