//! Reflected-Square-Wave (R bit) automaton.
//!
//! Same transition mechanics as the Q automaton, with an explicit startup
//! phase: the R bit stays 0 while the peer has nothing to reflect yet, so
//! the period before the first confirmed value is idle time and produces no
//! measurement.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::flow::SignalAutomaton;
use crate::square::{NOMINAL_PERIOD, REORDER_THRESHOLD};
use crate::wire::{BitPosition, SignalBits};

/// Phase of the reflected square wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReflectionPhase {
    /// Before the first confirmed transition; idle, not measured.
    Startup,
    /// Reflecting zeros.
    PhaseZero,
    /// Reflecting ones.
    PhaseOne,
}

impl ReflectionPhase {
    fn from_bit(value: u8) -> Self {
        if value == 1 {
            ReflectionPhase::PhaseOne
        } else {
            ReflectionPhase::PhaseZero
        }
    }
}

impl std::fmt::Display for ReflectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReflectionPhase::Startup => "Startup",
            ReflectionPhase::PhaseZero => "PhaseZero",
            ReflectionPhase::PhaseOne => "PhaseOne",
        };
        f.write_str(name)
    }
}

/// Detects accepted transitions of the reflected square wave.
pub struct ReflectedSquareWaveAutomaton {
    pub position: BitPosition,
}

#[derive(Debug)]
pub struct ReflectedSquareWaveState {
    started: bool,
    value: u8,
    period_count: u32,
    threshold_count: u32,
    phase: ReflectionPhase,
    period_start: Option<DateTime<Utc>>,
}

impl Default for ReflectedSquareWaveState {
    fn default() -> Self {
        ReflectedSquareWaveState {
            started: false,
            value: 0,
            period_count: 0,
            threshold_count: 0,
            phase: ReflectionPhase::Startup,
            period_start: None,
        }
    }
}

/// One completed reflected-square-wave half-period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReflectedPeriodRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Phase entered by the accepted transition.
    pub phase: ReflectionPhase,
    /// Packets observed in the completed period.
    pub phase_count: u32,
    pub nominal_period: u32,
    pub nominal_threshold: u32,
}

impl SignalAutomaton for ReflectedSquareWaveAutomaton {
    type State = ReflectedSquareWaveState;
    type Measurement = ReflectedPeriodRecord;

    fn observe(
        &self,
        state: &mut ReflectedSquareWaveState,
        timestamp: DateTime<Utc>,
        bits: &SignalBits,
    ) -> Option<ReflectedPeriodRecord> {
        let value = bits.bit(self.position);

        if !state.started {
            state.started = true;
            state.value = value;
            state.period_count = 1;
            state.threshold_count = 0;
            state.phase = ReflectionPhase::Startup;
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

        // The initial period is idling before the peer starts reflecting:
        // advance the phase but record nothing.
        let record = if state.phase == ReflectionPhase::Startup {
            None
        } else {
            Some(ReflectedPeriodRecord {
                start: state.period_start.unwrap_or(timestamp),
                end: timestamp,
                phase: ReflectionPhase::from_bit(value),
                phase_count: state.period_count,
                nominal_period: NOMINAL_PERIOD,
                nominal_threshold: REORDER_THRESHOLD,
            })
        };
        if state.period_count > NOMINAL_PERIOD {
            warn!(
                count = state.period_count,
                nominal = NOMINAL_PERIOD,
                "reflected period with too many signals"
            );
        } else if state.period_count < NOMINAL_PERIOD {
            debug!(
                count = state.period_count,
                nominal = NOMINAL_PERIOD,
                "short reflected period, consistent with loss"
            );
        }

        state.value = value;
        state.period_start = Some(timestamp);
        state.period_count = REORDER_THRESHOLD;
        state.threshold_count = 0;
        state.phase = ReflectionPhase::from_bit(value);
        record
    }
}
