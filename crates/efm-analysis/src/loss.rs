//! Loss-Event (L bit) automaton.
//!
//! The trivial automaton: every sample immediately becomes a record of the
//! raw bit value. Kept behind [`SignalAutomaton`] so it shares the flow
//! table and dispatch path with the stateful automata.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::flow::SignalAutomaton;
use crate::wire::{BitPosition, SignalBits};

/// Emits one record per sample carrying the loss-event bit value.
pub struct LossEventAutomaton {
    pub position: BitPosition,
}

/// Existence tracking only; the automaton is otherwise stateless.
#[derive(Debug, Default)]
pub struct LossEventState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LossEventRecord {
    pub timestamp: DateTime<Utc>,
    pub loss_event: bool,
}

impl SignalAutomaton for LossEventAutomaton {
    type State = LossEventState;
    type Measurement = LossEventRecord;

    fn observe(
        &self,
        _state: &mut LossEventState,
        timestamp: DateTime<Utc>,
        bits: &SignalBits,
    ) -> Option<LossEventRecord> {
        Some(LossEventRecord {
            timestamp,
            loss_event: bits.is_set(self.position),
        })
    }
}
