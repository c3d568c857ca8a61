//! Arrangement state machine and the bar/sixteenth transport counters.

use crate::types::{ArrangementState, BARS_PER_STATE, SIXTEENTHS_PER_BAR};

/// Position of the transport: bar count and sixteenth within the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub bar: u64,
    /// Always in `0..16`.
    pub sixteenth: u32,
}

impl Position {
    /// Step one sixteenth; wraps into the next bar at 16.
    pub fn advance(&mut self) {
        self.sixteenth += 1;
        if self.sixteenth == SIXTEENTHS_PER_BAR {
            self.sixteenth = 0;
            self.bar += 1;
        }
    }
}

/// True on the first sixteenth of every 32nd bar, excluding bar 0.
pub fn transition_due(pos: Position) -> bool {
    pos.sixteenth == 0 && pos.bar % BARS_PER_STATE == 0 && pos.bar > 0
}

/// Advance `state` if a transition is due at `pos`. Returns the new state.
pub fn step(state: &mut ArrangementState, pos: Position) -> Option<ArrangementState> {
    if transition_due(pos) {
        *state = state.next();
        Some(*state)
    } else {
        None
    }
}
