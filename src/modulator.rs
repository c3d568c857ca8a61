//! Continuously evolving control values sent alongside the triggers.

use crate::types::{ArrangementState, EngineEvent, BARS_PER_STATE};
use rand::Rng;

pub const CUTOFF_PARAM: &str = "lead_cutoff";
pub const SPREAD_PARAM: &str = "bass_spread";

/// Lead filter cutoff (Hz) for a state and bar. Deterministic.
pub fn filter_cutoff(state: ArrangementState, bar: u64) -> f64 {
    match state {
        // 1500 → 2000 sawtooth over 8 bars
        ArrangementState::Groove => 1500.0 + 500.0 * (bar % 8) as f64 / 8.0,
        ArrangementState::Breakdown => 600.0,
        // opens 100 Hz per bar across the window
        ArrangementState::BuildUp => 600.0 + (bar % BARS_PER_STATE) as f64 * 100.0,
        ArrangementState::Drop => 3000.0,
    }
}

/// Bass oscillator spread, re-rolled every tick in [20, 40).
pub fn bass_spread<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    20.0 + rng.gen::<f64>() * 20.0
}

/// Append this tick's parameter updates.
pub fn modulate<R: Rng + ?Sized>(
    state: ArrangementState,
    bar: u64,
    rng: &mut R,
    out: &mut Vec<EngineEvent>,
) {
    out.push(EngineEvent::ParamUpdate {
        param: CUTOFF_PARAM,
        value: filter_cutoff(state, bar),
    });
    out.push(EngineEvent::ParamUpdate {
        param: SPREAD_PARAM,
        value: bass_spread(rng),
    });
}
