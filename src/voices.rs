//! The eight voice generators.
//!
//! Each generator looks at the current tick (arrangement state, bar,
//! sixteenth, loaded pattern, mutation rate) and appends zero or more
//! trigger events. Randomness comes from the caller's RNG so a seeded
//! engine replays identically. The engine calls them once per tick through
//! [`generate_all`], which fixes the emission order.

use crate::scale::{ROOT, SCALE};
use crate::types::{ArpMode, ArrangementState, EngineEvent, Pattern, BEATS_PER_BAR};
use rand::Rng;

/// Everything a generator may read about the current tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub state: ArrangementState,
    pub bar: u64,
    pub sixteenth: u32,
    pub pattern: Option<&'a Pattern>,
    pub mutation_rate: f64,
    pub arp_mode: ArpMode,
    pub bpm: f64,
}

impl TickContext<'_> {
    /// Position within the bar in beats.
    pub fn beat_in_bar(&self) -> f64 {
        self.sixteenth as f64 * 0.25
    }
}

// ─── Kick / bass ────────────────────────────────────────────────────────────

pub const KICK_NOTE: &str = "C1";

/// Four on the floor. The sidechain pulse fires on every beat even when
/// the audible kick is muted for the breakdown.
pub fn kick(ctx: &TickContext, out: &mut Vec<EngineEvent>) {
    if ctx.sixteenth % 4 != 0 {
        return;
    }
    if ctx.state != ArrangementState::Breakdown {
        out.push(EngineEvent::TriggerKick {
            note: KICK_NOTE.to_string(),
            duration: "8n",
        });
    }
    out.push(EngineEvent::TriggerSidechain {});
}

/// Off-beat root bass on the third sixteenth of each beat.
pub fn bass(ctx: &TickContext, out: &mut Vec<EngineEvent>) {
    if matches!(
        ctx.state,
        ArrangementState::Breakdown | ArrangementState::BuildUp
    ) {
        return;
    }
    if ctx.sixteenth % 4 == 2 {
        out.push(EngineEvent::TriggerBass {
            note: ROOT.to_string(),
            duration: "16n",
        });
    }
}

// ─── Lead ───────────────────────────────────────────────────────────────────

/// Scale indices of the fallback motif.
pub const MELODY_INDICES: [usize; 5] = [14, 18, 14, 23, 21];
/// Max distance (in beats) between a pattern onset and the tick position.
pub const PATTERN_TOLERANCE_BEATS: f64 = 0.05;
/// Scale index range substituted when a pattern note mutates.
pub const MUTATION_RANGE: std::ops::RangeInclusive<usize> = 7..=16;
pub const DETUNE_RANGE: f64 = 10.0;

/// Probability of a fallback lead note in each state.
pub fn lead_probability(state: ArrangementState) -> f64 {
    match state {
        ArrangementState::Drop => 0.6,
        ArrangementState::Breakdown => 0.2,
        _ => 0.3,
    }
}

/// Lead synth. Plays the first track of the loaded pattern as a one-bar
/// loop when there is one; otherwise sprinkles the fixed motif.
/// `melody_step` is the fallback motif cursor, advanced per emitted note.
pub fn lead<R: Rng + ?Sized>(
    ctx: &TickContext,
    melody_step: &mut usize,
    rng: &mut R,
    out: &mut Vec<EngineEvent>,
) {
    match ctx.pattern.and_then(|p| p.tracks.first()) {
        Some(track) => {
            let now = ctx.beat_in_bar();
            let beats_per_sec = ctx.bpm / 60.0;
            for note in &track.notes {
                let onset = (note.onset_secs * beats_per_sec).rem_euclid(BEATS_PER_BAR);
                if (onset - now).abs() >= PATTERN_TOLERANCE_BEATS {
                    continue;
                }
                let pitch = if rng.gen::<f64>() < ctx.mutation_rate {
                    SCALE[rng.gen_range(MUTATION_RANGE)].to_string()
                } else {
                    note.pitch.clone()
                };
                out.push(lead_trigger(pitch, rng));
            }
        }
        None => {
            if rng.gen::<f64>() < lead_probability(ctx.state) {
                let idx = MELODY_INDICES[*melody_step % MELODY_INDICES.len()];
                *melody_step += 1;
                out.push(lead_trigger(SCALE[idx].to_string(), rng));
            }
        }
    }
}

fn lead_trigger<R: Rng + ?Sized>(note: String, rng: &mut R) -> EngineEvent {
    EngineEvent::TriggerLead {
        note,
        duration: "16n",
        detune: rng.gen_range(-DETUNE_RANGE..DETUNE_RANGE),
    }
}

// ─── Chords / piano / pads ──────────────────────────────────────────────────

/// Gm – Cm – F – Dm, one chord per two bars.
pub const CHORD_PROGRESSION: [[&str; 3]; 4] = [
    ["G3", "Bb3", "D4"],
    ["C3", "Eb3", "G3"],
    ["F3", "A3", "C4"],
    ["D3", "F3", "A3"],
];

pub fn chords(ctx: &TickContext, out: &mut Vec<EngineEvent>) {
    if ctx.state != ArrangementState::Groove {
        return;
    }
    if ctx.sixteenth == 0 && ctx.bar % 2 == 0 {
        let chord = CHORD_PROGRESSION[((ctx.bar / 2) % 4) as usize];
        out.push(EngineEvent::TriggerChords {
            notes: chord.iter().map(|n| n.to_string()).collect(),
            duration: "2m",
        });
    }
}

pub const PIANO_PROBABILITY: f64 = 0.4;
/// Piano draws from the scale's upper half, this index and above.
pub const PIANO_LOW_INDEX: usize = 14;

/// Sparse upper-register piano for the breakdown.
pub fn piano<R: Rng + ?Sized>(ctx: &TickContext, rng: &mut R, out: &mut Vec<EngineEvent>) {
    if ctx.state != ArrangementState::Breakdown || ctx.sixteenth % 4 != 0 {
        return;
    }
    if rng.gen::<f64>() < PIANO_PROBABILITY {
        let idx = rng.gen_range(PIANO_LOW_INDEX..SCALE.len());
        out.push(EngineEvent::TriggerPiano {
            note: SCALE[idx].to_string(),
            duration: "2n",
        });
    }
}

pub const PAD_ROOTS: [&str; 4] = ["G2", "C3", "F2", "D2"];

pub fn pads<R: Rng + ?Sized>(ctx: &TickContext, rng: &mut R, out: &mut Vec<EngineEvent>) {
    if !matches!(
        ctx.state,
        ArrangementState::Groove | ArrangementState::Breakdown
    ) {
        return;
    }
    if ctx.sixteenth == 0 && ctx.bar % 4 == 0 {
        let note = PAD_ROOTS[rng.gen_range(0..PAD_ROOTS.len())];
        out.push(EngineEvent::TriggerPads {
            note: note.to_string(),
            duration: "4m",
        });
    }
}

// ─── Arp ────────────────────────────────────────────────────────────────────

/// One octave of G minor starting at G3.
pub const ARP_NOTES: [&str; 8] = ["G3", "A3", "Bb3", "C4", "D4", "Eb4", "F4", "G4"];

const ARP_UP: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
const ARP_DOWN: [usize; 8] = [7, 6, 5, 4, 3, 2, 1, 0];
const ARP_UP_DOWN: [usize; 14] = [0, 1, 2, 3, 4, 5, 6, 7, 6, 5, 4, 3, 2, 1];

/// Index into [`ARP_NOTES`] for a deterministic mode at this sixteenth.
/// `None` for [`ArpMode::Random`].
pub fn arp_step(mode: ArpMode, sixteenth: u32) -> Option<usize> {
    let steps: &[usize] = match mode {
        ArpMode::Up => &ARP_UP,
        ArpMode::Down => &ARP_DOWN,
        ArpMode::UpDown => &ARP_UP_DOWN,
        ArpMode::Random => return None,
    };
    Some(steps[sixteenth as usize % steps.len()])
}

pub fn arp<R: Rng + ?Sized>(ctx: &TickContext, rng: &mut R, out: &mut Vec<EngineEvent>) {
    if !matches!(ctx.state, ArrangementState::Drop | ArrangementState::Groove) {
        return;
    }
    let idx = arp_step(ctx.arp_mode, ctx.sixteenth)
        .unwrap_or_else(|| rng.gen_range(0..ARP_NOTES.len()));
    out.push(EngineEvent::TriggerArp {
        note: ARP_NOTES[idx].to_string(),
        duration: "16n",
    });
}

// ─── FX ─────────────────────────────────────────────────────────────────────

/// Snare-roll density for a bar, stepping up through the state window.
pub fn snare_probability(bar: u64) -> f64 {
    let phase = bar % crate::types::BARS_PER_STATE;
    if phase > 28 {
        1.0
    } else if phase > 24 {
        0.6
    } else if phase > 16 {
        0.3
    } else {
        0.0
    }
}

/// Build-up effects: a riser every 8 bars and an accelerating snare roll.
pub fn fx<R: Rng + ?Sized>(ctx: &TickContext, rng: &mut R, out: &mut Vec<EngineEvent>) {
    if ctx.state != ArrangementState::BuildUp {
        return;
    }
    if ctx.sixteenth == 0 && ctx.bar % 8 == 0 {
        out.push(EngineEvent::TriggerRiser { duration: "4m" });
    }
    if ctx.sixteenth % 2 == 0 {
        let p = snare_probability(ctx.bar);
        if p > 0.0 && rng.gen::<f64>() < p {
            out.push(EngineEvent::TriggerSnare { duration: "16n" });
        }
    }
}

/// Run every generator for one tick: kick, bass, lead, chords, piano,
/// pads, arp, fx.
pub fn generate_all<R: Rng + ?Sized>(
    ctx: &TickContext,
    melody_step: &mut usize,
    rng: &mut R,
    out: &mut Vec<EngineEvent>,
) {
    kick(ctx, out);
    bass(ctx, out);
    lead(ctx, melody_step, rng, out);
    chords(ctx, out);
    piano(ctx, rng, out);
    pads(ctx, rng, out);
    arp(ctx, rng, out);
    fx(ctx, rng, out);
}
