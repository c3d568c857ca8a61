use crate::modulator::{CUTOFF_PARAM, SPREAD_PARAM};
use crate::types::*;
use crossbeam_channel::Receiver;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Voice rows shown on the monitor: label and the events counted for it.
const VOICE_ROWS: [(&str, &str); 10] = [
    ("kick", "trigger_kick"),
    ("chain", "trigger_sidechain"),
    ("bass", "trigger_bass"),
    ("lead", "trigger_lead"),
    ("chords", "trigger_chords"),
    ("piano", "trigger_piano"),
    ("pads", "trigger_pads"),
    ("arp", "trigger_arp"),
    ("riser", "trigger_riser"),
    ("snare", "trigger_snare"),
];

/// What the monitor knows, rebuilt purely from the event stream.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub arrangement: ArrangementState,
    /// Bar of the last state change seen.
    pub section_bar: u64,
    /// One cutoff update arrives per tick.
    pub ticks: u64,
    pub cutoff: f64,
    pub spread: f64,
    pub last_lead: Option<String>,
    pub counts: [u64; VOICE_ROWS.len()],
}

impl MonitorState {
    /// Bar and sixteenth implied by the ticks seen so far.
    pub fn position(&self) -> (u64, u64) {
        (self.ticks / SIXTEENTHS_PER_BAR as u64, self.ticks % SIXTEENTHS_PER_BAR as u64)
    }

    pub fn observe(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::StateChange { state, bar } => {
                self.arrangement = *state;
                self.section_bar = *bar;
                // Dropped events leave the tick count behind; realign on the
                // bar the engine reports.
                if self.position().0 != *bar {
                    self.ticks = bar * SIXTEENTHS_PER_BAR as u64;
                }
            }
            EngineEvent::ParamUpdate { param, value } if *param == CUTOFF_PARAM => {
                self.cutoff = *value;
                self.ticks += 1;
            }
            EngineEvent::ParamUpdate { param, value } if *param == SPREAD_PARAM => {
                self.spread = *value;
            }
            EngineEvent::TriggerLead { note, .. } => {
                self.last_lead = Some(note.clone());
            }
            _ => {}
        }
        if let Some(i) = VOICE_ROWS.iter().position(|(_, name)| *name == event.name()) {
            self.counts[i] += 1;
        }
    }

    /// Count for a voice label, e.g. "kick".
    pub fn count(&self, label: &str) -> u64 {
        VOICE_ROWS
            .iter()
            .position(|(l, _)| *l == label)
            .map(|i| self.counts[i])
            .unwrap_or(0)
    }
}

/// Renders a live ASCII dashboard of the sequencer.
pub struct ConsoleDisplay {
    rx: Receiver<EngineEvent>,
    update_hz: u32,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<EngineEvent>, update_hz: u32) -> Self {
        Self { rx, update_hz }
    }

    pub fn run(&self) {
        let interval = Duration::from_millis(1000 / self.update_hz.max(1) as u64);
        let mut last_draw = Instant::now();
        let mut state = MonitorState::default();
        let mut stdout = io::stdout();

        for event in self.rx.iter() {
            state.observe(&event);
            if last_draw.elapsed() < interval {
                continue;
            }
            last_draw = Instant::now();
            render(&state, &mut stdout);
        }
    }
}

fn render(state: &MonitorState, out: &mut impl Write) {
    // Clear screen and move cursor home
    let _ = write!(out, "\x1b[2J\x1b[H");
    let _ = writeln!(out, "╔══════════════════════════════════════════════════════════╗");
    let _ = writeln!(out, "║  TRANCE ENGINE - Live Monitor                            ║");
    let _ = writeln!(out, "╠══════════════════════════════════════════════════════════╣");
    let (bar, sixteenth) = state.position();
    let _ = writeln!(
        out,
        "║  Section: {:<10} since bar {:<6} at {:>6}.{:02}      ║",
        state.arrangement.name(),
        state.section_bar,
        bar,
        sixteenth
    );
    let _ = writeln!(
        out,
        "║  Cutoff: {:>6.0} Hz {}            ║",
        state.cutoff,
        make_bar((state.cutoff / 4000.0) as f32, 20)
    );
    let _ = writeln!(
        out,
        "║  Spread: {:>6.1}    Lead: {:<6}                           ║",
        state.spread,
        state.last_lead.as_deref().unwrap_or("---")
    );
    let _ = writeln!(out, "║                                                          ║");
    let max = state.counts.iter().copied().max().unwrap_or(0).max(1);
    for (i, (label, _)) in VOICE_ROWS.iter().enumerate() {
        let n = state.counts[i];
        let _ = writeln!(
            out,
            "║  {:>6}: {} {:>8}             ║",
            label,
            make_bar(n as f32 / max as f32, 24),
            n
        );
    }
    let _ = writeln!(out, "╚══════════════════════════════════════════════════════════╝");
    let _ = out.flush();
}

fn make_bar(val: f32, width: usize) -> String {
    let filled = ((val.clamp(0.0, 1.0)) * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}
