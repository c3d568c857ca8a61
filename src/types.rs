use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// ─── Timing constants ───────────────────────────────────────────────────────

/// Session tempo unless overridden at startup. Never changes mid-session.
pub const DEFAULT_BPM: f64 = 140.0;
/// Beats per bar (4/4).
pub const BEATS_PER_BAR: f64 = 4.0;
/// Sixteenths per bar; the sixteenth counter wraps here.
pub const SIXTEENTHS_PER_BAR: u32 = 16;
/// Bars spent in each arrangement state before advancing.
pub const BARS_PER_STATE: u64 = 32;

/// Duration of one sixteenth note: 60 / BPM / 4 seconds.
pub fn sixteenth_duration(bpm: f64) -> Duration {
    Duration::from_secs_f64(60.0 / bpm / 4.0)
}

// ─── Arrangement state ──────────────────────────────────────────────────────

/// The four sections of the arrangement, in cyclic order.
/// Serializes as the display strings the browser client switches on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ArrangementState {
    #[default]
    Groove,
    Breakdown,
    #[serde(rename = "Build-up")]
    BuildUp,
    Drop,
}

impl ArrangementState {
    /// Transition table: index `i` advances to `ALL[(i + 1) % 4]`.
    pub const ALL: [ArrangementState; 4] = [
        ArrangementState::Groove,
        ArrangementState::Breakdown,
        ArrangementState::BuildUp,
        ArrangementState::Drop,
    ];

    pub fn index(self) -> usize {
        match self {
            ArrangementState::Groove => 0,
            ArrangementState::Breakdown => 1,
            ArrangementState::BuildUp => 2,
            ArrangementState::Drop => 3,
        }
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn name(self) -> &'static str {
        match self {
            ArrangementState::Groove => "Groove",
            ArrangementState::Breakdown => "Breakdown",
            ArrangementState::BuildUp => "Build-up",
            ArrangementState::Drop => "Drop",
        }
    }
}

impl fmt::Display for ArrangementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Arpeggiator mode ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ArpMode {
    Up,
    Down,
    #[default]
    UpDown,
    Random,
}

impl ArpMode {
    /// Parse a wire name. Anything unrecognized falls back to `UpDown`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "up" => ArpMode::Up,
            "down" => ArpMode::Down,
            "random" => ArpMode::Random,
            _ => ArpMode::UpDown,
        }
    }
}

// ─── Patterns ───────────────────────────────────────────────────────────────

/// One note of an externally supplied pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Note {
    /// Pitch name, e.g. "Bb3". Wire key: `name`.
    #[serde(rename = "name", default)]
    pub pitch: String,
    /// Onset within the pattern, in seconds. Wire key: `time`.
    #[serde(rename = "time", default)]
    pub onset_secs: f64,
}

impl Note {
    pub fn new(pitch: impl Into<String>, onset_secs: f64) -> Self {
        Self {
            pitch: pitch.into(),
            onset_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Track {
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Ordered collection of tracks. Only the first track drives the lead voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Pattern {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Pattern {
    pub fn single_track(notes: Vec<Note>) -> Self {
        Self {
            tracks: vec![Track { notes }],
        }
    }

    /// Build a pattern from loosely shaped JSON. Missing or mistyped fields
    /// degrade to defaults rather than failing: no `tracks` array gives an
    /// empty pattern, a note without a usable `name` gets an empty pitch
    /// (which later parses to the sentinel pitch), a missing `time` is 0.0.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let tracks = value["tracks"]
            .as_array()
            .map(|tracks| {
                tracks
                    .iter()
                    .map(|track| Track {
                        notes: track["notes"]
                            .as_array()
                            .map(|notes| {
                                notes
                                    .iter()
                                    .map(|n| Note {
                                        pitch: n["name"].as_str().unwrap_or("").to_string(),
                                        onset_secs: n["time"].as_f64().unwrap_or(0.0),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { tracks }
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

// ─── Outbound events ────────────────────────────────────────────────────────

/// Everything the engine tells the outside world.
/// Serializes as `{"event": "<snake_case name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChange {
        state: ArrangementState,
        bar: u64,
    },
    TriggerKick {
        note: String,
        duration: &'static str,
    },
    /// Ducking pulse for the client-side sidechain; carries no payload.
    TriggerSidechain {},
    TriggerBass {
        note: String,
        duration: &'static str,
    },
    TriggerLead {
        note: String,
        duration: &'static str,
        detune: f64,
    },
    TriggerChords {
        notes: Vec<String>,
        duration: &'static str,
    },
    TriggerPiano {
        note: String,
        duration: &'static str,
    },
    TriggerPads {
        note: String,
        duration: &'static str,
    },
    TriggerArp {
        note: String,
        duration: &'static str,
    },
    TriggerRiser {
        duration: &'static str,
    },
    TriggerSnare {
        duration: &'static str,
    },
    ParamUpdate {
        param: &'static str,
        value: f64,
    },
}

impl EngineEvent {
    /// Wire name of the event (same string as the serialized `event` tag).
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::StateChange { .. } => "state_change",
            EngineEvent::TriggerKick { .. } => "trigger_kick",
            EngineEvent::TriggerSidechain {} => "trigger_sidechain",
            EngineEvent::TriggerBass { .. } => "trigger_bass",
            EngineEvent::TriggerLead { .. } => "trigger_lead",
            EngineEvent::TriggerChords { .. } => "trigger_chords",
            EngineEvent::TriggerPiano { .. } => "trigger_piano",
            EngineEvent::TriggerPads { .. } => "trigger_pads",
            EngineEvent::TriggerArp { .. } => "trigger_arp",
            EngineEvent::TriggerRiser { .. } => "trigger_riser",
            EngineEvent::TriggerSnare { .. } => "trigger_snare",
            EngineEvent::ParamUpdate { .. } => "param_update",
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::StateChange { state, bar } => {
                write!(f, "state → {} @ bar {}", state, bar)
            }
            EngineEvent::TriggerLead { note, detune, .. } => {
                write!(f, "lead {} ({:+.1})", note, detune)
            }
            EngineEvent::TriggerChords { notes, .. } => write!(f, "chords [{}]", notes.join(" ")),
            EngineEvent::TriggerKick { note, .. }
            | EngineEvent::TriggerBass { note, .. }
            | EngineEvent::TriggerPiano { note, .. }
            | EngineEvent::TriggerPads { note, .. }
            | EngineEvent::TriggerArp { note, .. } => write!(f, "{} {}", self.name(), note),
            EngineEvent::ParamUpdate { param, value } => write!(f, "{} = {:.1}", param, value),
            _ => f.write_str(self.name()),
        }
    }
}

// ─── Inbound commands ───────────────────────────────────────────────────────

/// Where a `connect` snapshot goes instead of the shared event stream.
#[derive(Debug, Clone)]
pub struct SnapshotReply(pub Sender<EngineEvent>);

impl PartialEq for SnapshotReply {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_channel(&other.0)
    }
}

/// Control messages delivered to the engine's owning thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    /// A client attached: start if idle and announce the current state,
    /// to the reply channel if given, otherwise to every consumer.
    Connect(Option<SnapshotReply>),
    /// Raw pattern as received; the engine ingests it before use.
    UpdatePattern(Pattern),
    SetSeedPattern(String),
    /// Mutation amount as a percentage, 0–100.
    SetMutation(f64),
    ResetPattern,
    SetArpMode(ArpMode),
    /// Terminate the scheduler thread.
    Shutdown,
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Connect(_) => "connect",
            Command::UpdatePattern(_) => "update_pattern",
            Command::SetSeedPattern(_) => "set_seed_pattern",
            Command::SetMutation(_) => "set_mutation",
            Command::ResetPattern => "reset_pattern",
            Command::SetArpMode(_) => "set_arp_mode",
            Command::Shutdown => "shutdown",
        }
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
