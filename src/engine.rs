use crate::arrangement::{self, Position};
use crate::emitter::Emitter;
use crate::modulator;
use crate::pattern::{ingest, PatternStore};
use crate::types::*;
use crate::voices::{self, TickContext};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Library-side session settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed session tempo.
    pub bpm: f64,
    /// Seed for the engine RNG. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            seed: None,
        }
    }
}

/// The evolving state of one session.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub running: bool,
    pub arrangement: ArrangementState,
    pub position: Position,
    /// Cursor into the fallback motif; only moves when no pattern is loaded.
    pub melody_step: usize,
    /// 0.0–1.0
    pub mutation_rate: f64,
    pub arp_mode: ArpMode,
    /// Already scale-snapped.
    pub pattern: Option<Pattern>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            running: false,
            arrangement: ArrangementState::Groove,
            position: Position::default(),
            melody_step: 0,
            mutation_rate: 0.0,
            arp_mode: ArpMode::UpDown,
            pattern: None,
        }
    }

    /// Clear the pattern and the settings that shape it.
    pub fn reset_pattern(&mut self) {
        self.pattern = None;
        self.mutation_rate = 0.0;
        self.arp_mode = ArpMode::UpDown;
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// One sequencer session: state, randomness, and the event sink.
///
/// `tick()` runs the per-sixteenth pipeline:
///   arrangement check → voices (fixed order) → parameters → counters.
/// `apply()` handles control commands between ticks.
pub struct Engine<E: Emitter> {
    state: EngineState,
    rng: StdRng,
    emitter: E,
    store: Option<PatternStore>,
    bpm: f64,
    scratch: Vec<EngineEvent>,
}

impl<E: Emitter> Engine<E> {
    pub fn new(config: EngineConfig, emitter: E) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: EngineState::new(),
            rng,
            emitter,
            store: None,
            bpm: config.bpm,
            scratch: Vec::with_capacity(32),
        }
    }

    /// Attach the directory `set_seed_pattern` reads from.
    pub fn with_pattern_store(mut self, store: PatternStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut E {
        &mut self.emitter
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Current arrangement state as a `state_change` event.
    pub fn snapshot(&self) -> EngineEvent {
        EngineEvent::StateChange {
            state: self.state.arrangement,
            bar: self.state.position.bar,
        }
    }

    /// Execute one sixteenth.
    pub fn tick(&mut self) {
        let pos = self.state.position;

        if let Some(next) = arrangement::step(&mut self.state.arrangement, pos) {
            info!("Arrangement → {} at bar {}", next, pos.bar);
            self.scratch.push(EngineEvent::StateChange {
                state: next,
                bar: pos.bar,
            });
        }

        let ctx = TickContext {
            state: self.state.arrangement,
            bar: pos.bar,
            sixteenth: pos.sixteenth,
            pattern: self.state.pattern.as_ref(),
            mutation_rate: self.state.mutation_rate,
            arp_mode: self.state.arp_mode,
            bpm: self.bpm,
        };
        voices::generate_all(
            &ctx,
            &mut self.state.melody_step,
            &mut self.rng,
            &mut self.scratch,
        );
        modulator::modulate(
            self.state.arrangement,
            pos.bar,
            &mut self.rng,
            &mut self.scratch,
        );

        trace!(
            "tick {}:{:02} {} → {} events",
            pos.bar,
            pos.sixteenth,
            self.state.arrangement,
            self.scratch.len()
        );
        for event in self.scratch.drain(..) {
            self.emitter.emit(&event);
        }

        self.state.position.advance();
    }

    /// Move past a tick whose generation failed, keeping counters in step
    /// with the clock.
    pub fn skip_tick(&mut self) {
        self.scratch.clear();
        self.state.position.advance();
    }

    /// Apply a control command. `Shutdown` is the scheduler's business and
    /// is ignored here.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Start => {
                if !self.state.running {
                    info!("Sequencer starting at bar {}", self.state.position.bar);
                    self.state.running = true;
                }
            }
            Command::Stop => {
                if self.state.running {
                    info!("Sequencer stopping at bar {}", self.state.position.bar);
                }
                self.state.running = false;
            }
            Command::Connect(reply) => {
                self.apply(Command::Start);
                let snapshot = self.snapshot();
                match reply {
                    Some(SnapshotReply(tx)) => {
                        if tx.try_send(snapshot).is_err() {
                            debug!("Connect snapshot undeliverable; client gone");
                        }
                    }
                    None => self.emitter.emit(&snapshot),
                }
            }
            Command::UpdatePattern(raw) => {
                let snapped = ingest(&raw);
                info!(
                    "Pattern updated: {} tracks, {} notes",
                    snapped.tracks.len(),
                    snapped.note_count()
                );
                self.state.pattern = Some(snapped);
            }
            Command::SetSeedPattern(name) => {
                let loaded = self.store.as_ref().and_then(|s| s.load(&name));
                match loaded {
                    Some(raw) => self.state.pattern = Some(ingest(&raw)),
                    None => debug!("Seed '{}' not loaded, keeping current pattern", name),
                }
            }
            Command::SetMutation(percent) => {
                self.state.mutation_rate = percent.clamp(0.0, 100.0) / 100.0;
                debug!("Mutation rate {:.2}", self.state.mutation_rate);
            }
            Command::ResetPattern => {
                info!("Pattern reset");
                self.state.reset_pattern();
            }
            Command::SetArpMode(mode) => {
                debug!("Arp mode {:?}", mode);
                self.state.arp_mode = mode;
            }
            Command::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine() -> Engine<Vec<EngineEvent>> {
        Engine::new(
            EngineConfig {
                bpm: DEFAULT_BPM,
                seed: Some(42),
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_initial_state() {
        let e = engine();
        let s = e.state();
        assert!(!s.running);
        assert_eq!(s.arrangement, ArrangementState::Groove);
        assert_eq!(s.position, Position::default());
        assert_eq!(s.arp_mode, ArpMode::UpDown);
        assert_eq!(s.mutation_rate, 0.0);
        assert!(s.pattern.is_none());
    }

    #[test]
    fn test_sixteen_ticks_make_a_bar() {
        let mut e = engine();
        for _ in 0..16 {
            e.tick();
        }
        assert_eq!(e.state().position, Position { bar: 1, sixteenth: 0 });
    }

    #[test]
    fn test_state_change_emitted_every_32_bars() {
        let mut e = engine();
        for _ in 0..16 * 128 {
            e.tick();
        }
        let changes: Vec<(ArrangementState, u64)> = e
            .emitter()
            .iter()
            .filter_map(|ev| match ev {
                EngineEvent::StateChange { state, bar } => Some((*state, *bar)),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (ArrangementState::Breakdown, 32),
                (ArrangementState::BuildUp, 64),
                (ArrangementState::Drop, 96),
            ]
        );
    }

    #[test]
    fn test_state_change_precedes_voices() {
        let mut e = engine();
        for _ in 0..16 * 32 {
            e.tick();
        }
        e.emitter_mut().clear();
        e.tick();
        assert_eq!(e.emitter()[0].name(), "state_change");
    }

    #[test]
    fn test_every_tick_sends_params() {
        let mut e = engine();
        for _ in 0..64 {
            e.tick();
        }
        let params = e
            .emitter()
            .iter()
            .filter(|ev| ev.name() == "param_update")
            .count();
        assert_eq!(params, 128);
    }

    #[test]
    fn test_start_idempotent_and_stop() {
        let mut e = engine();
        e.apply(Command::Start);
        e.apply(Command::Start);
        assert!(e.is_running());
        e.apply(Command::Stop);
        assert!(!e.is_running());
        e.apply(Command::Stop);
        assert!(!e.is_running());
    }

    #[test]
    fn test_connect_starts_and_announces() {
        let mut e = engine();
        e.apply(Command::Connect(None));
        assert!(e.is_running());
        assert_eq!(
            e.emitter().last(),
            Some(&EngineEvent::StateChange {
                state: ArrangementState::Groove,
                bar: 0
            })
        );
    }

    #[test]
    fn test_connect_reply_goes_only_to_requester() {
        let mut e = engine();
        for _ in 0..16 * 33 + 5 {
            e.tick();
        }
        e.emitter_mut().clear();
        let (tx, rx) = crossbeam_channel::bounded(1);
        e.apply(Command::Connect(Some(SnapshotReply(tx))));
        assert!(e.emitter().is_empty());
        assert_eq!(
            rx.try_recv(),
            Ok(EngineEvent::StateChange {
                state: ArrangementState::Breakdown,
                bar: 33
            })
        );
    }

    #[test]
    fn test_set_mutation_percent() {
        let mut e = engine();
        e.apply(Command::SetMutation(50.0));
        assert_eq!(e.state().mutation_rate, 0.5);
        e.apply(Command::SetMutation(250.0));
        assert_eq!(e.state().mutation_rate, 1.0);
        e.apply(Command::SetMutation(-3.0));
        assert_eq!(e.state().mutation_rate, 0.0);
    }

    #[test]
    fn test_update_pattern_snaps() {
        let mut e = engine();
        e.apply(Command::UpdatePattern(Pattern::single_track(vec![Note::new(
            "B3", 0.0,
        )])));
        let p = e.state().pattern.as_ref().unwrap();
        assert_eq!(p.tracks[0].notes[0].pitch, "Bb3");
    }

    #[test]
    fn test_reset_pattern() {
        let mut e = engine();
        e.apply(Command::UpdatePattern(Pattern::single_track(vec![])));
        e.apply(Command::SetMutation(80.0));
        e.apply(Command::SetArpMode(ArpMode::Down));
        e.apply(Command::ResetPattern);
        let s = e.state();
        assert!(s.pattern.is_none());
        assert_eq!(s.mutation_rate, 0.0);
        assert_eq!(s.arp_mode, ArpMode::UpDown);
    }

    #[test]
    fn test_missing_seed_keeps_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine().with_pattern_store(PatternStore::new(dir.path()));
        e.apply(Command::UpdatePattern(Pattern::single_track(vec![Note::new(
            "G3", 0.0,
        )])));
        let before = e.state().pattern.clone();
        let emitted = e.emitter().len();
        e.apply(Command::SetSeedPattern("ghost".into()));
        assert_eq!(e.state().pattern, before);
        assert_eq!(e.emitter().len(), emitted);
    }

    #[test]
    fn test_seed_loads_and_snaps() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("lift.json"),
            r#"{"tracks":[{"notes":[{"name":"E4","time":0.0}]}]}"#,
        )
        .unwrap();
        let mut e = engine().with_pattern_store(PatternStore::new(dir.path()));
        e.apply(Command::SetSeedPattern("lift".into()));
        let p = e.state().pattern.as_ref().unwrap();
        assert_eq!(p.tracks[0].notes[0].pitch, "Eb4");
    }

    #[test]
    fn test_seed_without_store_is_noop() {
        let mut e = engine();
        e.apply(Command::SetSeedPattern("anything".into()));
        assert!(e.state().pattern.is_none());
    }

    #[test]
    fn test_pattern_note_at_zero_fires_on_first_tick() {
        let mut e = engine();
        e.apply(Command::UpdatePattern(Pattern::single_track(vec![Note::new(
            "G3", 0.0,
        )])));
        e.tick();
        let leads: Vec<&EngineEvent> = e
            .emitter()
            .iter()
            .filter(|ev| ev.name() == "trigger_lead")
            .collect();
        assert_eq!(leads.len(), 1);
        assert!(matches!(leads[0], EngineEvent::TriggerLead { note, .. } if note == "G3"));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let run = || {
            let mut e = engine();
            for _ in 0..16 * 40 {
                e.tick();
            }
            e.emitter().clone()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_skip_tick_advances() {
        let mut e = engine();
        e.skip_tick();
        assert_eq!(e.state().position.sixteenth, 1);
        assert!(e.emitter().is_empty());
    }
}
