use crate::emitter::Emitter;
use crate::engine::Engine;
use crate::types::{sixteenth_duration, Command, SessionClock};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest the loop sleeps between deadline checks.
pub const MAX_YIELD: Duration = Duration::from_millis(5);

/// Absolute-deadline tick timer.
///
/// The deadline advances by exactly one interval per tick, never from
/// "now", so sleep/wake jitter is absorbed by the next tick instead of
/// accumulating. A late loop fires the overdue ticks back to back.
#[derive(Debug, Clone)]
pub struct TickTimer {
    interval: Duration,
    next: Duration,
}

impl TickTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The next deadline, measured on the session clock.
    pub fn deadline(&self) -> Duration {
        self.next
    }

    /// Re-arm with the first tick due immediately at `now`.
    pub fn reset(&mut self, now: Duration) {
        self.next = now;
    }

    /// If a tick is due at `now`, consume it and return true.
    pub fn poll(&mut self, now: Duration) -> bool {
        if now >= self.next {
            self.next += self.interval;
            true
        } else {
            false
        }
    }

    /// How long to wait before checking again, capped at [`MAX_YIELD`].
    pub fn wait(&self, now: Duration) -> Duration {
        self.next.saturating_sub(now).min(MAX_YIELD)
    }
}

/// Cloneable handle for sending commands to a running scheduler.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<Command>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Scheduler is gone; command dropped");
        }
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Raw sender, for transports that forward decoded commands.
    pub fn sender(&self) -> Sender<Command> {
        self.tx.clone()
    }
}

/// Owns the engine and drives it: ticks on the deadline while running,
/// applies commands as they arrive. All engine mutation happens on this
/// one thread.
pub struct Scheduler<E: Emitter> {
    engine: Engine<E>,
    rx: Receiver<Command>,
    clock: SessionClock,
    timer: TickTimer,
    ticks: u64,
}

impl<E: Emitter + Send + 'static> Scheduler<E> {
    pub fn new(engine: Engine<E>, rx: Receiver<Command>, clock: SessionClock) -> Self {
        let timer = TickTimer::new(sixteenth_duration(engine.bpm()));
        Self {
            engine,
            rx,
            clock,
            timer,
            ticks: 0,
        }
    }

    /// Spawn the scheduler thread. Returns the command handle and a join
    /// handle yielding the engine once the loop exits (on `Shutdown`, or
    /// when every handle has been dropped).
    pub fn spawn(engine: Engine<E>, clock: SessionClock) -> (EngineHandle, JoinHandle<Engine<E>>) {
        let (tx, rx) = unbounded();
        let scheduler = Scheduler::new(engine, rx, clock);
        let handle = thread::Builder::new()
            .name("sequencer".into())
            .spawn(move || scheduler.run())
            .expect("spawn sequencer thread");
        (EngineHandle { tx }, handle)
    }

    /// Run until shutdown. Blocks the calling thread.
    pub fn run(mut self) -> Engine<E> {
        info!(
            "Scheduler ready: {:.1} BPM, sixteenth = {:.3} ms",
            self.engine.bpm(),
            self.timer.interval().as_secs_f64() * 1000.0
        );

        loop {
            if !self.engine.is_running() {
                // Idle: park until a command arrives.
                match self.rx.recv() {
                    Ok(cmd) => {
                        if !self.handle(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            let now = self.clock.elapsed();
            if self.timer.poll(now) {
                self.run_tick();
                if !self.drain() {
                    break;
                }
                continue;
            }

            match self.rx.recv_timeout(self.timer.wait(now)) {
                Ok(cmd) => {
                    if !self.handle(cmd) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("Scheduler shutting down after {} ticks", self.ticks);
        self.engine
    }

    /// Apply whatever commands are already queued. False on shutdown.
    fn drain(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => {
                    if !self.handle(cmd) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Apply one command. False if the loop should exit.
    fn handle(&mut self, cmd: Command) -> bool {
        if cmd == Command::Shutdown {
            return false;
        }
        let was_running = self.engine.is_running();
        let name = cmd.name();
        let engine = &mut self.engine;
        if panic::catch_unwind(AssertUnwindSafe(|| engine.apply(cmd))).is_err() {
            error!("Command '{}' panicked; ignoring", name);
        }
        if !was_running && self.engine.is_running() {
            self.timer.reset(self.clock.elapsed());
        }
        true
    }

    /// One tick, isolated so a panicking generator can't take the loop down.
    fn run_tick(&mut self) {
        let engine = &mut self.engine;
        if panic::catch_unwind(AssertUnwindSafe(|| engine.tick())).is_err() {
            error!(
                "Tick at bar {} sixteenth {} panicked; skipping",
                self.engine.state().position.bar,
                self.engine.state().position.sixteenth
            );
            self.engine.skip_tick();
        }
        self.ticks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::types::EngineEvent;

    fn ms(v: f64) -> Duration {
        Duration::from_secs_f64(v / 1000.0)
    }

    #[test]
    fn test_timer_fires_immediately_after_reset() {
        let mut t = TickTimer::new(ms(100.0));
        t.reset(ms(1000.0));
        assert!(t.poll(ms(1000.0)));
        assert!(!t.poll(ms(1000.0)));
        assert_eq!(t.deadline(), ms(1100.0));
    }

    #[test]
    fn test_timer_jitter_does_not_accumulate() {
        let interval = sixteenth_duration(140.0);
        let mut t = TickTimer::new(interval);
        t.reset(Duration::ZERO);
        // Every wake-up is 3 ms late; the deadlines stay on the grid.
        let mut fired = 0u32;
        let mut now = Duration::ZERO;
        while fired < 1000 {
            if t.poll(now) {
                fired += 1;
                now = t.deadline() + Duration::from_millis(3);
            } else {
                now += t.wait(now);
            }
        }
        let expected = interval * 1000;
        assert_eq!(t.deadline(), expected);
    }

    #[test]
    fn test_timer_catches_up_after_stall() {
        let mut t = TickTimer::new(ms(100.0));
        t.reset(Duration::ZERO);
        // Stalled for 350 ms: ticks at 0, 100, 200, 300 are all due.
        let now = ms(350.0);
        let mut n = 0;
        while t.poll(now) {
            n += 1;
        }
        assert_eq!(n, 4);
        assert_eq!(t.deadline(), ms(400.0));
    }

    #[test]
    fn test_wait_is_bounded() {
        let mut t = TickTimer::new(ms(100.0));
        t.reset(Duration::ZERO);
        t.poll(Duration::ZERO);
        assert_eq!(t.wait(Duration::ZERO), MAX_YIELD);
        assert_eq!(t.wait(ms(98.0)), ms(2.0));
        assert_eq!(t.wait(ms(150.0)), Duration::ZERO);
    }

    #[test]
    fn test_shutdown_returns_engine() {
        let engine = Engine::new(EngineConfig::default(), Vec::<EngineEvent>::new());
        let (handle, join) = Scheduler::spawn(engine, SessionClock::new());
        handle.send(Command::SetMutation(25.0));
        handle.shutdown();
        let engine = join.join().unwrap();
        assert_eq!(engine.state().mutation_rate, 0.25);
        assert!(engine.emitter().is_empty());
    }

    /// Panics on the first state announcement.
    struct AnnounceFails(Vec<EngineEvent>);

    impl Emitter for AnnounceFails {
        fn emit(&mut self, event: &EngineEvent) {
            if matches!(event, EngineEvent::StateChange { .. }) {
                panic!("announce failed");
            }
            self.0.push(event.clone());
        }
    }

    #[test]
    fn test_panicking_command_keeps_loop_alive() {
        let engine = Engine::new(EngineConfig::default(), AnnounceFails(Vec::new()));
        let (handle, join) = Scheduler::spawn(engine, SessionClock::new());
        handle.send(Command::Connect(None));
        handle.send(Command::SetMutation(50.0));
        handle.stop();
        handle.shutdown();
        let engine = join.join().expect("scheduler thread survives");
        assert_eq!(engine.state().mutation_rate, 0.5);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_dropping_handle_ends_loop() {
        let engine = Engine::new(EngineConfig::default(), Vec::<EngineEvent>::new());
        let (handle, join) = Scheduler::spawn(engine, SessionClock::new());
        drop(handle);
        assert!(join.join().is_ok());
    }
}
