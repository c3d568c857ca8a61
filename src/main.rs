use trance_engine::console_display;
use trance_engine::emitter::ChannelEmitter;
use trance_engine::engine::{Engine, EngineConfig};
use trance_engine::osc_sender;
use trance_engine::pattern::PatternStore;
use trance_engine::scheduler::Scheduler;
use trance_engine::types::*;
use trance_engine::ws_server;

use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use std::path::PathBuf;
use std::thread;

#[derive(Parser)]
#[command(name = "trance-engine")]
#[command(about = "Procedural trance sequencer streaming trigger events to synth clients")]
struct Cli {
    /// WebSocket server bind address
    #[arg(long, default_value = "0.0.0.0:5000")]
    ws_addr: String,

    /// Disable the WebSocket transport
    #[arg(long)]
    no_ws: bool,

    /// Enable OSC output
    #[arg(long)]
    osc: bool,

    /// OSC target address
    #[arg(long, default_value = "127.0.0.1:57120")]
    osc_target: String,

    /// Directory of seed patterns for set_seed_pattern
    #[arg(long, default_value = "./patterns")]
    patterns_dir: PathBuf,

    /// RNG seed for a reproducible session
    #[arg(long)]
    seed: Option<u64>,

    /// Session tempo (fixed for the whole session)
    #[arg(long, default_value_t = DEFAULT_BPM, value_parser = parse_bpm)]
    bpm: f64,

    /// Start sequencing immediately instead of waiting for a client
    #[arg(long)]
    autostart: bool,

    /// Enable console monitor (terminal TUI, for headless/debug)
    #[arg(long)]
    console: bool,

    /// Console monitor refresh rate (Hz)
    #[arg(long, default_value_t = 10)]
    display_hz: u32,
}

fn parse_bpm(s: &str) -> Result<f64, String> {
    let bpm: f64 = s.parse().map_err(|e| format!("invalid BPM: {}", e))?;
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(format!("BPM must be positive, got {}", bpm))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let clock = SessionClock::new();

    info!("═══════════════════════════════════════════════");
    info!("  TRANCE ENGINE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Tempo: {:.1} BPM", cli.bpm);
    info!("  Patterns: {}", cli.patterns_dir.display());
    if !cli.no_ws { info!("  Transport: WebSocket on {}", cli.ws_addr); }
    if cli.osc { info!("  Transport: OSC → {}", cli.osc_target); }
    if cli.console { info!("  UI: Console monitor"); }
    info!("═══════════════════════════════════════════════");

    // Channels: engine → consumers
    let mut event_txs = Vec::new();
    let mut handles = Vec::new();

    // WebSocket channel is created now, the server thread once the
    // sequencer exists (it needs the command sender).
    let ws_rx = if cli.no_ws {
        None
    } else {
        let (tx, rx) = bounded::<EngineEvent>(4096);
        event_txs.push(tx);
        Some(rx)
    };

    // ─── OSC sender ─────────────────────────────────────────────────
    if cli.osc {
        let (tx, rx) = bounded::<EngineEvent>(4096);
        event_txs.push(tx);
        let target = cli.osc_target.clone();
        handles.push(thread::Builder::new().name("osc".into()).spawn(move || {
            osc_sender::OscSender::new(rx, target).run();
        }).unwrap());
    }

    // ─── Console monitor ────────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<EngineEvent>(1024);
        event_txs.push(tx);
        let hz = cli.display_hz;
        handles.push(thread::Builder::new().name("display".into()).spawn(move || {
            console_display::ConsoleDisplay::new(rx, hz).run();
        }).unwrap());
    }

    if event_txs.is_empty() {
        warn!("No event consumers enabled; events will be discarded");
    }

    // ─── Sequencer ──────────────────────────────────────────────────
    let store = PatternStore::new(cli.patterns_dir.clone());
    let seeds = store.list();
    if seeds.is_empty() {
        info!("No seed patterns in {}", store.dir().display());
    } else {
        info!("Seed patterns available: {}", seeds.join(", "));
    }
    let config = EngineConfig {
        bpm: cli.bpm,
        seed: cli.seed,
    };
    let engine = Engine::new(config, ChannelEmitter::new(event_txs)).with_pattern_store(store);
    let (engine_handle, sequencer) = Scheduler::spawn(engine, clock);

    // ─── WebSocket server ───────────────────────────────────────────
    if let Some(rx) = ws_rx {
        let command_tx = engine_handle.sender();
        let addr = cli.ws_addr.clone();
        handles.push(thread::Builder::new().name("ws-server".into()).spawn(move || {
            ws_server::WsServer::new(rx, command_tx, addr).run();
        }).unwrap());
    }

    if cli.autostart {
        engine_handle.start();
    }

    info!("Running. Press Ctrl+C to stop.");
    let _ = sequencer.join();
    for h in handles {
        let _ = h.join();
    }
}
