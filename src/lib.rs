pub mod arrangement;
pub mod console_display;
pub mod emitter;
pub mod engine;
pub mod modulator;
pub mod osc_sender;
pub mod pattern;
pub mod protocol;
pub mod scale;
pub mod scheduler;
pub mod types;
pub mod voices;
pub mod ws_server;
