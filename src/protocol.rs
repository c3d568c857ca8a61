//! JSON envelope shared by all transports: `{"event": name, "data": payload}`.

use crate::types::{ArpMode, Command, EngineEvent, Pattern};
use serde_json::Value;

/// Serialize an outbound event.
pub fn encode_event(event: &EngineEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Decode an inbound text message into a command.
pub fn decode_command(text: &str) -> Result<Command, String> {
    let raw: Value = serde_json::from_str(text).map_err(|e| format!("parse command: {}", e))?;
    let name = raw["event"]
        .as_str()
        .ok_or("missing \"event\" field")?;
    command_from_parts(name, &raw["data"])
}

/// Build a command from its event name and payload. Payload fields that
/// are missing or mistyped are errors only when the command can't do
/// anything sensible without them.
pub fn command_from_parts(name: &str, data: &Value) -> Result<Command, String> {
    match name {
        "start" | "start_music" => Ok(Command::Start),
        "stop" | "stop_music" => Ok(Command::Stop),
        "connect" => Ok(Command::Connect(None)),
        "update_pattern" => Ok(Command::UpdatePattern(Pattern::from_value(data))),
        "set_seed_pattern" => data["name"]
            .as_str()
            .map(|n| Command::SetSeedPattern(n.to_string()))
            .ok_or_else(|| "set_seed_pattern needs a \"name\"".to_string()),
        "set_mutation" => data["value"]
            .as_f64()
            .map(|v| Command::SetMutation(v.clamp(0.0, 100.0)))
            .ok_or_else(|| "set_mutation needs a numeric \"value\"".to_string()),
        "reset_pattern" => Ok(Command::ResetPattern),
        "set_arp_mode" => Ok(Command::SetArpMode(ArpMode::from_name(
            data["mode"].as_str().unwrap_or(""),
        ))),
        other => Err(format!("unknown command: {}", other)),
    }
}
