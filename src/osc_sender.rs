use crate::scale::{midi_to_hz, parse_pitch};
use crate::types::EngineEvent;
use crossbeam_channel::Receiver;
use log::{debug, error, info};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

/// Forwards engine events to an OSC synth (SuperCollider, Pd, ...).
///
/// Address is `/trance/<event name>`. Note triggers carry
/// `[note name, frequency Hz, duration]`; see [`event_to_osc`].
pub struct OscSender {
    rx: Receiver<EngineEvent>,
    target: String,
}

impl OscSender {
    pub fn new(rx: Receiver<EngineEvent>, target: String) -> Self {
        Self { rx, target }
    }

    /// Run the OSC sender loop. Blocks the calling thread.
    pub fn run(&self) {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to bind UDP socket: {}", e);
                return;
            }
        };
        info!("OSC sender → {}", self.target);

        for event in self.rx.iter() {
            if let Err(e) = self.send_event(&socket, &event) {
                debug!("OSC send error: {}", e);
            }
        }
        info!("OSC sender shutting down");
    }

    fn send_event(
        &self,
        socket: &UdpSocket,
        event: &EngineEvent,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let packet = OscPacket::Message(event_to_osc(event));
        let buf = rosc::encoder::encode(&packet)?;
        socket.send_to(&buf, &self.target)?;
        Ok(())
    }
}

fn note_args(note: &str) -> Vec<OscType> {
    vec![
        OscType::String(note.to_string()),
        OscType::Float(midi_to_hz(parse_pitch(note) as f64) as f32),
    ]
}

/// Map an event onto a single OSC message.
pub fn event_to_osc(event: &EngineEvent) -> OscMessage {
    let mut args = Vec::new();
    match event {
        EngineEvent::StateChange { state, bar } => {
            args.push(OscType::String(state.name().to_string()));
            args.push(OscType::Int(*bar as i32));
        }
        EngineEvent::TriggerKick { note, duration }
        | EngineEvent::TriggerBass { note, duration }
        | EngineEvent::TriggerPiano { note, duration }
        | EngineEvent::TriggerPads { note, duration }
        | EngineEvent::TriggerArp { note, duration } => {
            args.extend(note_args(note));
            args.push(OscType::String(duration.to_string()));
        }
        EngineEvent::TriggerLead {
            note,
            duration,
            detune,
        } => {
            args.extend(note_args(note));
            args.push(OscType::String(duration.to_string()));
            args.push(OscType::Float(*detune as f32));
        }
        EngineEvent::TriggerChords { notes, duration } => {
            for n in notes {
                args.extend(note_args(n));
            }
            args.push(OscType::String(duration.to_string()));
        }
        EngineEvent::TriggerRiser { duration } | EngineEvent::TriggerSnare { duration } => {
            args.push(OscType::String(duration.to_string()));
        }
        EngineEvent::TriggerSidechain {} => {}
        EngineEvent::ParamUpdate { param, value } => {
            args.push(OscType::String(param.to_string()));
            args.push(OscType::Float(*value as f32));
        }
    }
    OscMessage {
        addr: format!("/trance/{}", event.name()),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArrangementState;

    #[test]
    fn test_kick_message() {
        let msg = event_to_osc(&EngineEvent::TriggerKick {
            note: "C1".into(),
            duration: "8n",
        });
        assert_eq!(msg.addr, "/trance/trigger_kick");
        assert_eq!(msg.args.len(), 3);
        assert_eq!(msg.args[0], OscType::String("C1".into()));
        match msg.args[1] {
            OscType::Float(hz) => assert!((hz - 32.70).abs() < 0.01),
            ref other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_chord_message_carries_every_note() {
        let msg = event_to_osc(&EngineEvent::TriggerChords {
            notes: vec!["G3".into(), "Bb3".into(), "D4".into()],
            duration: "2m",
        });
        assert_eq!(msg.args.len(), 7);
        assert_eq!(msg.args[6], OscType::String("2m".into()));
    }

    #[test]
    fn test_state_and_sidechain() {
        let msg = event_to_osc(&EngineEvent::StateChange {
            state: ArrangementState::Drop,
            bar: 96,
        });
        assert_eq!(msg.args, vec![OscType::String("Drop".into()), OscType::Int(96)]);

        let msg = event_to_osc(&EngineEvent::TriggerSidechain {});
        assert_eq!(msg.addr, "/trance/trigger_sidechain");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_encodes() {
        let msg = event_to_osc(&EngineEvent::ParamUpdate {
            param: "lead_cutoff",
            value: 1500.0,
        });
        assert!(rosc::encoder::encode(&OscPacket::Message(msg)).is_ok());
    }
}
