//! Where engine events go.

use crate::types::EngineEvent;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info};

/// Receives every event the engine produces, in emission order.
pub trait Emitter {
    fn emit(&mut self, event: &EngineEvent);
}

/// Collects events in memory.
impl Emitter for Vec<EngineEvent> {
    fn emit(&mut self, event: &EngineEvent) {
        self.push(event.clone());
    }
}

/// Fans events out to downstream consumers (WebSocket, OSC, console),
/// one bounded channel each. Never blocks the tick loop: a full channel
/// drops the event for that consumer, a disconnected one is removed.
pub struct ChannelEmitter {
    txs: Vec<Sender<EngineEvent>>,
    dropped: u64,
}

impl ChannelEmitter {
    pub fn new(txs: Vec<Sender<EngineEvent>>) -> Self {
        Self { txs, dropped: 0 }
    }

    pub fn consumers(&self) -> usize {
        self.txs.len()
    }

    /// Events discarded because a consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&mut self, event: &EngineEvent) {
        let mut dropped = 0;
        self.txs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                info!("Event consumer disconnected");
                false
            }
        });
        if dropped > 0 {
            self.dropped += dropped;
            if self.dropped % 100 == 1 {
                debug!("Consumer backlog: {} events dropped so far", self.dropped);
            }
        }
    }
}
