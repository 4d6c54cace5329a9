use coversim_core::{CharacteristicSink, Emission, PositionState};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::Sender;

/// A value change of one covering, as sent to event stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoveringEvent {
    pub covering: String,
    pub characteristic: &'static str,
    pub value: Value,
}

/// Forwards emissions of one covering to the shared broadcast channel.
pub struct BroadcastSink {
    covering: String,
    sender: Sender<CoveringEvent>,
}

impl BroadcastSink {
    pub fn new(covering: impl Into<String>, sender: Sender<CoveringEvent>) -> Self {
        Self {
            covering: covering.into(),
            sender,
        }
    }

    fn publish(&self, emission: Emission) {
        let event = CoveringEvent {
            covering: self.covering.clone(),
            characteristic: emission.characteristic(),
            value: emission.value(),
        };

        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl CharacteristicSink for BroadcastSink {
    fn emit_current_position(&self, position: u8) {
        self.publish(Emission::CurrentPosition(position));
    }

    fn emit_target_position(&self, position: u8) {
        self.publish(Emission::TargetPosition(position));
    }

    fn emit_position_state(&self, state: PositionState) {
        self.publish(Emission::PositionState(state));
    }

    fn emit_obstruction(&self, detected: bool) {
        self.publish(Emission::ObstructionDetected(detected));
    }
}
