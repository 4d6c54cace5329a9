use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Decreasing,
    Increasing,
    #[default]
    Stopped,
}

/// A value change pushed out to the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    CurrentPosition(u8),
    TargetPosition(u8),
    PositionState(PositionState),
    ObstructionDetected(bool),
}

impl Emission {
    pub fn characteristic(&self) -> &'static str {
        match self {
            Emission::CurrentPosition(_) => "current_position",
            Emission::TargetPosition(_) => "target_position",
            Emission::PositionState(_) => "position_state",
            Emission::ObstructionDetected(_) => "obstruction_detected",
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Emission::CurrentPosition(pos) | Emission::TargetPosition(pos) => Value::from(*pos),
            Emission::PositionState(state) => {
                serde_json::to_value(state).unwrap_or(Value::Null)
            }
            Emission::ObstructionDetected(flag) => Value::from(*flag),
        }
    }

    pub fn deliver(&self, sink: &dyn CharacteristicSink) {
        match *self {
            Emission::CurrentPosition(pos) => sink.emit_current_position(pos),
            Emission::TargetPosition(pos) => sink.emit_target_position(pos),
            Emission::PositionState(state) => sink.emit_position_state(state),
            Emission::ObstructionDetected(flag) => sink.emit_obstruction(flag),
        }
    }
}

/// Receives value-change notifications for one covering.
pub trait CharacteristicSink: Send + Sync + 'static {
    fn emit_current_position(&self, position: u8);

    fn emit_target_position(&self, position: u8);

    fn emit_position_state(&self, state: PositionState);

    fn emit_obstruction(&self, detected: bool);
}
