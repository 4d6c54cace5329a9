use std::fmt;

use reqwest::Method;
use serde_json::Value;

use crate::command::Command;
use crate::error::{ConfigError, ReadbackError};
use crate::gateway::Gateway;

/// Location of the position inside a JSON readback body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPointer(String);

impl PositionPointer {
    /// Accepts an RFC 6901 pointer (`/state/position`) or a dotted path (`state.position`).
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::InvalidPointer(raw.to_string()));
        }

        if raw.starts_with('/') {
            if raw[1..].split('/').any(str::is_empty) {
                return Err(ConfigError::InvalidPointer(raw.to_string()));
            }
            return Ok(Self(raw.to_string()));
        }

        let mut pointer = String::with_capacity(raw.len() + 1);
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(ConfigError::InvalidPointer(raw.to_string()));
            }
            pointer.push('/');
            pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
        }

        Ok(Self(pointer))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        value.pointer(&self.0)
    }
}

impl fmt::Display for PositionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(text) => parse_integer(text),
        _ => None,
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();

    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

fn in_range(raw: i64) -> Result<u8, ReadbackError> {
    u8::try_from(raw)
        .ok()
        .filter(|pos| *pos <= 100)
        .ok_or(ReadbackError::OutOfRange(raw))
}

/// Extracts a 0..=100 position from a readback body.
pub fn parse_position(body: &str, pointer: Option<&PositionPointer>) -> Result<u8, ReadbackError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ReadbackError::Empty);
    }

    let json = serde_json::from_str::<Value>(trimmed).ok();

    if let (Some(pointer), Some(json)) = (pointer, json.as_ref()) {
        if let Some(raw) = pointer.resolve(json).and_then(as_integer) {
            return in_range(raw);
        }
        tracing::debug!("Position pointer {} did not match, using fallback parsing", pointer);
    }

    if let Some(raw) = parse_integer(trimmed) {
        return in_range(raw);
    }

    let raw = match json {
        Some(Value::Object(map)) => map.values().find_map(as_integer),
        Some(other) => as_integer(&other),
        None => None,
    };

    match raw {
        Some(raw) => in_range(raw),
        None => Err(ReadbackError::Unparseable(trimmed.to_string())),
    }
}

/// Confirms the simulated position against an optional readback endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciler {
    endpoint: Option<Command>,
    pointer: Option<PositionPointer>,
}

impl Reconciler {
    pub fn new(endpoint: Option<Command>, pointer: Option<PositionPointer>) -> Self {
        Self { endpoint, pointer }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn current_position(
        &self,
        gateway: &dyn Gateway,
        simulated: u8,
    ) -> Result<u8, ReadbackError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(simulated);
        };

        let method = endpoint
            .method(&Method::GET)
            .map_err(|e| ReadbackError::Transport(e.to_string()))?;

        let reply = gateway
            .send(endpoint, method)
            .await
            .map_err(|e| ReadbackError::Transport(e.to_string()))?;

        parse_position(&reply.body, self.pointer.as_ref())
    }
}
