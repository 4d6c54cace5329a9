use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Prefix that turns an endpoint into a local shell command.
pub const LOCAL_PREFIX: &str = "file://";

const POSITION_MARKERS: [&str; 2] = ["%%POS%%", "\"%%POSINT%%\""];

/// A request sent to the covering, either a bare URL or a full request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Literal(String),
    Structured(RequestSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Body>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Text(String),
    Json(serde_json::Value),
}

impl Command {
    pub fn url(&self) -> &str {
        match self {
            Command::Literal(url) => url,
            Command::Structured(spec) => &spec.url,
        }
    }

    /// The shell command line when the endpoint is a local-execution reference.
    pub fn local_command(&self) -> Option<&str> {
        let url = self.url();
        let prefix = url.get(..LOCAL_PREFIX.len())?;

        prefix
            .eq_ignore_ascii_case(LOCAL_PREFIX)
            .then(|| &url[LOCAL_PREFIX.len()..])
    }

    /// Method for this command; literal endpoints use `default`.
    pub fn method(&self, default: &Method) -> Result<Method, TransportError> {
        match self {
            Command::Literal(_) => Ok(default.clone()),
            Command::Structured(RequestSpec { method: None, .. }) => Ok(Method::GET),
            Command::Structured(RequestSpec {
                method: Some(method),
                ..
            }) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| TransportError::Invalid(format!("unknown HTTP method `{method}`"))),
        }
    }

    /// Substitutes the position markers with `value`.
    ///
    /// Returns `None` when neither the URL nor the body carries a marker.
    pub fn with_position(&self, value: i64) -> Option<Command> {
        match self {
            Command::Literal(url) => substitute(url, value).map(Command::Literal),
            Command::Structured(spec) => {
                let url = substitute(&spec.url, value);
                let body = spec.body.as_ref().and_then(|body| body.with_position(value));

                if url.is_none() && body.is_none() {
                    return None;
                }

                Some(Command::Structured(RequestSpec {
                    url: url.unwrap_or_else(|| spec.url.clone()),
                    method: spec.method.clone(),
                    headers: spec.headers.clone(),
                    body: body.or_else(|| spec.body.clone()),
                }))
            }
        }
    }
}

impl From<&str> for Command {
    fn from(url: &str) -> Self {
        Command::Literal(url.to_string())
    }
}

impl Body {
    fn with_position(&self, value: i64) -> Option<Body> {
        match self {
            Body::Text(text) => substitute(text, value).map(Body::Text),
            Body::Json(json) => {
                let text = serde_json::to_string(json).ok()?;
                let replaced = substitute(&text, value)?;

                Some(match serde_json::from_str(&replaced) {
                    Ok(json) => Body::Json(json),
                    Err(_) => Body::Text(replaced),
                })
            }
        }
    }
}

fn substitute(text: &str, value: i64) -> Option<String> {
    if !POSITION_MARKERS.iter().any(|marker| text.contains(marker)) {
        return None;
    }

    let rendered = value.to_string();

    Some(
        POSITION_MARKERS
            .iter()
            .fold(text.to_string(), |acc, marker| acc.replace(marker, &rendered)),
    )
}

/// Transform applied to the target position before it is embedded in a command.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionMapping {
    #[default]
    Identity,
    /// Devices that count 0 as fully open.
    Inverted,
    /// Scales 0..=100 onto the device's own range.
    Range { min: f64, max: f64 },
}

impl PositionMapping {
    pub fn apply(&self, position: u8) -> i64 {
        let position = position.min(100);

        match self {
            PositionMapping::Identity => i64::from(position),
            PositionMapping::Inverted => 100 - i64::from(position),
            PositionMapping::Range { min, max } => {
                (min + (max - min) * f64::from(position) / 100.0).round() as i64
            }
        }
    }
}
