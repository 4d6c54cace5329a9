use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::command::{Command, PositionMapping};
use crate::error::ConfigError;
use crate::gateway::{DEFAULT_ATTEMPTS, RetryPolicy};
use crate::machine::MachineOptions;
use crate::motion::{Checkpoint, DEFAULT_MOTION_TIME_MS, Direction, MotionProfile, MotionSpeedModel};
use crate::readback::{PositionPointer, Reconciler};

pub const DEFAULT_POLL_MS: u64 = 15_000;
pub const MIN_POLL_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionTimeGraph {
    #[serde(default)]
    pub up: Option<Vec<Checkpoint>>,
    #[serde(default)]
    pub down: Option<Vec<Checkpoint>>,
}

/// One covering as written in the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoveringConfig {
    pub name: String,
    #[serde(default)]
    pub up: Option<Command>,
    #[serde(default)]
    pub down: Option<Command>,
    #[serde(default)]
    pub stop: Option<Command>,
    #[serde(default, alias = "pos_url", alias = "position_url")]
    pub position: Option<Command>,
    #[serde(default, alias = "pos_pointer")]
    pub position_pointer: Option<String>,
    #[serde(default)]
    pub send_mapping: PositionMapping,
    #[serde(default = "default_http_method")]
    pub http_method: String,
    #[serde(default = "default_success_codes", alias = "http_success_codes")]
    pub success_codes: Vec<u16>,
    #[serde(default = "default_attempts")]
    pub max_http_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub motion_time_ms: Option<u64>,
    #[serde(default)]
    pub motion_up_time_ms: Option<u64>,
    #[serde(default)]
    pub motion_down_time_ms: Option<u64>,
    #[serde(default)]
    pub motion_time_graph: MotionTimeGraph,
    #[serde(default)]
    pub response_lag_ms: u64,
    #[serde(default = "default_poll_ms", alias = "pos_poll_ms")]
    pub position_poll_ms: u64,
    #[serde(default)]
    pub trigger_stop_at_boundaries: bool,
    #[serde(default)]
    pub use_same_url_for_stop: bool,
    #[serde(default)]
    pub show_stop_button: bool,
    #[serde(default)]
    pub show_toggle_button: bool,
    #[serde(default)]
    pub verbose: bool,
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_success_codes() -> Vec<u16> {
    vec![200]
}

fn default_attempts() -> u32 {
    DEFAULT_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_poll_ms() -> u64 {
    DEFAULT_POLL_MS
}

/// Everything a driver needs, resolved from a [`CoveringConfig`].
#[derive(Debug, Clone)]
pub struct CoveringSetup {
    pub name: String,
    pub machine: MachineOptions,
    pub reconciler: Reconciler,
    pub retry_policy: RetryPolicy,
    pub method: Method,
    pub poll_interval: Option<Duration>,
    pub show_stop: bool,
    pub show_toggle: bool,
}

impl CoveringConfig {
    pub fn into_setup(self) -> Result<CoveringSetup, ConfigError> {
        let up = self.up.clone().ok_or_else(|| ConfigError::MissingEndpoint {
            covering: self.name.clone(),
            endpoint: "up",
        })?;
        let down = self.down.clone().ok_or_else(|| ConfigError::MissingEndpoint {
            covering: self.name.clone(),
            endpoint: "down",
        })?;

        let method = Method::from_bytes(self.http_method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(self.http_method.clone()))?;

        let pointer = self.position_pointer.as_deref().and_then(|raw| {
            PositionPointer::parse(raw)
                .inspect_err(|e| error!("Covering {}: {}; using generic parsing", self.name, e))
                .ok()
        });

        let profile = self.profile();
        let readback_enabled = self.position.is_some();

        let poll_interval = readback_enabled.then(|| {
            if self.position_poll_ms < MIN_POLL_MS {
                warn!(
                    "Covering {}: position_poll_ms {} is below the minimum, using {}",
                    self.name, self.position_poll_ms, MIN_POLL_MS
                );
            }
            Duration::from_millis(self.position_poll_ms.max(MIN_POLL_MS))
        });

        let show_stop = self.show_stop_button && (self.stop.is_some() || self.use_same_url_for_stop);
        if self.show_stop_button && !show_stop {
            warn!("Covering {}: stop button requested without a stop endpoint", self.name);
        }

        Ok(CoveringSetup {
            machine: MachineOptions {
                up,
                down,
                stop: self.stop,
                mapping: self.send_mapping,
                profile,
                response_lag: Duration::from_millis(self.response_lag_ms),
                stop_at_boundaries: self.trigger_stop_at_boundaries,
                use_same_url_for_stop: self.use_same_url_for_stop,
                readback_enabled,
                verbose: self.verbose,
            },
            reconciler: Reconciler::new(self.position, pointer),
            retry_policy: RetryPolicy::new(
                self.max_http_attempts,
                Duration::from_millis(self.retry_delay_ms),
                self.success_codes,
            ),
            method,
            poll_interval,
            show_stop,
            show_toggle: self.show_toggle_button,
            name: self.name,
        })
    }

    fn profile(&self) -> MotionProfile {
        let fallback = self.motion_time_ms.unwrap_or(DEFAULT_MOTION_TIME_MS);

        let model = |direction: Direction, graph: &Option<Vec<Checkpoint>>, time: Option<u64>| match graph {
            Some(checkpoints) => MotionSpeedModel::from_checkpoints(direction, checkpoints.clone()),
            None => MotionSpeedModel::linear(direction, Duration::from_millis(time.unwrap_or(fallback))),
        };

        MotionProfile::new(
            model(Direction::Up, &self.motion_time_graph.up, self.motion_up_time_ms),
            model(Direction::Down, &self.motion_time_graph.down, self.motion_down_time_ms),
        )
    }
}
