use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Full travel time used when nothing else is configured.
pub const DEFAULT_MOTION_TIME_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// A move to 100 always counts as "up", even when already there.
    pub fn of(from: u8, to: u8) -> Self {
        if to > from || to == 100 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn is_up(self) -> bool {
        self == Direction::Up
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Elapsed time, counted from the start of travel, at which a position is reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub pos: i64,
    pub seconds: f64,
}

impl Checkpoint {
    pub fn new(pos: i64, seconds: f64) -> Self {
        Self { pos, seconds }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Step {
    pos: u8,
    seconds_per_percent: Option<f64>,
}

/// Piecewise mapping from position to travel time for one direction.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSpeedModel {
    direction: Direction,
    steps: Vec<Step>,
    valid: bool,
}

impl MotionSpeedModel {
    pub fn from_checkpoints(direction: Direction, mut checkpoints: Vec<Checkpoint>) -> Self {
        checkpoints.sort_by(|a, b| a.pos.cmp(&b.pos));

        let checkpoints: Vec<Checkpoint> = checkpoints
            .into_iter()
            .filter(|step| {
                let keep = (0..=100).contains(&step.pos) && step.seconds.is_finite();
                if !keep {
                    error!(
                        "Motion '{}' step was skipped (invalid: pos must be between 0-100): {:?}",
                        direction, step
                    );
                }
                keep
            })
            .collect();

        let (Some(first), Some(last)) = (checkpoints.first(), checkpoints.last()) else {
            error!("Motion '{}' graph has no steps", direction);
            return Self::invalid(direction);
        };

        if first.pos != 0 || last.pos != 100 {
            let available: Vec<i64> = checkpoints.iter().map(|step| step.pos).collect();
            error!(
                "Motion '{}' graph is missing definitions for positions 0 and/or 100 (found: {:?})",
                direction, available
            );
            return Self::invalid(direction);
        }

        let mut steps = Vec::with_capacity(checkpoints.len());
        steps.push(Step {
            pos: 0,
            seconds_per_percent: None,
        });

        for pair in checkpoints.windows(2) {
            let (prev, this) = (pair[0], pair[1]);
            let delta_seconds = (this.seconds - prev.seconds).abs();
            let delta_pos = this.pos - prev.pos;

            let seconds_per_percent = if delta_seconds > 0.0 && delta_pos > 0 {
                Some(delta_seconds / delta_pos as f64)
            } else {
                error!(
                    "Motion '{}' step was skipped, {} seconds from previous step, +{} position from previous step: {:?}",
                    direction, delta_seconds, delta_pos, this
                );
                None
            };

            steps.push(Step {
                pos: this.pos as u8,
                seconds_per_percent,
            });
        }

        let valid = steps.iter().any(|step| step.seconds_per_percent.is_some());
        if !valid {
            error!("Motion '{}' graph has no usable segments", direction);
        }

        Self {
            direction,
            steps,
            valid,
        }
    }

    pub fn linear(direction: Direction, full_travel: Duration) -> Self {
        Self::from_checkpoints(
            direction,
            vec![
                Checkpoint::new(0, 0.0),
                Checkpoint::new(100, full_travel.as_secs_f64()),
            ],
        )
    }

    fn invalid(direction: Direction) -> Self {
        Self {
            direction,
            steps: Vec::new(),
            valid: false,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Expected travel time between two positions, `None` when the model is unusable.
    pub fn duration(&self, from: u8, to: u8) -> Option<Duration> {
        if from == to {
            return Some(Duration::ZERO);
        }

        if !self.valid {
            return None;
        }

        let high = from.max(to).min(100);
        let mut current = from.min(to);
        let mut seconds = 0.0;

        for step in &self.steps {
            let Some(rate) = step.seconds_per_percent else {
                continue;
            };

            if current >= high || step.pos <= current {
                continue;
            }

            let reach = step.pos.min(high);
            seconds += f64::from(reach - current) * rate;
            current = reach;
        }

        Some(Duration::from_millis((seconds * 1000.0).round() as u64))
    }
}

/// Both directions of a covering, with the fallback applied to unusable models.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionProfile {
    up: MotionSpeedModel,
    down: MotionSpeedModel,
    fallback: Duration,
}

impl MotionProfile {
    pub fn new(up: MotionSpeedModel, down: MotionSpeedModel) -> Self {
        let fallback = Duration::from_millis(DEFAULT_MOTION_TIME_MS);

        for model in [&up, &down] {
            if !model.is_valid() {
                warn!(
                    "Motion '{}' model is unusable; assuming linear travel of {} ms",
                    model.direction(),
                    fallback.as_millis()
                );
            }
        }

        Self { up, down, fallback }
    }

    pub fn linear(up: Duration, down: Duration) -> Self {
        Self::new(
            MotionSpeedModel::linear(Direction::Up, up),
            MotionSpeedModel::linear(Direction::Down, down),
        )
    }

    pub fn model(&self, direction: Direction) -> &MotionSpeedModel {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    pub fn duration(&self, direction: Direction, from: u8, to: u8) -> Duration {
        self.model(direction).duration(from, to).unwrap_or_else(|| {
            let distance = u32::from(from.abs_diff(to).min(100));
            self.fallback * distance / 100
        })
    }
}

impl Default for MotionProfile {
    fn default() -> Self {
        let full = Duration::from_millis(DEFAULT_MOTION_TIME_MS);
        Self::linear(full, full)
    }
}
