use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    Rising,
    Falling,
    Halted,
}

/// A motor that travels at constant speed until it hits an end or its goal.
#[derive(Debug, Clone)]
pub struct SimulatedMotor {
    position: f64,
    goal: Option<f64>,
    motion: Motion,
    travel: Duration,
}

impl SimulatedMotor {
    pub fn new(position: u8, travel: Duration) -> Self {
        Self {
            position: f64::from(position.min(100)),
            goal: None,
            motion: Motion::Halted,
            travel: travel.max(Duration::from_millis(1)),
        }
    }

    pub fn position(&self) -> u8 {
        self.position.round().clamp(0.0, 100.0) as u8
    }

    pub fn motion(&self) -> Motion {
        self.motion
    }

    pub fn raise(&mut self) {
        self.goal = None;
        self.motion = Motion::Rising;
    }

    pub fn lower(&mut self) {
        self.goal = None;
        self.motion = Motion::Falling;
    }

    pub fn halt(&mut self) {
        self.goal = None;
        self.motion = Motion::Halted;
    }

    /// Travels toward `goal` and halts there.
    pub fn seek(&mut self, goal: u8) {
        let goal = f64::from(goal.min(100));

        self.motion = if goal > self.position {
            Motion::Rising
        } else if goal < self.position {
            Motion::Falling
        } else {
            Motion::Halted
        };
        self.goal = (self.motion != Motion::Halted).then_some(goal);
    }

    /// Moves the motor forward by `elapsed` of wall time.
    pub fn advance(&mut self, elapsed: Duration) {
        let step = 100.0 * elapsed.as_secs_f64() / self.travel.as_secs_f64();

        let (next, limit) = match self.motion {
            Motion::Halted => return,
            Motion::Rising => (self.position + step, self.goal.unwrap_or(100.0)),
            Motion::Falling => (self.position - step, self.goal.unwrap_or(0.0)),
        };

        let reached = match self.motion {
            Motion::Rising => next >= limit,
            _ => next <= limit,
        };

        if reached {
            self.position = limit;
            self.halt();
        } else {
            self.position = next;
        }
    }
}
