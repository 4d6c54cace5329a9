//! Pure motion state machine.
//!
//! [`MotionMachine::handle`] takes one [`Event`] and returns the [`Effect`]s the
//! driver has to carry out. It never sleeps, never touches the network and
//! never reads a clock, so every transition can be exercised directly.
//!
//! Each move gets a fresh generation number. Timers, dispatch replies and
//! readback results are tagged with the generation they were issued under and
//! anything older than the current move is discarded.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chatter;
use crate::command::{Command, PositionMapping};
use crate::error::ReadbackError;
use crate::events::{Emission, PositionState};
use crate::motion::{Direction, MotionProfile};

/// Failed reconciliations tolerated before a move is force-finalized.
pub const MAX_RECONCILE_ATTEMPTS: u32 = 10;

/// Shortest simulation tick.
pub const MIN_TICK: Duration = Duration::from_millis(1);

fn is_boundary(position: u8) -> bool {
    position == 0 || position == 100
}

fn boundary_direction(position: u8) -> Option<bool> {
    is_boundary(position).then_some(position == 100)
}

fn schedule_tick(generation: u64, after: Duration) -> Effect {
    Effect::Schedule {
        timer: TimerKind::Ticker,
        generation,
        after,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPhase {
    #[default]
    Idle,
    Actuating,
    Moving,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoveringState {
    pub last_known_position: u8,
    pub target_position: u8,
    pub last_direction_up: Option<bool>,
    pub phase: MotionPhase,
    pub manual_stop_requested: bool,
}

impl CoveringState {
    pub fn seeded(position: u8) -> Self {
        let position = position.min(100);

        Self {
            last_known_position: position,
            target_position: position,
            last_direction_up: boundary_direction(position),
            phase: MotionPhase::Idle,
            manual_stop_requested: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveRequest {
    pub from: u8,
    pub to: u8,
    pub direction: Direction,
    /// Set when the move command embeds the literal target.
    pub exact_command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    BoundaryStop,
    ResponseLag,
    Ticker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move,
    Stop { manual: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CancelAllTimers,
    CancelTimer(TimerKind),
    Schedule {
        timer: TimerKind,
        generation: u64,
        after: Duration,
    },
    Dispatch {
        generation: u64,
        action: Action,
        command: Command,
    },
    /// `generation` is `None` for idle polls.
    QueryPosition { generation: Option<u64> },
    Persist(u8),
    Emit(Emission),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SetTarget(u8),
    Dispatched {
        generation: u64,
        action: Action,
        result: Result<Duration, String>,
    },
    TimerFired {
        timer: TimerKind,
        generation: u64,
    },
    PositionRead {
        generation: Option<u64>,
        result: Result<u8, ReadbackError>,
    },
    StopRequested,
    Toggle,
    ExternalPosition(u8),
    PollDue,
}

#[derive(Debug, Clone)]
pub struct MachineOptions {
    pub up: Command,
    pub down: Command,
    pub stop: Option<Command>,
    pub mapping: PositionMapping,
    pub profile: MotionProfile,
    pub response_lag: Duration,
    pub stop_at_boundaries: bool,
    pub use_same_url_for_stop: bool,
    pub readback_enabled: bool,
    pub verbose: bool,
}

impl MachineOptions {
    pub fn new(up: Command, down: Command) -> Self {
        Self {
            up,
            down,
            stop: None,
            mapping: PositionMapping::Identity,
            profile: MotionProfile::default(),
            response_lag: Duration::ZERO,
            stop_at_boundaries: false,
            use_same_url_for_stop: false,
            readback_enabled: false,
            verbose: false,
        }
    }
}

#[derive(Debug)]
struct MoveContext {
    request: MoveRequest,
    tick: Duration,
    awaiting_readback: bool,
    skip_ticks: u32,
    attempts: u32,
    last_observed: Option<u8>,
}

#[derive(Debug)]
pub struct MotionMachine {
    options: MachineOptions,
    state: CoveringState,
    generation: u64,
    active: Option<MoveContext>,
    last_move_command: Option<Command>,
    poll_pending: bool,
}

impl MotionMachine {
    pub fn new(options: MachineOptions, state: CoveringState) -> Self {
        Self {
            options,
            state,
            generation: 0,
            active: None,
            last_move_command: None,
            poll_pending: false,
        }
    }

    pub fn state(&self) -> &CoveringState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// The move currently in flight, if any.
    pub fn active_move(&self) -> Option<&MoveRequest> {
        self.active.as_ref().map(|ctx| &ctx.request)
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::SetTarget(target) => self.set_target(target),
            Event::Dispatched {
                generation,
                action: Action::Move,
                result,
            } => {
                if self.is_stale(generation) {
                    debug!("Discarding move reply from generation {}", generation);
                    return Vec::new();
                }
                self.move_dispatched(result)
            }
            Event::Dispatched {
                generation,
                action: Action::Stop { manual },
                result,
            } => self.stop_dispatched(generation, manual, result),
            Event::TimerFired { timer, generation } => {
                if self.is_stale(generation) {
                    debug!("Discarding {:?} timer from generation {}", timer, generation);
                    return Vec::new();
                }
                match timer {
                    TimerKind::BoundaryStop => self.request_stop(false),
                    TimerKind::ResponseLag => self.start_ticking(),
                    TimerKind::Ticker => self.tick(),
                }
            }
            Event::PositionRead {
                generation: Some(generation),
                result,
            } => {
                if self.is_stale(generation) {
                    debug!("Discarding readback from generation {}", generation);
                    return Vec::new();
                }
                self.reconciled(result)
            }
            Event::PositionRead {
                generation: None,
                result,
            } => self.polled(result),
            Event::StopRequested => self.request_stop(true),
            Event::Toggle => self.toggle(),
            Event::ExternalPosition(position) => self.external_position(position),
            Event::PollDue => self.poll(),
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation
    }

    fn set_target(&mut self, target: u8) -> Vec<Effect> {
        let target = target.min(100);
        let from = self.state.last_known_position;
        let was_idle = self.state.phase == MotionPhase::Idle;

        let mut effects = vec![Effect::CancelAllTimers];
        self.generation += 1;
        self.active = None;
        self.state.manual_stop_requested = false;
        self.state.target_position = target;

        if target == from {
            if !is_boundary(target) {
                info!("Already there: {}%", target);
                self.state.phase = MotionPhase::Idle;
                effects.push(Effect::Emit(Emission::TargetPosition(target)));
                if !was_idle {
                    effects.push(Effect::Emit(Emission::PositionState(PositionState::Stopped)));
                }
                return effects;
            }
            info!("Already there: {}%, re-sending request", target);
        }

        let direction = Direction::of(from, target);
        info!("Requested move {} (to {}%)", direction, target);

        let generic = match direction {
            Direction::Up => &self.options.up,
            Direction::Down => &self.options.down,
        };
        let exact = generic.with_position(self.options.mapping.apply(target));
        let command = exact.clone().unwrap_or_else(|| generic.clone());

        self.last_move_command = Some(generic.clone());
        self.state.phase = MotionPhase::Actuating;
        self.active = Some(MoveContext {
            request: MoveRequest {
                from,
                to: target,
                direction,
                exact_command: exact,
            },
            tick: MIN_TICK,
            awaiting_readback: false,
            skip_ticks: 0,
            attempts: 0,
            last_observed: None,
        });

        let moving = if direction.is_up() {
            PositionState::Increasing
        } else {
            PositionState::Decreasing
        };

        effects.extend([
            Effect::Emit(Emission::TargetPosition(target)),
            Effect::Emit(Emission::ObstructionDetected(false)),
            Effect::Emit(Emission::PositionState(moving)),
            Effect::Dispatch {
                generation: self.generation,
                action: Action::Move,
                command,
            },
        ]);

        effects
    }

    fn move_dispatched(&mut self, result: Result<Duration, String>) -> Vec<Effect> {
        let Some(ctx) = self.active.as_mut() else {
            return Vec::new();
        };

        let elapsed = match result {
            Ok(elapsed) => elapsed,
            Err(message) => {
                error!("Move {} failed: {}", ctx.request.direction, message);
                self.active = None;
                self.state.phase = MotionPhase::Idle;
                self.state.target_position = self.state.last_known_position;

                return vec![
                    Effect::Emit(Emission::PositionState(PositionState::Stopped)),
                    Effect::Emit(Emission::ObstructionDetected(true)),
                    Effect::Emit(Emission::TargetPosition(self.state.last_known_position)),
                ];
            }
        };

        let request = &ctx.request;
        let wait = self
            .options
            .profile
            .duration(request.direction, request.from, request.to);
        let distance = u32::from(request.from.abs_diff(request.to));
        ctx.tick = if distance == 0 {
            MIN_TICK
        } else {
            (wait / distance).max(MIN_TICK)
        };

        info!(
            "Move request sent ({} ms), waiting {:.1}s (+ {:.1}s response lag)",
            elapsed.as_millis(),
            wait.as_secs_f64(),
            self.options.response_lag.as_secs_f64()
        );

        self.state.phase = MotionPhase::Moving;

        let mut effects = vec![Effect::Persist(request.to)];

        if request.exact_command.is_some() {
            chatter!(self.options.verbose, "Stop command will be skipped; exact position specified");
        } else if self.state.manual_stop_requested {
            chatter!(self.options.verbose, "Stop command will be skipped; already stopped manually");
        } else if self.options.stop_at_boundaries || !is_boundary(request.to) {
            chatter!(self.options.verbose, "Stop command will be requested");
            effects.push(Effect::Schedule {
                timer: TimerKind::BoundaryStop,
                generation: self.generation,
                after: wait,
            });
        }

        effects.push(Effect::Schedule {
            timer: TimerKind::ResponseLag,
            generation: self.generation,
            after: self.options.response_lag,
        });

        effects
    }

    fn start_ticking(&mut self) -> Vec<Effect> {
        let Some(ctx) = self.active.as_ref() else {
            return Vec::new();
        };

        chatter!(self.options.verbose, "Response lag elapsed, ticking every {:?}", ctx.tick);

        vec![schedule_tick(self.generation, ctx.tick)]
    }

    fn tick(&mut self) -> Vec<Effect> {
        let generation = self.generation;
        let readback_enabled = self.options.readback_enabled;
        let Some(ctx) = self.active.as_mut() else {
            return Vec::new();
        };
        let tick = ctx.tick;

        if ctx.awaiting_readback {
            return vec![schedule_tick(generation, tick)];
        }

        let mut effects = Vec::new();

        if ctx.skip_ticks > 0 {
            ctx.skip_ticks -= 1;
            if ctx.skip_ticks == 0 {
                ctx.awaiting_readback = true;
                effects.push(Effect::QueryPosition {
                    generation: Some(generation),
                });
            }
            effects.push(schedule_tick(generation, tick));
            return effects;
        }

        let state = &mut self.state;
        let up = ctx.request.direction.is_up();

        // at or past the target in the commanded direction counts as reached
        let short_of_target = |position: u8, target: u8| if up { position < target } else { position > target };

        if !state.manual_stop_requested && short_of_target(state.last_known_position, state.target_position) {
            if up {
                state.last_known_position += 1;
            } else {
                state.last_known_position -= 1;
            }

            debug!("Simulated position {}%", state.last_known_position);
            effects.push(Effect::Emit(Emission::CurrentPosition(state.last_known_position)));

            if short_of_target(state.last_known_position, state.target_position) {
                effects.push(schedule_tick(generation, tick));
                return effects;
            }
        }

        self.state.phase = MotionPhase::Reconciling;

        if readback_enabled {
            ctx.awaiting_readback = true;
            effects.push(Effect::QueryPosition {
                generation: Some(generation),
            });
            effects.push(schedule_tick(generation, tick));
        } else {
            effects.extend(self.finalize());
        }

        effects
    }

    fn reconciled(&mut self, result: Result<u8, ReadbackError>) -> Vec<Effect> {
        let verbose = self.options.verbose;
        let Some(ctx) = self.active.as_mut() else {
            return Vec::new();
        };
        ctx.awaiting_readback = false;

        let real = match result {
            Ok(real) => real,
            Err(e) => {
                ctx.attempts += 1;
                warn!("Position readback inconclusive (attempt {}): {}", ctx.attempts, e);

                if ctx.attempts > MAX_RECONCILE_ATTEMPTS {
                    error!("Didn't reach target after {} tries", ctx.attempts);
                    self.state.manual_stop_requested = true;
                    return self.finalize();
                }
                ctx.skip_ticks = ctx.attempts;
                return Vec::new();
            }
        };

        if self.state.manual_stop_requested || real == self.state.target_position {
            chatter!(
                verbose,
                "Reached target: {}, current position: {}, manual stop: {}",
                self.state.target_position,
                real,
                self.state.manual_stop_requested
            );
            self.state.last_known_position = real;
            return self.finalize();
        }

        ctx.attempts += 1;
        self.state.last_known_position = real;

        if ctx.attempts > MAX_RECONCILE_ATTEMPTS {
            error!("Didn't reach target after {} tries", ctx.attempts);
            self.state.manual_stop_requested = true;
            return self.finalize();
        }

        let effects = vec![Effect::Emit(Emission::CurrentPosition(real))];

        if ctx.last_observed == Some(real) {
            chatter!(
                verbose,
                "Position didn't change: skipping {} cycle(s)",
                ctx.attempts
            );
            ctx.skip_ticks = ctx.attempts;
        } else {
            ctx.last_observed = Some(real);
            self.state.phase = MotionPhase::Moving;
        }

        effects
    }

    fn finalize(&mut self) -> Vec<Effect> {
        let position = self.state.last_known_position;
        if let Some(ctx) = self.active.take() {
            info!(
                "End move {} to {}% (target {}%)",
                ctx.request.direction, position, self.state.target_position
            );
        }

        self.state.target_position = position;
        self.state.last_direction_up = boundary_direction(position);
        self.state.phase = MotionPhase::Idle;

        vec![
            Effect::CancelTimer(TimerKind::Ticker),
            Effect::CancelTimer(TimerKind::ResponseLag),
            Effect::Emit(Emission::CurrentPosition(position)),
            Effect::Emit(Emission::TargetPosition(position)),
            Effect::Emit(Emission::PositionState(PositionState::Stopped)),
        ]
    }

    fn request_stop(&mut self, manual: bool) -> Vec<Effect> {
        let command = if self.options.use_same_url_for_stop {
            self.last_move_command.clone()
        } else {
            self.options.stop.clone()
        };

        let mut effects = vec![Effect::CancelTimer(TimerKind::BoundaryStop)];

        let Some(command) = command else {
            warn!("Stop requested but no stop endpoint is configured");
            return effects;
        };

        if manual {
            info!("Requesting manual stop");
        } else {
            info!("Requesting stop");
        }

        effects.extend([
            Effect::Emit(Emission::ObstructionDetected(false)),
            Effect::Dispatch {
                generation: self.generation,
                action: Action::Stop { manual },
                command,
            },
        ]);

        effects
    }

    fn stop_dispatched(
        &mut self,
        generation: u64,
        manual: bool,
        result: Result<Duration, String>,
    ) -> Vec<Effect> {
        if let Err(message) = result {
            if self.is_stale(generation) {
                debug!("Discarding failed stop reply from generation {}: {}", generation, message);
                return Vec::new();
            }
            warn!("Stop request failed: {}", message);
            return vec![Effect::Emit(Emission::ObstructionDetected(true))];
        }

        info!("Stop request sent");

        if manual && !self.is_stale(generation) && self.active.is_some() {
            self.state.manual_stop_requested = true;
        }

        Vec::new()
    }

    fn toggle(&mut self) -> Vec<Effect> {
        match self.state.last_direction_up {
            Some(true) => self.set_target(0),
            Some(false) => self.set_target(100),
            None => {
                warn!(
                    "Toggle ignored: last direction is unknown (position {}%)",
                    self.state.last_known_position
                );
                Vec::new()
            }
        }
    }

    fn external_position(&mut self, position: u8) -> Vec<Effect> {
        let position = position.min(100);
        self.state.last_known_position = position;

        if self.active.is_some() {
            debug!("External position {}% folded into the running move", position);
            return vec![Effect::Emit(Emission::CurrentPosition(position))];
        }

        self.state.target_position = position;
        self.state.last_direction_up = boundary_direction(position);

        vec![
            Effect::Emit(Emission::CurrentPosition(position)),
            Effect::Emit(Emission::TargetPosition(position)),
        ]
    }

    fn poll(&mut self) -> Vec<Effect> {
        if !self.options.readback_enabled
            || self.poll_pending
            || self.state.phase != MotionPhase::Idle
        {
            return Vec::new();
        }

        self.poll_pending = true;
        vec![Effect::QueryPosition { generation: None }]
    }

    fn polled(&mut self, result: Result<u8, ReadbackError>) -> Vec<Effect> {
        self.poll_pending = false;

        let position = match result {
            Ok(position) => position,
            Err(e) => {
                warn!("Position poll failed: {}", e);
                return Vec::new();
            }
        };

        if self.state.phase != MotionPhase::Idle {
            debug!("Ignoring poll result {}% during a move", position);
            return Vec::new();
        }

        if position == self.state.last_known_position && position == self.state.target_position {
            return Vec::new();
        }

        chatter!(self.options.verbose, "Position updated by poll: {}%", position);
        self.external_position(position)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn options() -> MachineOptions {
        let mut options = MachineOptions::new(
            Command::from("http://blinds.local/up"),
            Command::from("http://blinds.local/down"),
        );
        options.stop = Some(Command::from("http://blinds.local/stop"));
        options
    }

    fn dispatched(effects: &[Effect]) -> Vec<&Command> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Dispatch { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    fn schedules(effects: &[Effect], kind: TimerKind) -> usize {
        effects
            .iter()
            .filter(|effect| matches!(effect, Effect::Schedule { timer, .. } if *timer == kind))
            .count()
    }

    fn emitted_positions(effects: &[Effect]) -> Vec<u8> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Emit(Emission::CurrentPosition(pos)) => Some(*pos),
                _ => None,
            })
            .collect()
    }

    /// Feeds every follow-up event back into the machine until it settles.
    /// Boundary stops are left unfired.
    fn pump(
        machine: &mut MotionMachine,
        event: Event,
        mut readback: impl FnMut() -> Result<u8, ReadbackError>,
    ) -> Vec<Effect> {
        let mut queue = VecDeque::from([event]);
        let mut seen = Vec::new();
        let mut steps = 0;

        while let Some(event) = queue.pop_front() {
            steps += 1;
            assert!(steps < 10_000, "machine did not settle");

            for effect in machine.handle(event) {
                match &effect {
                    Effect::Dispatch {
                        generation, action, ..
                    } => queue.push_back(Event::Dispatched {
                        generation: *generation,
                        action: *action,
                        result: Ok(Duration::from_millis(5)),
                    }),
                    Effect::Schedule {
                        timer, generation, ..
                    } if *timer != TimerKind::BoundaryStop => queue.push_back(Event::TimerFired {
                        timer: *timer,
                        generation: *generation,
                    }),
                    Effect::QueryPosition { generation } => queue.push_back(Event::PositionRead {
                        generation: *generation,
                        result: readback(),
                    }),
                    _ => {}
                }
                seen.push(effect);
            }
        }

        seen
    }

    #[test]
    fn test_already_there_skips_network() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(40));

        let effects = machine.handle(Event::SetTarget(40));

        assert!(dispatched(&effects).is_empty());
        assert_eq!(machine.state().phase, MotionPhase::Idle);
        assert!(effects.contains(&Effect::Emit(Emission::TargetPosition(40))));
    }

    #[test]
    fn test_boundary_is_resent() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(100));

        let effects = machine.handle(Event::SetTarget(100));

        assert_eq!(dispatched(&effects), vec![&Command::from("http://blinds.local/up")]);
        assert_eq!(machine.state().phase, MotionPhase::Actuating);

        let mut machine = MotionMachine::new(options(), CoveringState::seeded(0));
        let effects = machine.handle(Event::SetTarget(0));
        assert_eq!(dispatched(&effects), vec![&Command::from("http://blinds.local/down")]);
    }

    #[test]
    fn test_simulated_move_runs_to_target() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));

        let effects = pump(&mut machine, Event::SetTarget(80), || unreachable!());

        let positions = emitted_positions(&effects);
        assert_eq!(positions.first(), Some(&31));
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(positions.last(), Some(&80));

        assert_eq!(effects.last(), Some(&Effect::Emit(Emission::PositionState(PositionState::Stopped))));
        assert!(effects.contains(&Effect::Persist(80)));
        assert_eq!(machine.state().last_known_position, 80);
        assert_eq!(machine.state().target_position, 80);
        assert_eq!(machine.state().phase, MotionPhase::Idle);
        assert_eq!(machine.state().last_direction_up, None);
    }

    #[test]
    fn test_tick_period_is_time_per_percent() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));

        let effects = machine.handle(Event::Dispatched {
            generation: machine.generation(),
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });
        assert!(effects.contains(&Effect::Schedule {
            timer: TimerKind::BoundaryStop,
            generation: 1,
            after: Duration::from_millis(5_000),
        }));

        let effects = machine.handle(Event::TimerFired {
            timer: TimerKind::ResponseLag,
            generation: 1,
        });
        assert_eq!(effects, vec![schedule_tick(1, Duration::from_millis(100))]);
    }

    #[test]
    fn test_boundary_target_skips_boundary_stop() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(100));
        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });
        assert_eq!(schedules(&effects, TimerKind::BoundaryStop), 0);

        let mut options = options();
        options.stop_at_boundaries = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(30));
        machine.handle(Event::SetTarget(100));
        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });
        assert_eq!(schedules(&effects, TimerKind::BoundaryStop), 1);
    }

    #[test]
    fn test_exact_position_command() {
        let mut options = options();
        options.up = Command::from("http://blinds.local/set?pos=%%POS%%");
        let mut machine = MotionMachine::new(options, CoveringState::seeded(0));

        let effects = machine.handle(Event::SetTarget(42));
        assert_eq!(
            dispatched(&effects),
            vec![&Command::from("http://blinds.local/set?pos=42")]
        );

        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });
        assert_eq!(schedules(&effects, TimerKind::BoundaryStop), 0);
        assert_eq!(schedules(&effects, TimerKind::ResponseLag), 1);
    }

    #[test]
    fn test_transport_failure_raises_obstruction() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));

        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Err("connection refused".to_string()),
        });

        assert!(effects.contains(&Effect::Emit(Emission::ObstructionDetected(true))));
        assert!(!effects.iter().any(|effect| matches!(effect, Effect::Persist(_) | Effect::Schedule { .. })));
        assert_eq!(machine.state().last_known_position, 30);
        assert_eq!(machine.state().target_position, 30);
        assert_eq!(machine.state().phase, MotionPhase::Idle);
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));
        machine.handle(Event::SetTarget(10));

        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Err("timeout".to_string()),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.state().target_position, 10);
        assert_eq!(machine.state().phase, MotionPhase::Actuating);

        let effects = machine.handle(Event::TimerFired {
            timer: TimerKind::Ticker,
            generation: 1,
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_reconcile_ceiling_force_finalizes() {
        let mut options = options();
        options.readback_enabled = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(30));

        let mut reads = 0;
        let effects = pump(&mut machine, Event::SetTarget(80), || {
            reads += 1;
            Ok(50)
        });

        assert_eq!(reads, MAX_RECONCILE_ATTEMPTS + 1);
        assert_eq!(effects.last(), Some(&Effect::Emit(Emission::PositionState(PositionState::Stopped))));
        assert_eq!(machine.state().last_known_position, 50);
        assert_eq!(machine.state().target_position, 50);
        assert!(machine.state().manual_stop_requested);
        assert_eq!(machine.state().phase, MotionPhase::Idle);
    }

    #[test]
    fn test_unreadable_position_counts_towards_ceiling() {
        let mut options = options();
        options.readback_enabled = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(95));

        let effects = pump(&mut machine, Event::SetTarget(100), || Err(ReadbackError::Empty));

        assert!(effects.contains(&Effect::Emit(Emission::TargetPosition(100))));
        assert_eq!(machine.state().phase, MotionPhase::Idle);
        assert_eq!(machine.state().last_known_position, 100);
        assert_eq!(machine.state().last_direction_up, Some(true));
    }

    #[test]
    fn test_confirmed_readback_finalizes() {
        let mut options = options();
        options.readback_enabled = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(10));

        let mut reads = 0;
        pump(&mut machine, Event::SetTarget(20), || {
            reads += 1;
            Ok(20)
        });

        assert_eq!(reads, 1);
        assert_eq!(machine.state().last_known_position, 20);
        assert!(!machine.state().manual_stop_requested);
    }

    #[test]
    fn test_manual_stop_finalizes_on_next_tick() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));
        machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });
        for _ in 0..5 {
            machine.handle(Event::TimerFired {
                timer: TimerKind::Ticker,
                generation: 1,
            });
        }
        assert_eq!(machine.state().last_known_position, 35);

        let effects = machine.handle(Event::StopRequested);
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::BoundaryStop)));
        assert_eq!(dispatched(&effects), vec![&Command::from("http://blinds.local/stop")]);

        machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Stop { manual: true },
            result: Ok(Duration::ZERO),
        });
        assert!(machine.state().manual_stop_requested);

        machine.handle(Event::TimerFired {
            timer: TimerKind::Ticker,
            generation: 1,
        });
        assert_eq!(machine.state().phase, MotionPhase::Idle);
        assert_eq!(machine.state().target_position, 35);
    }

    #[test]
    fn test_failed_stop_keeps_moving() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));

        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Stop { manual: true },
            result: Err("HTTP 500".to_string()),
        });

        assert_eq!(effects, vec![Effect::Emit(Emission::ObstructionDetected(true))]);
        assert!(!machine.state().manual_stop_requested);
    }

    #[test]
    fn test_stale_stop_failure_is_discarded() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));
        machine.handle(Event::SetTarget(20));

        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Stop { manual: false },
            result: Err("HTTP 500".to_string()),
        });
        assert!(effects.is_empty());

        let effects = machine.handle(Event::Dispatched {
            generation: 2,
            action: Action::Stop { manual: true },
            result: Err("HTTP 500".to_string()),
        });
        assert_eq!(effects, vec![Effect::Emit(Emission::ObstructionDetected(true))]);
    }

    #[test]
    fn test_stop_during_actuation_skips_boundary_stop() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(80));
        machine.handle(Event::StopRequested);
        machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Stop { manual: true },
            result: Ok(Duration::ZERO),
        });
        assert!(machine.state().manual_stop_requested);

        let effects = machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });

        assert_eq!(schedules(&effects, TimerKind::BoundaryStop), 0);
        assert_eq!(schedules(&effects, TimerKind::ResponseLag), 1);
    }

    #[test]
    fn test_push_past_target_ends_move_there() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::SetTarget(50));
        machine.handle(Event::Dispatched {
            generation: 1,
            action: Action::Move,
            result: Ok(Duration::ZERO),
        });
        for _ in 0..5 {
            machine.handle(Event::TimerFired {
                timer: TimerKind::Ticker,
                generation: 1,
            });
        }
        assert_eq!(machine.state().last_known_position, 35);

        machine.handle(Event::ExternalPosition(70));
        let effects = pump(
            &mut machine,
            Event::TimerFired {
                timer: TimerKind::Ticker,
                generation: 1,
            },
            || unreachable!(),
        );

        assert_eq!(emitted_positions(&effects), vec![70]);
        assert_eq!(machine.state().last_known_position, 70);
        assert_eq!(machine.state().target_position, 70);
        assert_eq!(machine.state().phase, MotionPhase::Idle);
    }

    #[test]
    fn test_overshoot_is_not_walked_back() {
        let mut options = options();
        options.readback_enabled = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(30));

        let effects = pump(&mut machine, Event::SetTarget(80), || Ok(85));

        let positions = emitted_positions(&effects);
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]), "{positions:?}");
        assert_eq!(positions.last(), Some(&85));
        assert_eq!(machine.state().last_known_position, 85);
        assert_eq!(machine.state().phase, MotionPhase::Idle);
    }

    #[test]
    fn test_stop_reuses_move_endpoint() {
        let mut options = options();
        options.stop = None;
        options.use_same_url_for_stop = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(60));
        machine.handle(Event::SetTarget(20));

        let effects = machine.handle(Event::StopRequested);

        assert_eq!(dispatched(&effects), vec![&Command::from("http://blinds.local/down")]);
    }

    #[test]
    fn test_toggle_goes_to_opposite_boundary() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(100));
        let effects = machine.handle(Event::Toggle);
        assert_eq!(dispatched(&effects), vec![&Command::from("http://blinds.local/down")]);
        assert_eq!(machine.state().target_position, 0);

        let mut machine = MotionMachine::new(options(), CoveringState::seeded(45));
        assert!(machine.handle(Event::Toggle).is_empty());
    }

    #[test]
    fn test_external_position() {
        let mut machine = MotionMachine::new(options(), CoveringState::seeded(30));
        machine.handle(Event::ExternalPosition(100));
        assert_eq!(machine.state().target_position, 100);
        assert_eq!(machine.state().last_direction_up, Some(true));

        machine.handle(Event::SetTarget(50));
        let effects = machine.handle(Event::ExternalPosition(70));
        assert_eq!(effects, vec![Effect::Emit(Emission::CurrentPosition(70))]);
        assert_eq!(machine.state().last_known_position, 70);
        assert_eq!(machine.state().target_position, 50);
    }

    #[test]
    fn test_poll_only_when_idle() {
        let mut options = options();
        options.readback_enabled = true;
        let mut machine = MotionMachine::new(options, CoveringState::seeded(30));

        assert_eq!(machine.handle(Event::PollDue), vec![Effect::QueryPosition { generation: None }]);
        assert!(machine.handle(Event::PollDue).is_empty());

        let effects = machine.handle(Event::PositionRead {
            generation: None,
            result: Ok(0),
        });
        assert_eq!(
            effects,
            vec![
                Effect::Emit(Emission::CurrentPosition(0)),
                Effect::Emit(Emission::TargetPosition(0)),
            ]
        );
        assert_eq!(machine.state().last_direction_up, Some(false));

        machine.handle(Event::SetTarget(60));
        assert!(machine.handle(Event::PollDue).is_empty());
    }
}
