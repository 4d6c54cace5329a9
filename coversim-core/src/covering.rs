use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::config::CoveringSetup;
use crate::error::DriverError;
use crate::events::{CharacteristicSink, Emission, PositionState};
use crate::gateway::Gateway;
use crate::machine::{CoveringState, Effect, Event, MotionMachine, MotionPhase, TimerKind};
use crate::readback::Reconciler;
use crate::store::PositionStore;

const INBOX_CAPACITY: usize = 64;

/// Point-in-time view of one covering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoveringSnapshot {
    pub name: String,
    pub current_position: u8,
    pub target_position: u8,
    pub position_state: PositionState,
    pub obstruction_detected: bool,
    pub last_direction_up: Option<bool>,
    pub phase: MotionPhase,
}

struct TimerGuard(JoinHandle<()>);

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one [`MotionMachine`] on its own task.
pub struct Covering {
    name: String,
    machine: MotionMachine,
    reconciler: Reconciler,
    method: Method,
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn PositionStore>,
    sink: Arc<dyn CharacteristicSink>,
    timers: HashMap<TimerKind, TimerGuard>,
    inbox: mpsc::WeakSender<Event>,
    snapshot: watch::Sender<CoveringSnapshot>,
    position_state: PositionState,
    obstruction: bool,
}

impl Covering {
    /// Seeds the state from `store` and starts the driver task.
    ///
    /// The task ends once every [`CoveringHandle`] is dropped.
    pub async fn spawn(
        setup: CoveringSetup,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn PositionStore>,
        sink: Arc<dyn CharacteristicSink>,
    ) -> CoveringHandle {
        let seeded = match store.load(&setup.name).await {
            Ok(position) => position.unwrap_or(0).min(100),
            Err(e) => {
                warn!("Covering {}: could not load last position: {}", setup.name, e);
                0
            }
        };

        let machine = MotionMachine::new(setup.machine, CoveringState::seeded(seeded));
        let (sender, receiver) = mpsc::channel(INBOX_CAPACITY);
        let (snapshot, snapshot_receiver) = watch::channel(CoveringSnapshot {
            name: setup.name.clone(),
            current_position: seeded,
            target_position: seeded,
            position_state: PositionState::Stopped,
            obstruction_detected: false,
            last_direction_up: machine.state().last_direction_up,
            phase: MotionPhase::Idle,
        });

        sink.emit_position_state(PositionState::Stopped);
        sink.emit_obstruction(false);

        let span = info_span!("covering", name = %setup.name);
        let covering = Covering {
            name: setup.name.clone(),
            machine,
            reconciler: setup.reconciler,
            method: setup.method,
            gateway,
            store,
            sink,
            timers: HashMap::new(),
            inbox: sender.downgrade(),
            snapshot,
            position_state: PositionState::Stopped,
            obstruction: false,
        };

        tokio::spawn(covering.run(receiver, setup.poll_interval).instrument(span));

        CoveringHandle {
            name: setup.name.into(),
            inbox: sender,
            snapshot: snapshot_receiver,
            supports_stop: setup.show_stop,
            supports_toggle: setup.show_toggle,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Event>, poll: Option<Duration>) {
        let mut poll = poll.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let event = tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = async {
                    match poll.as_mut() {
                        Some(interval) => interval.tick().await,
                        None => std::future::pending().await,
                    }
                } => Event::PollDue,
            };

            self.apply(event).await;
        }

        debug!("Covering {} driver stopped", self.name);
    }

    async fn apply(&mut self, event: Event) {
        for effect in self.machine.handle(event) {
            self.execute(effect).await;
        }

        self.publish();
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::CancelAllTimers => self.timers.clear(),
            Effect::CancelTimer(kind) => {
                self.timers.remove(&kind);
            }
            Effect::Schedule {
                timer,
                generation,
                after,
            } => {
                let inbox = self.inbox.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    deliver(&inbox, Event::TimerFired { timer, generation }).await;
                });
                self.timers.insert(timer, TimerGuard(handle));
            }
            Effect::Dispatch {
                generation,
                action,
                command,
            } => {
                let inbox = self.inbox.clone();
                let gateway = self.gateway.clone();
                let method = command.method(&self.method);

                tokio::spawn(async move {
                    let result = match method {
                        Ok(method) => gateway
                            .send(&command, method)
                            .await
                            .map(|reply| reply.elapsed)
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    deliver(
                        &inbox,
                        Event::Dispatched {
                            generation,
                            action,
                            result,
                        },
                    )
                    .await;
                });
            }
            Effect::QueryPosition { generation } => {
                let inbox = self.inbox.clone();
                let gateway = self.gateway.clone();
                let reconciler = self.reconciler.clone();
                let simulated = self.machine.state().last_known_position;

                tokio::spawn(async move {
                    let result = reconciler.current_position(gateway.as_ref(), simulated).await;
                    deliver(&inbox, Event::PositionRead { generation, result }).await;
                });
            }
            Effect::Persist(position) => {
                if let Err(e) = self.store.save(&self.name, position).await {
                    error!("Covering {}: could not persist position {}: {}", self.name, position, e);
                }
            }
            Effect::Emit(emission) => {
                match emission {
                    Emission::PositionState(state) => self.position_state = state,
                    Emission::ObstructionDetected(flag) => self.obstruction = flag,
                    _ => {}
                }
                emission.deliver(self.sink.as_ref());
            }
        }
    }

    fn publish(&self) {
        let state = self.machine.state();

        self.snapshot.send_replace(CoveringSnapshot {
            name: self.name.clone(),
            current_position: state.last_known_position,
            target_position: state.target_position,
            position_state: self.position_state,
            obstruction_detected: self.obstruction,
            last_direction_up: state.last_direction_up,
            phase: state.phase,
        });
    }
}

async fn deliver(inbox: &mpsc::WeakSender<Event>, event: Event) {
    if let Some(inbox) = inbox.upgrade() {
        let _ = inbox.send(event).await;
    }
}

/// Inbound control surface of a running covering.
#[derive(Debug, Clone)]
pub struct CoveringHandle {
    name: Arc<str>,
    inbox: mpsc::Sender<Event>,
    snapshot: watch::Receiver<CoveringSnapshot>,
    supports_stop: bool,
    supports_toggle: bool,
}

impl CoveringHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_stop(&self) -> bool {
        self.supports_stop
    }

    pub fn supports_toggle(&self) -> bool {
        self.supports_toggle
    }

    pub fn current_position(&self) -> u8 {
        self.snapshot.borrow().current_position
    }

    pub fn target_position(&self) -> u8 {
        self.snapshot.borrow().target_position
    }

    pub fn snapshot(&self) -> CoveringSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoveringSnapshot> {
        self.snapshot.clone()
    }

    /// Returns as soon as the request is queued; the move itself runs on the driver.
    pub async fn set_target_position(&self, position: u8) -> Result<(), DriverError> {
        self.send(Event::SetTarget(position.min(100))).await
    }

    pub async fn stop(&self) -> Result<(), DriverError> {
        self.send(Event::StopRequested).await
    }

    pub async fn toggle(&self) -> Result<(), DriverError> {
        self.send(Event::Toggle).await
    }

    /// Folds an externally observed position into the covering state.
    pub async fn push_position(&self, position: u8) -> Result<(), DriverError> {
        self.send(Event::ExternalPosition(position.min(100))).await
    }

    async fn send(&self, event: Event) -> Result<(), DriverError> {
        self.inbox
            .send(event)
            .await
            .map_err(|_| DriverError::Closed(self.name.to_string()))
    }
}
