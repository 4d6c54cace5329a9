//! Motion simulation and actuation for window coverings that only accept
//! "up / down / stop" style network commands.
//!
//! The crate is split the same way the data flows through it:
//!
//! - [`motion`] estimates travel time from a piecewise speed model
//! - [`command`] describes the requests sent to the device
//! - [`gateway`] dispatches those requests with retries
//! - [`readback`] extracts the real position from an optional endpoint
//! - [`machine`] is the pure motion state machine
//! - [`covering`] drives the machine on a tokio task with real timers

macro_rules! chatter {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            ::tracing::info!($($arg)+)
        } else {
            ::tracing::debug!($($arg)+)
        }
    };
}

pub(crate) use chatter;

pub mod command;
pub mod config;
pub mod covering;
pub mod error;
pub mod events;
pub mod gateway;
pub mod machine;
pub mod motion;
pub mod readback;
pub mod store;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use command::{Body, Command, PositionMapping, RequestSpec};
pub use config::{CoveringConfig, CoveringSetup, MotionTimeGraph};
pub use covering::{Covering, CoveringHandle, CoveringSnapshot};
pub use error::{ConfigError, DriverError, ReadbackError, StoreError, TransportError};
pub use events::{CharacteristicSink, Emission, PositionState};
pub use gateway::{Gateway, HttpGateway, Reply, RetryPolicy};
pub use machine::{CoveringState, MachineOptions, MotionMachine, MotionPhase, MoveRequest};
pub use motion::{Checkpoint, Direction, MotionProfile, MotionSpeedModel};
pub use readback::{PositionPointer, Reconciler};
pub use store::{MemoryStore, PositionStore};
