mod broadcast_sink;
mod registry_service;
mod tls_service;

pub use broadcast_sink::{BroadcastSink, CoveringEvent};
pub use registry_service::CoveringRegistry;
pub use tls_service::*;
