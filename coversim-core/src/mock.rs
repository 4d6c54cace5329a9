use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use crate::command::Command;
use crate::error::TransportError;
use crate::events::{CharacteristicSink, Emission, PositionState};
use crate::gateway::{Gateway, Reply};

type Handler = Box<dyn Fn(&Command) -> Result<String, TransportError> + Send + Sync>;

/// Gateway that answers from a closure and records every request.
pub struct MockGateway {
    handler: Handler,
    latency: Duration,
    calls: Mutex<Vec<(String, Method)>>,
}

impl MockGateway {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Command) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: Duration::from_millis(10),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with `OK`.
    pub fn ok() -> Self {
        Self::new(|_| Ok("OK".to_string()))
    }

    /// Fails every request with a connection error.
    pub fn unreachable() -> Self {
        Self::new(|command| {
            Err(TransportError::Request {
                url: command.url().to_string(),
                attempts: 1,
                message: "connection refused".to_string(),
            })
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<(String, Method)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|(url, _)| url).collect()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn send(&self, command: &Command, method: Method) -> Result<Reply, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((command.url().to_string(), method));
        }

        tokio::time::sleep(self.latency).await;

        (self.handler)(command).map(|body| Reply {
            body,
            elapsed: self.latency,
            attempts: 1,
        })
    }
}

/// Sink that keeps every emission in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    emissions: Mutex<Vec<Emission>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn current_positions(&self) -> Vec<u8> {
        self.emissions()
            .into_iter()
            .filter_map(|emission| match emission {
                Emission::CurrentPosition(pos) => Some(pos),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut emissions) = self.emissions.lock() {
            emissions.clear();
        }
    }

    fn record(&self, emission: Emission) {
        if let Ok(mut emissions) = self.emissions.lock() {
            emissions.push(emission);
        }
    }
}

impl CharacteristicSink for RecordingSink {
    fn emit_current_position(&self, position: u8) {
        self.record(Emission::CurrentPosition(position));
    }

    fn emit_target_position(&self, position: u8) {
        self.record(Emission::TargetPosition(position));
    }

    fn emit_position_state(&self, state: PositionState) {
        self.record(Emission::PositionState(state));
    }

    fn emit_obstruction(&self, detected: bool) {
        self.record(Emission::ObstructionDetected(detected));
    }
}
