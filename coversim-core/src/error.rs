#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Request {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("request to {url} returned HTTP {status} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
        body: String,
    },

    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadbackError {
    #[error("position request failed: {0}")]
    Transport(String),

    #[error("position response is empty")]
    Empty,

    #[error("position response is not a number: {0}")]
    Unparseable(String),

    #[error("position out of range (should be 0-100): {0}")]
    OutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("covering {covering} has no {endpoint} endpoint")]
    MissingEndpoint {
        covering: String,
        endpoint: &'static str,
    },

    #[error("invalid position pointer `{0}`")]
    InvalidPointer(String),

    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("position store error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("covering {0} is no longer running")]
    Closed(String),
}
