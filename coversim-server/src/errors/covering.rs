use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CoveringError {
    #[error("Covering not found")]
    CoveringNotFound,

    #[error("Position must be between 0 and 100")]
    InvalidPosition,

    #[error("Covering does not expose a {0} action")]
    ActionUnavailable(&'static str),
}

impl CoveringError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoveringError::CoveringNotFound => StatusCode::NOT_FOUND,
            CoveringError::InvalidPosition => StatusCode::BAD_REQUEST,
            CoveringError::ActionUnavailable(_) => StatusCode::NOT_FOUND,
        }
    }
}
