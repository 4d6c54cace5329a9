use coversim_core::DriverError;

use super::CoveringError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Covering error: {0}")]
    CoveringError(#[from] CoveringError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<DriverError> for ApiError {
    fn from(error: DriverError) -> Self {
        ApiError::InternalError(error.into())
    }
}
