use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use coversim_core::{CoveringHandle, CoveringSnapshot};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, CoveringError};
use crate::services::CoveringRegistry;

#[derive(Clone, Serialize, Deserialize)]
pub struct TargetBody {
    pub position: i64,
}

#[derive(Clone)]
pub struct ControlState {
    pub registry: CoveringRegistry,
}

impl ControlState {
    fn covering(&self, name: &str) -> Result<&CoveringHandle, CoveringError> {
        self.registry.get(name).ok_or(CoveringError::CoveringNotFound)
    }
}

pub async fn get_coverings(State(state): State<ControlState>) -> Json<Vec<CoveringSnapshot>> {
    Json(state.registry.snapshots())
}

pub async fn get_covering(
    State(state): State<ControlState>,
    Path(name): Path<String>,
) -> Result<Json<CoveringSnapshot>, ApiError> {
    Ok(Json(state.covering(&name)?.snapshot()))
}

pub async fn set_target_position(
    State(state): State<ControlState>,
    Path(name): Path<String>,
    Json(body): Json<TargetBody>,
) -> Result<impl IntoResponse, ApiError> {
    let covering = state.covering(&name)?;

    let position = u8::try_from(body.position)
        .ok()
        .filter(|position| *position <= 100)
        .ok_or(CoveringError::InvalidPosition)?;

    covering.set_target_position(position).await?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_covering(
    State(state): State<ControlState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let covering = state.covering(&name)?;

    if !covering.supports_stop() {
        return Err(CoveringError::ActionUnavailable("stop").into());
    }

    covering.stop().await?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn toggle_covering(
    State(state): State<ControlState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let covering = state.covering(&name)?;

    if !covering.supports_toggle() {
        return Err(CoveringError::ActionUnavailable("toggle").into());
    }

    covering.toggle().await?;

    Ok(StatusCode::ACCEPTED)
}
