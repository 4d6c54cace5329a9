use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::services::CoveringRegistry;

#[derive(Deserialize)]
pub struct WebhookQuery {
    pub pos: Option<String>,
}

#[derive(Clone)]
pub struct WebhookState {
    pub registry: CoveringRegistry,
}

/// Leading integer of `raw`, ignoring trailing garbage (`"42%"` is 42).
fn parse_leading_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|(index, c)| !(c.is_ascii_digit() || (*index == 0 && (*c == '-' || *c == '+'))))
        .map_or(raw.len(), |(index, _)| index);

    raw[..end].parse().ok()
}

pub async fn webhook_handler(
    State(state): State<WebhookState>,
    Path(name): Path<String>,
    Query(query): Query<WebhookQuery>,
) -> (StatusCode, Json<Value>) {
    let rejected = (StatusCode::NOT_FOUND, Json(json!({ "success": false })));

    let Some(covering) = state.registry.get(&name) else {
        tracing::error!("webhook for unknown covering {}", name);
        return rejected;
    };

    let position = query
        .pos
        .as_deref()
        .and_then(parse_leading_integer)
        .and_then(|pos| u8::try_from(pos).ok())
        .filter(|pos| *pos <= 100);

    let Some(position) = position else {
        tracing::error!("Invalid position specified in request.");
        return rejected;
    };

    if let Err(e) = covering.push_position(position).await {
        tracing::error!("webhook update for {} failed: {}", name, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false })),
        );
    }

    tracing::info!("Current position of {} updated by webhook: {}", name, position);

    (StatusCode::OK, Json(json!({ "success": true })))
}
