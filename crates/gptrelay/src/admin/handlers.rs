use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::admin::{AdminQuery, ModeResponse};
use crate::proxy::{AppState, authorize, unauthorized_response};

/// `GET /sys/model`: flip the default mode
pub async fn toggle_mode_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Response<Body> {
    if !authorize(state.admin_key.as_deref(), query.api_key.as_deref()) {
        tracing::warn!("Rejected unauthenticated mode toggle");
        return unauthorized_response();
    }

    let use_crawler_default = state.relay.selector.toggle_mode();
    tracing::info!(use_crawler_default, "Default mode toggled");
    Json(ModeResponse { use_crawler_default }).into_response()
}

/// `GET /sys/logs`: every recorded turn
pub async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
) -> Response<Body> {
    if !authorize(state.admin_key.as_deref(), query.api_key.as_deref()) {
        return unauthorized_response();
    }

    match state.relay.turn_log.list().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            tracing::error!("Error reading audit log: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Error fetching logs"})),
            )
                .into_response()
        }
    }
}
