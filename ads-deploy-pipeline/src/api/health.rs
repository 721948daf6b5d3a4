//! Health Check API Handler

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::api::AppState;

/// GET /health
/// Consumer liveness; 503 when any consumer missed its heartbeats
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let consumers = state.health.snapshot();
    let healthy = consumers.iter().all(|c| !c.stale);

    let status = if healthy {
        StatusCode::OK
    } else {
        tracing::warn!("Health check failed: stale consumers");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "healthy": healthy,
            "worker_id": state.config.worker_id,
            "consumers": consumers,
        })),
    )
}
