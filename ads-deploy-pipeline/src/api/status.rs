//! Status feed API Handler

use ads_deploy_core::dto::status::StatusEvent;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::api::AppState;

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub limit: Option<usize>,
}

/// GET /status
/// Most recent status events, newest first
pub async fn recent_status(
    State(state): State<AppState>,
    Query(params): Query<StatusQuery>,
) -> Json<Vec<StatusEvent>> {
    Json(state.feed.recent(params.limit.unwrap_or(DEFAULT_LIMIT)))
}
