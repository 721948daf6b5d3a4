//! Deployment API Handlers
//!
//! Submission into the pipeline and read access to deployment records.

use ads_deploy_core::domain::key_value::KeyValue;
use ads_deploy_core::dto::deployment::{DeploymentSummary, SubmitDeployment};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::{deployment_service, key_value_service};

#[derive(Debug, Deserialize)]
pub struct DeploymentQuery {
    pub application: Option<String>,
    pub environment: Option<String>,
}

/// POST /deployments
/// Create a deployment record and push it into the pipeline
pub async fn submit_deployment(
    State(state): State<AppState>,
    Json(req): Json<SubmitDeployment>,
) -> ApiResult<(StatusCode, Json<DeploymentSummary>)> {
    tracing::info!(
        "Submitting {} for {}/{}",
        req.action,
        req.application,
        req.environment
    );

    let deployment = deployment_service::submit(
        &state.pool,
        state.bus.as_ref(),
        &state.config.topology,
        req,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(deployment.into())))
}

/// GET /deployments
/// List deployments, newest first
///
/// Query parameters:
/// - `application` (optional)
/// - `environment` (optional)
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(params): Query<DeploymentQuery>,
) -> ApiResult<Json<Vec<DeploymentSummary>>> {
    tracing::debug!("Listing deployments: {:?}", params);

    let deployments = deployment_service::list_deployments(
        &state.pool,
        params.application.as_deref(),
        params.environment.as_deref(),
    )
    .await?;

    Ok(Json(deployments.into_iter().map(Into::into).collect()))
}

/// GET /deployments/{id}
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeploymentSummary>> {
    tracing::debug!("Getting deployment: {}", id);

    let deployment = deployment_service::get_deployment(&state.pool, id).await?;
    Ok(Json(deployment.into()))
}

/// GET /kv/{key}
pub async fn get_key_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<KeyValue>> {
    let kv = key_value_service::get(&state.pool, &key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Key {} not found", key)))?;

    Ok(Json(kv))
}
