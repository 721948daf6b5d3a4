//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::bus::BusError;
use crate::service::deployment_service::DeploymentError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    DatabaseError(sqlx::Error),
    /// The pipeline could not accept the message
    Unavailable(BusError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Unavailable(err) => {
                tracing::error!("Bus error: {}", err);
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<DeploymentError> for ApiError {
    fn from(err: DeploymentError) -> Self {
        match err {
            DeploymentError::NotFound(id) => {
                ApiError::NotFound(format!("Deployment {} not found", id))
            }
            DeploymentError::ValidationError(msg) => ApiError::BadRequest(msg),
            DeploymentError::DatabaseError(err) => ApiError::DatabaseError(err),
            DeploymentError::BusError(err) => ApiError::Unavailable(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
