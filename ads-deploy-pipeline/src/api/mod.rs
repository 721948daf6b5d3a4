//! API Module
//!
//! HTTP status view over the pipeline: liveness, deployment records,
//! recent status events and submission of new deployments.

pub mod deployment;
pub mod error;
pub mod health;
pub mod status;

use axum::{
    Router,
    routing::{get, post},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::service::{HealthRegistry, StatusFeed};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub bus: Arc<dyn MessageBus>,
    pub config: Arc<Config>,
    pub health: Arc<HealthRegistry>,
    pub feed: Arc<StatusFeed>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Deployment endpoints
        .route("/deployments", get(deployment::list_deployments))
        .route("/deployments", post(deployment::submit_deployment))
        .route("/deployments/{id}", get(deployment::get_deployment))
        .route("/kv/{key}", get(deployment::get_key_value))
        // Status feed
        .route("/status", get(status::recent_status))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::db;
    use crate::repository::key_value_repository;
    use ads_deploy_core::domain::payload::{Action, Payload};
    use ads_deploy_core::domain::topology::{BEFORE_DEPLOY_TOPIC, StageKind};
    use ads_deploy_core::dto::status::{Progress, StatusEvent};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state() -> (AppState, Arc<InMemoryBus>) {
        let config = Config::default();
        let bus = Arc::new(InMemoryBus::new(config.topology.exchange.clone()));
        for (topic, durable) in config.topology.topics() {
            bus.declare(&topic, durable).await.unwrap();
        }

        let state = AppState {
            pool: db::test_pool().await,
            bus: Arc::clone(&bus) as Arc<dyn MessageBus>,
            health: Arc::new(HealthRegistry::new(config.poll_interval)),
            config: Arc::new(config),
            feed: Arc::new(StatusFeed::default()),
        };
        (state, bus)
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_enters_pipeline() {
        let (state, bus) = state().await;
        let request = Request::post("/deployments")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "application": "sandbox",
                    "environment": "sandbox-prod",
                    "action": "restart-soft",
                    "commit": "abc123"
                })
                .to_string(),
            ))
            .unwrap();

        let (status, body) = call(&state, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["version"], "abc123");
        assert_eq!(body["status"], "submitted");

        let mut sub = bus.subscribe(BEFORE_DEPLOY_TOPIC).await.unwrap();
        let delivery = sub.try_next().unwrap();
        assert!(delivery.info.persistent);
        let payload = Payload::from_slice(&delivery.body).unwrap();
        assert_eq!(payload.action, Action::RestartSoft);
        assert_eq!(payload.deployment_id, body["id"].as_i64());
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_environment() {
        let (state, _bus) = state().await;
        let request = Request::post("/deployments")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"application": "sandbox", "environment": " "}).to_string(),
            ))
            .unwrap();

        let (status, _) = call(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_rejects_command_substitution() {
        let (state, bus) = state().await;
        let request = Request::post("/deployments")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"application": "sandbox", "environment": "x; echo INJECTED $(id)"})
                    .to_string(),
            ))
            .unwrap();

        let (status, body) = call(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Environment"));

        let mut sub = bus.subscribe(BEFORE_DEPLOY_TOPIC).await.unwrap();
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_deployment_lookup_and_filter() {
        let (state, _bus) = state().await;
        for (app, env) in [("sandbox", "sandbox-prod"), ("adsws", "adsws-prod")] {
            let request = Request::post("/deployments")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"application": app, "environment": env}).to_string(),
                ))
                .unwrap();
            call(&state, request).await;
        }

        let (status, body) = call(&state, get("/deployments?application=adsws")).await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 1);

        let id = list[0]["id"].as_i64().unwrap();
        let (status, body) = call(&state, get(&format!("/deployments/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["environment"], "adsws-prod");

        let (status, _) = call(&state, get("/deployments/9999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_key_value_lookup() {
        let (state, _bus) = state().await;
        key_value_repository::upsert(&state.pool, "sandbox.sandbox-prod.last-used", "now")
            .await
            .unwrap();

        let (status, body) = call(&state, get("/kv/sandbox.sandbox-prod.last-used")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "now");

        let (status, _) = call(&state, get("/kv/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_lists_newest_first() {
        let (state, _bus) = state().await;
        for env in ["first", "second"] {
            state.feed.push(StatusEvent::new(
                StageKind::Deploy,
                Progress::Started,
                &Payload::new("sandbox", env),
            ));
        }

        let (_, body) = call(&state, get("/status?limit=1")).await;
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["environment"], "second");
    }

    #[tokio::test]
    async fn test_health_reports_stale_consumers() {
        let (mut state, _bus) = state().await;
        state.health = Arc::new(HealthRegistry::new(Duration::from_millis(10)));
        state.health.beat(StageKind::Deploy, 0);

        let (status, body) = call(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (status, body) = call(&state, get("/health")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["consumers"][0]["stale"], true);
    }
}
