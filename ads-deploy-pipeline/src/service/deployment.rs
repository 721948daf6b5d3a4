//! Deployment Service
//!
//! Entry into the pipeline and bookkeeping of deployment records.

use ads_deploy_core::domain::deployment::{Deployment, DeploymentUpdate};
use ads_deploy_core::domain::payload::{Payload, is_safe_identifier};
use ads_deploy_core::domain::topology::{PipelineTopology, StageKind};
use ads_deploy_core::dto::deployment::SubmitDeployment;
use ads_deploy_core::dto::status::{Progress, status_label};
use sqlx::SqlitePool;

use crate::bus::{BusError, MessageBus};
use crate::repository::deployment_repository;

/// Service error type
#[derive(Debug)]
pub enum DeploymentError {
    NotFound(i64),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    BusError(BusError),
}

impl From<sqlx::Error> for DeploymentError {
    fn from(err: sqlx::Error) -> Self {
        DeploymentError::DatabaseError(err)
    }
}

impl From<BusError> for DeploymentError {
    fn from(err: BusError) -> Self {
        DeploymentError::BusError(err)
    }
}

pub type Result<T> = std::result::Result<T, DeploymentError>;

/// Accept a deployment into the pipeline
///
/// Creates the record, then publishes the entry payload carrying its id.
pub async fn submit(
    pool: &SqlitePool,
    bus: &dyn MessageBus,
    topology: &PipelineTopology,
    req: SubmitDeployment,
) -> Result<Deployment> {
    validate_submit_request(&req)?;

    let entry = topology
        .entry()
        .ok_or_else(|| DeploymentError::ValidationError("topology has no entry stage".into()))?;

    let deployment = deployment_repository::create(pool, &req).await?;
    let payload = req.into_payload(deployment.id);

    if let Err(e) = bus
        .publish(&entry.subscribe, payload.to_vec(), entry.durable)
        .await
    {
        let changes = DeploymentUpdate {
            msg: Some(format!("failed to enter the pipeline: {}", e)),
            status: Some(status_label(entry.kind, Progress::Failed)),
            ..Default::default()
        };
        deployment_repository::update(pool, deployment.id, &changes).await?;
        return Err(e.into());
    }

    tracing::info!(
        id = deployment.id,
        application = %deployment.application,
        environment = %deployment.environment,
        action = %payload.action,
        "Deployment submitted"
    );

    Ok(deployment)
}

/// Get a deployment by ID
pub async fn get_deployment(pool: &SqlitePool, id: i64) -> Result<Deployment> {
    let deployment = deployment_repository::find_by_id(pool, id)
        .await?
        .ok_or(DeploymentError::NotFound(id))?;

    Ok(deployment)
}

/// List deployments, optionally filtered
pub async fn list_deployments(
    pool: &SqlitePool,
    application: Option<&str>,
    environment: Option<&str>,
) -> Result<Vec<Deployment>> {
    let deployments = deployment_repository::list(pool, application, environment).await?;
    Ok(deployments)
}

/// Mirror a payload's observable state onto its deployment record
///
/// Payloads that did not enter through [`submit`] carry no record id and
/// are ignored.
pub async fn record_progress(
    pool: &SqlitePool,
    stage: StageKind,
    progress: Progress,
    payload: &Payload,
) -> Result<Option<Deployment>> {
    let Some(id) = payload.deployment_id else {
        return Ok(None);
    };

    let changes = DeploymentUpdate {
        deployed: payload.deployed,
        tested: payload.tested,
        msg: payload.msg.clone(),
        status: Some(status_label(stage, progress)),
    };

    let updated = deployment_repository::update(pool, id, &changes).await?;
    if updated.is_none() {
        return Err(DeploymentError::NotFound(id));
    }

    tracing::debug!(id, %stage, %progress, "Deployment record updated");
    Ok(updated)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_submit_request(req: &SubmitDeployment) -> Result<()> {
    for (field, value) in [
        ("Application", &req.application),
        ("Environment", &req.environment),
    ] {
        if value.trim().is_empty() {
            return Err(DeploymentError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }

        if !is_safe_identifier(value) {
            return Err(DeploymentError::ValidationError(format!(
                "{} must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
                field
            )));
        }
    }

    Ok(())
}
