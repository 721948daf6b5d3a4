//! ErrorHandler stage
//!
//! Sink of the error topic. Turns failures into operator visible events and
//! routes nothing further.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::StageKind;
use async_trait::async_trait;
use tracing::error;

use crate::worker::{PipelineAction, Stage, StageContext, StageError};

pub struct ErrorHandler;

#[async_trait]
impl Stage for ErrorHandler {
    fn kind(&self) -> StageKind {
        StageKind::ErrorHandler
    }

    async fn process(
        &self,
        payload: Payload,
        _ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError> {
        error!(
            application = %payload.application,
            environment = %payload.environment,
            action = %payload.action,
            version = ?payload.version(),
            err = ?payload.err,
            msg = ?payload.msg,
            "Deployment pipeline failure"
        );
        Ok(PipelineAction::StatusOnly(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::repository::deployment_repository;
    use crate::stages::testing::{Harness, ScriptedExecutioner};
    use ads_deploy_core::domain::topology::{ERROR_TOPIC, STATUS_TOPIC};
    use ads_deploy_core::dto::deployment::SubmitDeployment;

    #[tokio::test]
    async fn test_failure_becomes_status_event() {
        let h = Harness::new(ScriptedExecutioner::new()).await;
        let mut failed = Payload::new("sandbox", "sandbox-prod");
        failed.fail("timeout", "waited too long");

        h.run(StageKind::ErrorHandler, &failed).await.unwrap();

        let statuses = h.statuses(STATUS_TOPIC).await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, "error_handler:failed");
        assert_eq!(statuses[0].err.as_deref(), Some("timeout"));
        assert_eq!(statuses[0].msg.as_deref(), Some("waited too long"));
    }

    #[tokio::test]
    async fn test_status_topic_is_not_persistent() {
        let h = Harness::new(ScriptedExecutioner::new()).await;
        let mut failed = Payload::new("sandbox", "sandbox-prod");
        failed.fail("deployment failed", "exit 1");

        h.run(StageKind::ErrorHandler, &failed).await.unwrap();

        let mut sub = h.bus.subscribe(STATUS_TOPIC).await.unwrap();
        let delivery = sub.try_next().unwrap();
        assert!(!delivery.info.persistent);
        assert_eq!(h.bus.is_durable(ERROR_TOPIC), Some(false));
    }

    #[tokio::test]
    async fn test_records_failure_on_deployment() {
        let h = Harness::new(ScriptedExecutioner::new()).await;
        let record = deployment_repository::create(
            &h.pool,
            &SubmitDeployment {
                application: "sandbox".to_string(),
                environment: "sandbox-prod".to_string(),
                action: Default::default(),
                commit: None,
                tag: Some("v1.2".to_string()),
            },
        )
        .await
        .unwrap();

        let mut failed = Payload::new("sandbox", "sandbox-prod");
        failed.deployment_id = Some(record.id);
        failed.deployed = Some(false);
        failed.fail("deployment failed", "exit 1");
        h.run(StageKind::ErrorHandler, &failed).await.unwrap();

        let updated = deployment_repository::find_by_id(&h.pool, record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status.as_deref(), Some("error_handler:failed"));
        assert_eq!(updated.deployed, Some(false));
        assert_eq!(updated.version(), Some("v1.2"));
    }
}
