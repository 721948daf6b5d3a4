//! Test stage
//!
//! Runs the post-deploy test command when one is configured.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::StageKind;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::worker::{PipelineAction, Stage, StageContext, StageError};

pub struct TestSuite;

#[async_trait]
impl Stage for TestSuite {
    fn kind(&self) -> StageKind {
        StageKind::Test
    }

    async fn process(
        &self,
        mut payload: Payload,
        ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError> {
        let Some(template) = ctx.config().commands.test.as_deref() else {
            debug!(application = %payload.application, "No test command configured");
            payload.msg = Some("no tests configured".to_string());
            return Ok(PipelineAction::Forward(payload));
        };

        let workspace = ctx.workspace(&payload)?;
        let result = ctx.run(&workspace, &payload.render(template)).await?;

        if result.success() {
            payload.tested = Some(true);
            payload.msg = Some("tests passed".to_string());
            return Ok(PipelineAction::Forward(payload));
        }

        warn!(
            application = %payload.application,
            environment = %payload.environment,
            exit_code = result.exit_code,
            "Tests failed"
        );
        payload.tested = Some(false);
        payload.fail("tests failed", result.to_string());
        Ok(PipelineAction::Fail(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{Harness, ScriptedExecutioner};
    use ads_deploy_core::domain::topology::{AFTER_DEPLOY_TOPIC, ERROR_TOPIC, STATUS_TOPIC};

    fn deployed() -> Payload {
        let mut payload = Payload::new("sandbox", "sandbox-prod");
        payload.deployed = Some(true);
        payload
    }

    #[tokio::test]
    async fn test_without_command_passes_through() {
        let h = Harness::new(ScriptedExecutioner::new()).await;

        h.run(StageKind::Test, &deployed()).await.unwrap();

        let forwarded = h.payloads(AFTER_DEPLOY_TOPIC).await;
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].msg.as_deref(), Some("no tests configured"));
        assert_eq!(forwarded[0].tested, None);
        assert!(h.executioner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_passing_tests_mark_payload_tested() {
        let h = Harness::with_config(ScriptedExecutioner::new(), |config| {
            config.commands.test = Some("./run-tests {application} {environment}".to_string());
        })
        .await;

        h.run(StageKind::Test, &deployed()).await.unwrap();

        let forwarded = h.payloads(AFTER_DEPLOY_TOPIC).await;
        assert_eq!(forwarded[0].tested, Some(true));
        assert_eq!(forwarded[0].msg.as_deref(), Some("tests passed"));
        assert_eq!(
            h.executioner.calls(),
            vec!["./run-tests sandbox sandbox-prod"]
        );
        assert_eq!(h.statuses(STATUS_TOPIC).await[0].status, "test:succeeded");
    }

    #[tokio::test]
    async fn test_failing_tests_go_to_error() {
        let h = Harness::with_config(
            ScriptedExecutioner::new().on("run-tests", 4, "3 failed\n"),
            |config| config.commands.test = Some("./run-tests".to_string()),
        )
        .await;

        h.run(StageKind::Test, &deployed()).await.unwrap();

        assert!(h.drain(AFTER_DEPLOY_TOPIC).await.is_empty());
        let errors = h.payloads(ERROR_TOPIC).await;
        assert_eq!(errors[0].tested, Some(false));
        assert_eq!(errors[0].err.as_deref(), Some("tests failed"));
        assert!(errors[0].msg.as_deref().unwrap().contains("3 failed"));
    }
}
