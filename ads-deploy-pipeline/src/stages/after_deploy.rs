//! AfterDeploy stage
//!
//! Terminal step of a successful run; records when the environment was
//! last deployed to.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::StageKind;
use async_trait::async_trait;

use crate::service::key_value_service;
use crate::worker::{PipelineAction, Stage, StageContext, StageError};

pub struct AfterDeploy;

#[async_trait]
impl Stage for AfterDeploy {
    fn kind(&self) -> StageKind {
        StageKind::AfterDeploy
    }

    async fn process(
        &self,
        payload: Payload,
        ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError> {
        key_value_service::touch_last_used(ctx.pool(), &payload).await?;
        Ok(PipelineAction::Complete(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::key_value_repository;
    use crate::stages::testing::{Harness, ScriptedExecutioner};
    use ads_deploy_core::domain::topology::{ERROR_TOPIC, STATUS_TOPIC};
    use std::time::Duration;

    #[tokio::test]
    async fn test_repeated_runs_keep_one_row_with_latest_time() {
        let h = Harness::new(ScriptedExecutioner::new()).await;
        let payload = Payload::new("sandbox", "sandbox-prod");

        h.run(StageKind::AfterDeploy, &payload).await.unwrap();
        let first = key_value_repository::find(&h.pool, "sandbox.sandbox-prod.last-used")
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        h.run(StageKind::AfterDeploy, &payload).await.unwrap();

        let rows = key_value_repository::list_by_prefix(&h.pool, "sandbox.sandbox-prod")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let first_at = chrono::DateTime::parse_from_rfc3339(first.value.as_deref().unwrap()).unwrap();
        let last_at = chrono::DateTime::parse_from_rfc3339(rows[0].value.as_deref().unwrap()).unwrap();
        assert!(last_at > first_at);
    }

    #[tokio::test]
    async fn test_publishes_nothing_further() {
        let h = Harness::new(ScriptedExecutioner::new()).await;

        h.run(StageKind::AfterDeploy, &Payload::new("sandbox", "sandbox-prod"))
            .await
            .unwrap();

        assert!(h.drain(ERROR_TOPIC).await.is_empty());
        assert!(h.drain(STATUS_TOPIC).await.is_empty());
        assert!(h.executioner.calls().is_empty());
    }
}
