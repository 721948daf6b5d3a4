//! Restart stage
//!
//! Applies a soft or hard restart to the environment.

use ads_deploy_core::domain::payload::{Action, Payload};
use ads_deploy_core::domain::topology::StageKind;
use ads_deploy_core::dto::status::Progress;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::worker::{PipelineAction, Stage, StageContext, StageError};

pub struct Restart;

#[async_trait]
impl Stage for Restart {
    fn kind(&self) -> StageKind {
        StageKind::Restart
    }

    async fn process(
        &self,
        mut payload: Payload,
        ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError> {
        let commands = &ctx.config().commands;
        let template = match payload.action {
            Action::RestartSoft => &commands.restart_soft,
            Action::RestartHard => &commands.restart_hard,
            _ => {
                warn!(action = %payload.action, "Restart cannot apply this action");
                let msg = format!("Restart: unsupported action '{}'", payload.action);
                payload.fail("unknown action", msg);
                return Ok(PipelineAction::Fail(payload));
            }
        };

        let workspace = ctx.workspace(&payload)?;

        payload.msg = Some(format!(
            "{}-{} {} starts",
            payload.environment, payload.application, payload.action
        ));
        ctx.emit_status(&payload, Progress::Started).await;

        let result = ctx.run(&workspace, &payload.render(template)).await?;

        if result.success() {
            info!(
                application = %payload.application,
                environment = %payload.environment,
                action = %payload.action,
                "Restarted"
            );
            payload.msg = Some("restart succeeded".to_string());
            return Ok(PipelineAction::Forward(payload));
        }

        payload.fail("restart failed", result.to_string());
        Ok(PipelineAction::Fail(payload))
    }
}
