//! Deploy stage
//!
//! Runs the deploy script. This is the one long running step; it holds its
//! consumer for up to the configured max wait.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::StageKind;
use ads_deploy_core::dto::status::Progress;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::worker::{PipelineAction, Stage, StageContext, StageError};

pub struct Deploy;

#[async_trait]
impl Stage for Deploy {
    fn kind(&self) -> StageKind {
        StageKind::Deploy
    }

    async fn process(
        &self,
        mut payload: Payload,
        ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError> {
        let workspace = ctx.workspace(&payload)?;

        payload.msg = Some(format!(
            "{}-{} deployment starts",
            payload.environment, payload.application
        ));
        ctx.emit_status(&payload, Progress::Started).await;

        let command = payload.render(&ctx.config().commands.deploy);
        let result = ctx.run(&workspace, &command).await?;

        if result.success() {
            info!(
                application = %payload.application,
                environment = %payload.environment,
                version = ?payload.version(),
                "Deployed"
            );
            payload.deployed = Some(true);
            payload.msg = Some("deployed".to_string());
            return Ok(PipelineAction::Forward(payload));
        }

        warn!(
            application = %payload.application,
            environment = %payload.environment,
            exit_code = result.exit_code,
            "Deployment failed"
        );
        payload.deployed = Some(false);
        let reason = result.error.as_deref().unwrap_or(result.stderr.trim_end());
        payload.fail(
            "deployment failed",
            format!(
                "deployment failed; command: {}, exit code: {}, reason: {}, stdout: {}",
                result.command,
                result.exit_code,
                reason,
                result.stdout.trim_end()
            ),
        );
        Ok(PipelineAction::Fail(payload))
    }
}
