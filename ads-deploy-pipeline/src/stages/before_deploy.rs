//! BeforeDeploy stage
//!
//! Gate in front of every deploy or restart: waits, without holding a
//! consumer, until the target environment reports ready, then routes on
//! the payload's action.

use ads_deploy_core::domain::payload::{Action, Payload, epoch_now};
use ads_deploy_core::domain::topology::StageKind;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::worker::{PipelineAction, Stage, StageContext, StageError};

pub struct BeforeDeploy;

#[async_trait]
impl Stage for BeforeDeploy {
    fn kind(&self) -> StageKind {
        StageKind::BeforeDeploy
    }

    async fn process(
        &self,
        mut payload: Payload,
        ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError> {
        let now = epoch_now();
        if payload.ensure_init_timestamp(now) {
            debug!(
                application = %payload.application,
                environment = %payload.environment,
                "Readiness wait started"
            );
        }

        let waited = payload.waited(now);
        if waited > ctx.config().max_wait.as_secs_f64() {
            warn!(
                application = %payload.application,
                environment = %payload.environment,
                waited_secs = waited as u64,
                "Environment never became ready"
            );
            payload.deployed = Some(false);
            payload.fail(
                "timeout",
                "BeforeDeploy: waiting too long for the environment to come up",
            );
            return Ok(PipelineAction::Fail(payload));
        }

        let workspace = ctx.workspace(&payload)?;
        let command = payload.render(&ctx.config().commands.readiness);
        let result = ctx.run(&workspace, &command).await?;

        if !result.success() {
            return Err(StageError::ReadinessCheck {
                exit_code: result.exit_code,
                output: result.to_string(),
            });
        }

        let pending = pending_states(&result.stdout);
        if !pending.is_empty() {
            info!(
                application = %payload.application,
                environment = %payload.environment,
                states = ?pending,
                "Environment busy, checking again later"
            );
            return Ok(PipelineAction::Requeue {
                delay: ctx.config().requeue_delay,
                payload,
            });
        }

        match payload.action.clone() {
            Action::Deploy => {
                payload.msg = Some("OK to deploy".to_string());
                Ok(PipelineAction::Forward(payload))
            }
            action if action.is_restart() => {
                let topic = ctx
                    .stage_config()
                    .branch
                    .clone()
                    .or_else(|| {
                        ctx.topology()
                            .stage(StageKind::Restart)
                            .map(|s| s.subscribe.clone())
                    })
                    .ok_or_else(|| StageError::NoRoute(action.to_string()))?;

                payload.msg = Some("Deploy to be restarted".to_string());
                Ok(PipelineAction::Branch { topic, payload })
            }
            action => Err(StageError::UnknownAction(action.to_string())),
        }
    }
}

/// State labels of every environment that is not ready yet
///
/// Each line is `<state> <details...>`; lines without details carry no
/// environment and are skipped.
fn pending_states(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let state = tokens.next()?;
            tokens.next()?;
            (state != "Ready").then(|| state.to_string())
        })
        .collect()
}
