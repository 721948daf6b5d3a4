//! Execution context for stages
//!
//! `PipelineContext` holds the collaborators every worker shares;
//! `StageContext` is what a stage sees while processing one delivery.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::{PipelineTopology, StageConfig};
use ads_deploy_core::dto::status::Progress;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::{StageError, StageWorker};
use crate::bus::{DeliveryInfo, MessageBus};
use crate::config::Config;
use crate::executioner::{CommandResult, DeployWorkspace, Executioner};
use crate::scheduler::RequeueScheduler;

/// Collaborators shared by every stage worker in the process
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub bus: Arc<dyn MessageBus>,
    pub executioner: Arc<dyn Executioner>,
    pub scheduler: RequeueScheduler,
    pub pool: SqlitePool,
}

impl PipelineContext {
    pub fn topology(&self) -> &PipelineTopology {
        &self.config.topology
    }
}

/// Per-delivery view handed to [`super::Stage::process`]
pub struct StageContext<'a> {
    pub(super) delivery: &'a DeliveryInfo,
    pub(super) worker: &'a StageWorker,
}

impl StageContext<'_> {
    pub fn delivery(&self) -> &DeliveryInfo {
        self.delivery
    }

    pub fn config(&self) -> &Config {
        &self.worker.shared().config
    }

    pub fn stage_config(&self) -> &StageConfig {
        self.worker.stage_config()
    }

    pub fn topology(&self) -> &PipelineTopology {
        self.worker.shared().topology()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.worker.shared().pool
    }

    /// Resolves the on-disk layout for the payload's application
    pub fn workspace(&self, payload: &Payload) -> Result<DeployWorkspace, StageError> {
        Ok(DeployWorkspace::resolve(self.config(), payload)?)
    }

    /// Runs a command in the application home, bounded by the max wait
    pub async fn run(
        &self,
        workspace: &DeployWorkspace,
        command: &str,
    ) -> Result<CommandResult, StageError> {
        let result = self
            .worker
            .shared()
            .executioner
            .execute(command, &workspace.app_home, self.config().max_wait)
            .await?;
        Ok(result)
    }

    /// Broadcasts status mid-processing, e.g. before a long running step
    pub async fn emit_status(&self, payload: &Payload, progress: Progress) {
        self.worker.emit_status(payload, progress).await;
    }
}
