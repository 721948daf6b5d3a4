//! Stage worker engine
//!
//! A stage only decides what happens to one payload; the engine owns
//! decoding, routing, status emission, deferred requeues and
//! acknowledgement. Each stage runs as one or more independent consumers.

mod context;
mod engine;
mod supervisor;

pub use context::{PipelineContext, StageContext};
pub use engine::StageWorker;
pub use supervisor::{Pipeline, PipelineHandle};

use ads_deploy_core::domain::payload::{Payload, PayloadError};
use ads_deploy_core::domain::topology::StageKind;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::bus::BusError;
use crate::executioner::ExecError;
use crate::scheduler::SchedulerError;

/// The fate of one payload, decided by a stage
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineAction {
    /// Publish to the stage's forward topic, plus status
    Forward(Payload),
    /// Publish to an alternative forward topic, plus status
    Branch { topic: String, payload: Payload },
    /// Publish to the error topic, plus status
    Fail(Payload),
    /// Broadcast status only; no state transition
    StatusOnly(Payload),
    /// Republish to the stage's own topic once `delay` has elapsed
    Requeue { delay: Duration, payload: Payload },
    /// Terminal stage finished; nothing further to publish
    Complete(Payload),
}

/// Reasons a stage could not process a payload
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("no route for action '{0}'")]
    NoRoute(String),

    /// Missing deploy home, virtualenv or application checkout
    #[error("environment is not set up: {0}")]
    Workspace(ExecError),

    #[error("could not run command: {0}")]
    Execution(ExecError),

    #[error("readiness check exited with {exit_code}: {output}")]
    ReadinessCheck { exit_code: i32, output: String },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl From<ExecError> for StageError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Spawn { .. } => StageError::Execution(err),
            _ => StageError::Workspace(err),
        }
    }
}

impl StageError {
    /// Fatal misconfiguration; never retried, nothing is forwarded
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StageError::InvalidPayload(_)
                | StageError::UnknownAction(_)
                | StageError::NoRoute(_)
                | StageError::Workspace(_)
        )
    }

    /// Failures of our own infrastructure; the delivery goes back on the queue
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StageError::Store(_) | StageError::Bus(_) | StageError::Scheduler(_)
        )
    }
}

/// One pipeline step
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Interprets one payload and decides its fate
    async fn process(
        &self,
        payload: Payload,
        ctx: &StageContext<'_>,
    ) -> Result<PipelineAction, StageError>;
}
