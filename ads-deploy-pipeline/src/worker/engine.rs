//! Stage worker
//!
//! Generic consume-process-publish loop body. Turns the stage's decision
//! into publications, keeps the deployment record in step and settles the
//! delivery with the bus.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::{StageConfig, StageKind};
use ads_deploy_core::dto::status::{Progress, StatusEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{PipelineAction, PipelineContext, Stage, StageContext, StageError};
use crate::bus::{BusError, Delivery};
use crate::service::deployment_service;

/// Runs one stage against deliveries from its subscribe topic
pub struct StageWorker {
    stage: Arc<dyn Stage>,
    config: StageConfig,
    shared: Arc<PipelineContext>,
}

impl StageWorker {
    pub fn new(stage: Arc<dyn Stage>, config: StageConfig, shared: Arc<PipelineContext>) -> Self {
        debug_assert_eq!(stage.kind(), config.kind);
        Self {
            stage,
            config,
            shared,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.config.kind
    }

    pub fn stage_config(&self) -> &StageConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> &PipelineContext {
        &self.shared
    }

    /// Processes one delivery and settles it with the bus
    ///
    /// Successful processing is acknowledged. Infrastructure failures put
    /// the delivery back on the queue after a backoff, until the attempt
    /// limit dead-letters it. Anything else is logged, written to the
    /// deployment record and acknowledged so it is not retried.
    pub async fn handle(&self, delivery: Delivery) {
        let stage = self.kind();
        let bus = &self.shared.bus;

        let settled = match self.process_delivery(&delivery).await {
            Ok(()) => bus.ack(&delivery).await,
            Err(e) if e.is_transient() => self.retry(&delivery, &e).await,
            Err(e) => {
                error!(
                    %stage,
                    tag = delivery.info.tag,
                    configuration = e.is_configuration(),
                    error = %e,
                    "Payload rejected"
                );
                self.record_rejection(&delivery, &e).await;
                bus.ack(&delivery).await
            }
        };

        if let Err(e) = settled {
            error!(%stage, tag = delivery.info.tag, error = %e, "Failed to settle delivery");
        }
    }

    /// Holds a transiently failed delivery for a backoff, then requeues it
    ///
    /// The consumer is parked meanwhile, so an outage slows the stage down
    /// instead of spinning on the same message.
    async fn retry(&self, delivery: &Delivery, e: &StageError) -> Result<(), BusError> {
        let stage = self.kind();
        let config = &self.shared.config;
        let attempt = delivery.info.attempt;

        if attempt >= config.max_delivery_attempts {
            error!(
                %stage,
                tag = delivery.info.tag,
                attempt,
                error = %e,
                "Giving up on delivery, dead-lettering it"
            );
            self.record_rejection(delivery, e).await;
            return self.shared.bus.nack(delivery, false).await;
        }

        let backoff = retry_backoff(config.retry_delay, config.max_retry_delay, attempt);
        warn!(
            %stage,
            tag = delivery.info.tag,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %e,
            "Processing failed, returning delivery to the queue"
        );
        tokio::time::sleep(backoff).await;
        self.shared.bus.nack(delivery, true).await
    }

    /// Decodes, runs the stage and applies its decision
    pub async fn process_delivery(&self, delivery: &Delivery) -> Result<(), StageError> {
        let payload = Payload::from_slice(&delivery.body)?;

        debug!(
            stage = %self.kind(),
            application = %payload.application,
            environment = %payload.environment,
            redelivered = delivery.info.redelivered,
            "Processing payload"
        );

        let ctx = StageContext {
            delivery: &delivery.info,
            worker: self,
        };
        let action = self.stage.process(payload, &ctx).await?;
        self.apply(action).await
    }

    async fn apply(&self, action: PipelineAction) -> Result<(), StageError> {
        match action {
            PipelineAction::Forward(payload) => {
                let topic = self.config.publish.clone();
                self.forward(topic.as_deref(), payload).await
            }
            PipelineAction::Branch { topic, payload } => self.forward(Some(&topic), payload).await,
            PipelineAction::Fail(payload) => self.fail(payload).await,
            PipelineAction::StatusOnly(payload) => {
                let progress = if payload.is_failed() {
                    Progress::Failed
                } else {
                    Progress::Waiting
                };
                self.emit_status(&payload, progress).await;
                Ok(())
            }
            PipelineAction::Requeue { delay, payload } => {
                self.shared
                    .scheduler
                    .schedule(delay, &self.config.subscribe, &payload)?;
                Ok(())
            }
            PipelineAction::Complete(payload) => {
                self.emit_status(&payload, Progress::Succeeded).await;
                Ok(())
            }
        }
    }

    async fn forward(&self, topic: Option<&str>, payload: Payload) -> Result<(), StageError> {
        if payload.is_failed() {
            warn!(stage = %self.kind(), err = ?payload.err, "Failed payload cannot go forward");
            return self.fail(payload).await;
        }

        // Recorded and broadcast before the next stage can see the payload
        self.emit_status(&payload, Progress::Succeeded).await;

        match topic {
            Some(topic) => self.publish(topic, &payload).await?,
            None => debug!(stage = %self.kind(), "Terminal stage, nothing to forward"),
        }
        Ok(())
    }

    async fn fail(&self, mut payload: Payload) -> Result<(), StageError> {
        if payload.err.is_none() {
            payload.err = Some(format!("{} failed", self.kind()));
        }

        self.emit_status(&payload, Progress::Failed).await;

        match &self.config.error {
            Some(topic) => self.publish(topic, &payload).await?,
            None => error!(
                stage = %self.kind(),
                application = %payload.application,
                environment = %payload.environment,
                err = ?payload.err,
                msg = ?payload.msg,
                "Failure with no error topic to route to"
            ),
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &Payload) -> Result<(), StageError> {
        let persistent = self.shared.topology().is_durable(topic);
        self.shared
            .bus
            .publish(topic, payload.to_vec(), persistent)
            .await?;
        debug!(stage = %self.kind(), topic, persistent, "Published payload");
        Ok(())
    }

    /// Updates the deployment record and broadcasts a status event
    ///
    /// Both are best-effort: failures are logged, never propagated.
    pub(crate) async fn emit_status(&self, payload: &Payload, progress: Progress) {
        let stage = self.kind();

        if let Err(e) =
            deployment_service::record_progress(&self.shared.pool, stage, progress, payload).await
        {
            error!(%stage, deployment_id = ?payload.deployment_id, error = ?e, "Failed to update deployment record");
        }

        let Some(topic) = &self.config.status else {
            return;
        };

        let event = StatusEvent::new(stage, progress, payload);
        let body = match serde_json::to_vec(&event) {
            Ok(body) => body,
            Err(e) => {
                error!(%stage, error = %e, "Failed to encode status event");
                return;
            }
        };

        let persistent = self.shared.topology().is_durable(topic);
        match self.shared.bus.publish(topic, body, persistent).await {
            Ok(()) => info!(
                %stage,
                status = %event.status,
                application = %payload.application,
                environment = %payload.environment,
                msg = ?payload.msg,
                "Status"
            ),
            Err(e) if stage == StageKind::ErrorHandler => {
                error!(%stage, error = %e, err = ?payload.err, msg = ?payload.msg, "Failed to broadcast error status")
            }
            Err(e) => warn!(%stage, error = %e, "Failed to broadcast status"),
        }
    }

    async fn record_rejection(&self, delivery: &Delivery, e: &StageError) {
        let Ok(mut payload) = Payload::from_slice(&delivery.body) else {
            return;
        };
        payload.fail("rejected", e.to_string());

        if let Err(db_err) = deployment_service::record_progress(
            &self.shared.pool,
            self.kind(),
            Progress::Failed,
            &payload,
        )
        .await
        {
            error!(stage = %self.kind(), error = ?db_err, "Failed to record rejection");
        }
    }
}

/// `base` doubled for every attempt after the first, capped at `max`
fn retry_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << doublings).min(max)
}
