//! Pipeline supervisor
//!
//! Declares the topology on the bus, starts `concurrency` consumers per
//! stage plus the requeue loop, the status feed and the heartbeat, and
//! stops all of them on shutdown.

use ads_deploy_core::domain::topology::{PipelineTopology, StageKind};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PipelineContext, StageWorker};
use crate::bus::{BusError, MessageBus, Subscription};
use crate::config::Config;
use crate::executioner::Executioner;
use crate::scheduler::{RequeueLoop, RequeueScheduler};
use crate::service::{HealthRegistry, StatusFeed};
use crate::stages;

/// A configured, not yet running pipeline
pub struct Pipeline {
    shared: Arc<PipelineContext>,
    requeue_loop: RequeueLoop,
    health: Arc<HealthRegistry>,
    feed: Arc<StatusFeed>,
}

/// Running pipeline
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct ConsumerSlot {
    stage: StageKind,
    index: usize,
    alive: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        bus: Arc<dyn MessageBus>,
        executioner: Arc<dyn Executioner>,
        pool: SqlitePool,
        health: Arc<HealthRegistry>,
        feed: Arc<StatusFeed>,
    ) -> Self {
        let topology = Arc::new(config.topology.clone());
        let (scheduler, requeue_loop) = RequeueScheduler::new(Arc::clone(&bus), topology);

        let shared = Arc::new(PipelineContext {
            config,
            bus,
            executioner,
            scheduler,
            pool,
        });

        Self {
            shared,
            requeue_loop,
            health,
            feed,
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.shared
    }

    /// Declares every topic and spawns all pipeline tasks
    pub async fn start(self) -> Result<PipelineHandle, BusError> {
        let topology = self.shared.topology().clone();
        let bus = Arc::clone(&self.shared.bus);

        for (topic, durable) in topology.topics() {
            bus.declare(&topic, durable).await?;
            debug!(topic = %topic, durable, "Declared topic");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(self.requeue_loop.run(shutdown_rx.clone())));

        let mut slots = Vec::new();
        for stage_config in &topology.stages {
            let worker = Arc::new(StageWorker::new(
                stages::for_kind(stage_config.kind),
                stage_config.clone(),
                Arc::clone(&self.shared),
            ));

            for index in 0..stage_config.concurrency {
                let subscription = bus.subscribe(&stage_config.subscribe).await?;
                let alive = Arc::new(AtomicBool::new(true));
                slots.push(ConsumerSlot {
                    stage: stage_config.kind,
                    index,
                    alive: Arc::clone(&alive),
                });

                tasks.push(tokio::spawn(consume(
                    Arc::clone(&worker),
                    index,
                    subscription,
                    alive,
                    shutdown_rx.clone(),
                )));
            }

            info!(
                stage = %stage_config.kind,
                topic = %stage_config.subscribe,
                consumers = stage_config.concurrency,
                "Stage started"
            );
        }

        if let Some(status_topic) = status_topic(&topology) {
            tasks.push(tokio::spawn(Arc::clone(&self.feed).run(
                Arc::clone(&bus),
                status_topic,
                shutdown_rx.clone(),
            )));
        }

        tasks.push(tokio::spawn(heartbeat(
            Arc::clone(&self.health),
            slots,
            self.shared.config.poll_interval,
            shutdown_rx,
        )));

        info!(
            exchange = %bus.exchange(),
            worker_id = %self.shared.config.worker_id,
            "Pipeline started"
        );

        Ok(PipelineHandle {
            shutdown: shutdown_tx,
            tasks,
        })
    }
}

impl PipelineHandle {
    /// Signals every task to stop and waits for them
    ///
    /// Consumers finish the delivery in hand before exiting.
    pub async fn shutdown(self) {
        info!("Stopping pipeline");
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Pipeline task ended abnormally");
            }
        }

        info!("Pipeline stopped");
    }
}

async fn consume(
    worker: Arc<StageWorker>,
    index: usize,
    mut subscription: Box<dyn Subscription>,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stage = worker.kind();
    debug!(%stage, consumer = index, "Consumer started");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.changed() => break,
            delivery = subscription.next() => match delivery {
                Some(delivery) => delivery,
                None => {
                    warn!(%stage, consumer = index, "Subscription closed");
                    break;
                }
            },
        };

        worker.handle(delivery).await;
    }

    alive.store(false, Ordering::Relaxed);
    debug!(%stage, consumer = index, "Consumer stopped");
}

/// Beats for every consumer that is still running, independent of traffic
async fn heartbeat(
    health: Arc<HealthRegistry>,
    slots: Vec<ConsumerSlot>,
    poll_interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for slot in slots.iter().filter(|s| s.alive.load(Ordering::Relaxed)) {
                    health.beat(slot.stage, slot.index);
                }
            }
        }
    }
}

/// The topic the status feed listens on; every stage shares one
fn status_topic(topology: &PipelineTopology) -> Option<String> {
    topology.stages.iter().find_map(|s| s.status.clone())
}
