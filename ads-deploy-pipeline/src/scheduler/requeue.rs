//! Deferred requeue scheduler
//!
//! Pending redeliveries live in a min-heap ordered by due time and are
//! serviced by one loop task. Timers are kept in memory only: a process that
//! dies while a payload waits drops that redelivery.

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::PipelineTopology;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("requeue scheduler is not running")]
    Stopped,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PendingRequeue {
    due: Instant,
    /// Breaks ties so equal deadlines fire in submission order
    seq: u64,
    topic: String,
    body: Vec<u8>,
}

/// Handle used by stages to schedule redeliveries
#[derive(Clone)]
pub struct RequeueScheduler {
    tx: mpsc::UnboundedSender<PendingRequeue>,
    seq: Arc<std::sync::atomic::AtomicU64>,
    pending: Arc<AtomicUsize>,
}

/// The loop that owns the timer heap
pub struct RequeueLoop {
    rx: mpsc::UnboundedReceiver<PendingRequeue>,
    bus: Arc<dyn MessageBus>,
    topology: Arc<PipelineTopology>,
    pending: Arc<AtomicUsize>,
}

impl RequeueScheduler {
    /// Creates the scheduler handle and the loop that must be spawned for it
    pub fn new(
        bus: Arc<dyn MessageBus>,
        topology: Arc<PipelineTopology>,
    ) -> (Self, RequeueLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let handle = Self {
            tx,
            seq: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            pending: Arc::clone(&pending),
        };
        let requeue_loop = RequeueLoop {
            rx,
            bus,
            topology,
            pending,
        };
        (handle, requeue_loop)
    }

    /// Publishes `payload` to `topic` once `delay` has elapsed
    ///
    /// Returns immediately; the caller is never blocked by the wait.
    pub fn schedule(
        &self,
        delay: Duration,
        topic: &str,
        payload: &Payload,
    ) -> Result<(), SchedulerError> {
        let entry = PendingRequeue {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            topic: topic.to_string(),
            body: payload.to_vec(),
        };

        self.pending.fetch_add(1, Ordering::Relaxed);
        self.tx.send(entry).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            SchedulerError::Stopped
        })?;

        debug!(
            topic,
            application = %payload.application,
            environment = %payload.environment,
            delay_secs = delay.as_secs(),
            "Scheduled redelivery"
        );
        Ok(())
    }

    /// Redeliveries scheduled and not yet fired
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl RequeueLoop {
    /// Services the timer heap until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Requeue scheduler started");

        let mut heap: BinaryHeap<Reverse<PendingRequeue>> = BinaryHeap::new();
        let mut intake_open = true;

        loop {
            let next_due = heap.peek().map(|Reverse(p)| p.due);

            tokio::select! {
                _ = shutdown.changed() => {
                    if !heap.is_empty() {
                        warn!(dropped = heap.len(), "Requeue scheduler stopping with pending redeliveries");
                    }
                    break;
                }
                entry = self.rx.recv(), if intake_open => {
                    match entry {
                        Some(entry) => heap.push(Reverse(entry)),
                        None => intake_open = false,
                    }
                }
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.fire_due(&mut heap).await;
                }
            }

            if !intake_open && heap.is_empty() {
                break;
            }
        }

        info!("Requeue scheduler stopped");
    }

    async fn fire_due(&self, heap: &mut BinaryHeap<Reverse<PendingRequeue>>) {
        let now = Instant::now();

        while heap.peek().is_some_and(|Reverse(p)| p.due <= now) {
            let Some(Reverse(entry)) = heap.pop() else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::Relaxed);

            let persistent = self.topology.is_durable(&entry.topic);
            match self.bus.publish(&entry.topic, entry.body, persistent).await {
                Ok(()) => debug!(topic = %entry.topic, "Redelivered payload"),
                Err(e) => error!(topic = %entry.topic, error = %e, "Failed to redeliver payload"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, Subscription};
    use ads_deploy_core::domain::topology::BEFORE_DEPLOY_TOPIC;

    async fn setup() -> (
        RequeueScheduler,
        Box<dyn Subscription>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let bus = Arc::new(InMemoryBus::new("ADSDeploy"));
        bus.declare(BEFORE_DEPLOY_TOPIC, true).await.unwrap();
        let sub = bus.subscribe(BEFORE_DEPLOY_TOPIC).await.unwrap();

        let (scheduler, requeue_loop) =
            RequeueScheduler::new(bus, Arc::new(PipelineTopology::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(requeue_loop.run(shutdown_rx));
        (scheduler, sub, shutdown_tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivers_once_after_delay() {
        let (scheduler, mut sub, _shutdown, _handle) = setup().await;
        let payload = Payload::new("sandbox", "sandbox-prod");

        scheduler
            .schedule(Duration::from_secs(30), BEFORE_DEPLOY_TOPIC, &payload)
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(sub.try_next().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let delivery = sub.try_next().expect("payload should be redelivered");
        assert!(delivery.info.persistent);
        assert_eq!(Payload::from_slice(&delivery.body).unwrap(), payload);
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sub.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_independently_in_due_order() {
        let (scheduler, mut sub, _shutdown, _handle) = setup().await;

        for (delay, env) in [(20, "slow"), (5, "fast"), (10, "middle")] {
            scheduler
                .schedule(
                    Duration::from_secs(delay),
                    BEFORE_DEPLOY_TOPIC,
                    &Payload::new("app", env),
                )
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(6)).await;
        let first = Payload::from_slice(&sub.try_next().unwrap().body).unwrap();
        assert_eq!(first.environment, "fast");
        assert!(sub.try_next().is_none());

        tokio::time::sleep(Duration::from_secs(15)).await;
        let second = Payload::from_slice(&sub.try_next().unwrap().body).unwrap();
        let third = Payload::from_slice(&sub.try_next().unwrap().body).unwrap();
        assert_eq!(second.environment, "middle");
        assert_eq!(third.environment, "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let (scheduler, mut sub, shutdown, handle) = setup().await;

        scheduler
            .schedule(
                Duration::from_secs(30),
                BEFORE_DEPLOY_TOPIC,
                &Payload::new("app", "env"),
            )
            .unwrap();
        tokio::task::yield_now().await;

        shutdown.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sub.try_next().is_none());
        assert!(matches!(
            scheduler.schedule(Duration::from_secs(1), BEFORE_DEPLOY_TOPIC, &Payload::new("a", "e")),
            Err(SchedulerError::Stopped)
        ));
    }
}
