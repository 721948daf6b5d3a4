//! In-process message bus
//!
//! Single-exchange bus backed by tokio channels. Used when the pipeline runs
//! as one process and by the tests. Durability is tracked per topic so
//! publishers behave as they would against a broker, but nothing is written
//! to disk.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, warn};

use super::{BusError, Delivery, DeliveryInfo, MessageBus, Subscription};

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    persistent: bool,
    redelivered: bool,
    attempts: u32,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<Message>>>;

struct Queue {
    durable: bool,
    tx: mpsc::UnboundedSender<Message>,
    rx: SharedReceiver,
}

struct Inner {
    exchange: String,
    queues: Mutex<HashMap<String, Queue>>,
    /// Delivered but not yet acknowledged, keyed by delivery tag
    unacked: Mutex<HashMap<u64, (String, Message)>>,
    next_tag: AtomicU64,
}

impl Inner {
    fn sender(&self, topic: &str) -> Result<mpsc::UnboundedSender<Message>, BusError> {
        let queues = self.queues.lock().unwrap();
        queues
            .get(topic)
            .map(|q| q.tx.clone())
            .ok_or_else(|| BusError::Unroutable {
                exchange: self.exchange.clone(),
                topic: topic.to_string(),
            })
    }

    fn track(&self, topic: &str, mut message: Message) -> Delivery {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        message.attempts += 1;
        let delivery = Delivery {
            info: DeliveryInfo {
                tag,
                topic: topic.to_string(),
                redelivered: message.redelivered,
                persistent: message.persistent,
                attempt: message.attempts,
            },
            body: message.body.clone(),
        };
        self.unacked
            .lock()
            .unwrap()
            .insert(tag, (topic.to_string(), message));
        delivery
    }
}

/// Tokio-channel implementation of [`MessageBus`]
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl InMemoryBus {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchange: exchange.into(),
                queues: Mutex::new(HashMap::new()),
                unacked: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(0),
            }),
        }
    }

    /// Durability a topic was declared with, if declared
    pub fn is_durable(&self, topic: &str) -> Option<bool> {
        let queues = self.inner.queues.lock().unwrap();
        queues.get(topic).map(|q| q.durable)
    }

    /// Number of deliveries handed out and not yet settled
    pub fn unacked_count(&self) -> usize {
        self.inner.unacked.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    async fn declare(&self, topic: &str, durable: bool) -> Result<(), BusError> {
        let mut queues = self.inner.queues.lock().unwrap();

        if let Some(existing) = queues.get(topic) {
            if existing.durable != durable {
                return Err(BusError::DurabilityMismatch(topic.to_string()));
            }
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(
            topic.to_string(),
            Queue {
                durable,
                tx,
                rx: Arc::new(AsyncMutex::new(rx)),
            },
        );
        debug!(topic, durable, "Declared topic");
        Ok(())
    }

    async fn publish(&self, topic: &str, body: Vec<u8>, persistent: bool) -> Result<(), BusError> {
        let tx = self.inner.sender(topic)?;
        tx.send(Message {
            body,
            persistent,
            redelivered: false,
            attempts: 0,
        })
        .map_err(|_| BusError::Closed(topic.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError> {
        let rx = {
            let queues = self.inner.queues.lock().unwrap();
            let queue = queues.get(topic).ok_or_else(|| BusError::Unroutable {
                exchange: self.inner.exchange.clone(),
                topic: topic.to_string(),
            })?;
            queue.rx.clone()
        };

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            rx,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.inner
            .unacked
            .lock()
            .unwrap()
            .remove(&delivery.info.tag)
            .map(|_| ())
            .ok_or(BusError::UnknownDelivery(delivery.info.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BusError> {
        let (topic, mut message) = self
            .inner
            .unacked
            .lock()
            .unwrap()
            .remove(&delivery.info.tag)
            .ok_or(BusError::UnknownDelivery(delivery.info.tag))?;

        if !requeue {
            warn!(topic = %topic, tag = delivery.info.tag, "Delivery rejected and dropped");
            return Ok(());
        }

        message.redelivered = true;
        let tx = self.inner.sender(&topic)?;
        tx.send(message).map_err(|_| BusError::Closed(topic))
    }
}

struct MemorySubscription {
    topic: String,
    rx: SharedReceiver,
    inner: Arc<Inner>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        let message = {
            let mut rx = self.rx.lock().await;
            rx.recv().await?
        };
        Some(self.inner.track(&self.topic, message))
    }

    fn try_next(&mut self) -> Option<Delivery> {
        let message = {
            let mut rx = self.rx.try_lock().ok()?;
            rx.try_recv().ok()?
        };
        Some(self.inner.track(&self.topic, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_declared_topic() {
        let bus = InMemoryBus::new("ADSDeploy");
        let err = bus
            .publish("ads.deploy.nowhere", b"{}".to_vec(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Unroutable { .. }));
    }

    #[tokio::test]
    async fn test_declare_is_idempotent_but_checks_durability() {
        let bus = InMemoryBus::new("ADSDeploy");
        bus.declare("ads.deploy.deploy", true).await.unwrap();
        bus.declare("ads.deploy.deploy", true).await.unwrap();
        assert_eq!(bus.is_durable("ads.deploy.deploy"), Some(true));

        let err = bus.declare("ads.deploy.deploy", false).await.unwrap_err();
        assert!(matches!(err, BusError::DurabilityMismatch(_)));
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let bus = InMemoryBus::new("ADSDeploy");
        bus.declare("t", true).await.unwrap();
        let mut sub = bus.subscribe("t").await.unwrap();

        bus.publish("t", b"one".to_vec(), true).await.unwrap();
        let first = sub.next().await.unwrap();
        assert!(!first.info.redelivered);
        assert_eq!(first.info.attempt, 1);
        assert!(first.info.persistent);
        assert_eq!(bus.unacked_count(), 1);

        bus.nack(&first, true).await.unwrap();
        let again = sub.next().await.unwrap();
        assert!(again.info.redelivered);
        assert_eq!(again.info.attempt, 2);
        assert_eq!(again.body, b"one");
        assert_ne!(again.info.tag, first.info.tag);

        bus.ack(&again).await.unwrap();
        assert_eq!(bus.unacked_count(), 0);
        assert!(sub.try_next().is_none());
        assert!(matches!(
            bus.ack(&again).await,
            Err(BusError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn test_competing_consumers_share_queue() {
        let bus = InMemoryBus::new("ADSDeploy");
        bus.declare("t", false).await.unwrap();
        let mut a = bus.subscribe("t").await.unwrap();
        let mut b = bus.subscribe("t").await.unwrap();

        bus.publish("t", b"1".to_vec(), false).await.unwrap();
        bus.publish("t", b"2".to_vec(), false).await.unwrap();

        let first = a.try_next().unwrap();
        let second = b.try_next().unwrap();
        assert_eq!(first.body, b"1");
        assert_eq!(second.body, b"2");
        assert!(a.try_next().is_none());
    }
}
