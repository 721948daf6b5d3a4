//! Message bus capability
//!
//! All stages talk through one exchange. A topic is a named routing key;
//! each topic feeds one queue shared by the competing consumers of the
//! stage subscribing it. Deliveries must be acknowledged, otherwise they are
//! handed out again.

mod memory;

pub use memory::InMemoryBus;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the bus transport
#[derive(Debug, Error)]
pub enum BusError {
    /// Nothing is bound to the topic on this exchange
    #[error("topic {topic} is not routable on exchange {exchange}")]
    Unroutable { exchange: String, topic: String },

    /// Topic was declared again with different durability
    #[error("topic {0} already declared with different durability")]
    DurabilityMismatch(String),

    /// The queue behind the topic has been shut down
    #[error("topic {0} is closed")]
    Closed(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

/// Transport metadata attached to a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub tag: u64,
    pub topic: String,
    pub redelivered: bool,
    pub persistent: bool,
    /// How many times this message has been handed out, this time included
    pub attempt: u32,
}

/// A message handed to a consumer, pending acknowledgement
#[derive(Debug, Clone)]
pub struct Delivery {
    pub info: DeliveryInfo,
    pub body: Vec<u8>,
}

/// Publish/subscribe capability the pipeline is built on
#[async_trait]
pub trait MessageBus: Send + Sync {
    fn exchange(&self) -> &str;

    /// Creates the queue behind `topic` if it does not exist yet
    async fn declare(&self, topic: &str, durable: bool) -> Result<(), BusError>;

    /// Publishes a body; `persistent` asks the broker to keep it across restarts
    async fn publish(&self, topic: &str, body: Vec<u8>, persistent: bool) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Rejects a delivery, optionally putting it back on its queue
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BusError>;
}

/// A consumer's handle on a topic queue
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery; `None` once the queue is closed
    async fn next(&mut self) -> Option<Delivery>;

    /// Returns a delivery only if one is immediately available
    fn try_next(&mut self) -> Option<Delivery>;
}
