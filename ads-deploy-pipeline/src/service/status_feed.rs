//! Status feed
//!
//! Consumes the status topic and keeps the most recent events in memory for
//! the status web view.

use ads_deploy_core::dto::status::StatusEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;

pub const DEFAULT_CAPACITY: usize = 200;

pub struct StatusFeed {
    capacity: usize,
    events: Mutex<VecDeque<StatusEvent>>,
}

impl StatusFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, event: StatusEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` events, newest first
    pub fn recent(&self, limit: usize) -> Vec<StatusEvent> {
        let events = self.events.lock().unwrap();
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Consumes `topic` until shutdown
    pub async fn run(
        self: Arc<Self>,
        bus: Arc<dyn MessageBus>,
        topic: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut subscription = match bus.subscribe(&topic).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Status feed could not subscribe");
                return;
            }
        };

        info!(topic = %topic, "Status feed started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                delivery = subscription.next() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match serde_json::from_slice::<StatusEvent>(&delivery.body) {
                Ok(event) => {
                    debug!(status = %event.status, application = %event.application, "Status event");
                    self.push(event);
                }
                Err(e) => warn!(error = %e, "Discarding malformed status event"),
            }

            if let Err(e) = bus.ack(&delivery).await {
                warn!(error = %e, "Failed to acknowledge status event");
            }
        }

        info!("Status feed stopped");
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
