//! Worker health
//!
//! Consumers prove liveness through a heartbeat that ticks independently of
//! message traffic. A consumer whose heartbeat is older than two poll
//! intervals is reported stale.

use ads_deploy_core::domain::topology::StageKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Liveness of one consumer task
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerHealth {
    pub stage: StageKind,
    pub consumer: usize,
    pub last_beat: DateTime<Utc>,
    pub stale: bool,
}

/// Heartbeats of every consumer in this process
pub struct HealthRegistry {
    poll_interval: Duration,
    beats: Mutex<BTreeMap<(String, usize), (StageKind, DateTime<Utc>)>>,
}

impl HealthRegistry {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            beats: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records that a consumer is alive right now
    pub fn beat(&self, stage: StageKind, consumer: usize) {
        self.beat_at(stage, consumer, Utc::now());
    }

    fn beat_at(&self, stage: StageKind, consumer: usize, at: DateTime<Utc>) {
        let mut beats = self.beats.lock().unwrap();
        beats.insert((stage.label().to_string(), consumer), (stage, at));
    }

    pub fn snapshot(&self) -> Vec<ConsumerHealth> {
        let now = Utc::now();
        let limit = chrono::Duration::from_std(self.poll_interval * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let beats = self.beats.lock().unwrap();
        beats
            .iter()
            .map(|((_, consumer), (stage, last_beat))| ConsumerHealth {
                stage: *stage,
                consumer: *consumer,
                last_beat: *last_beat,
                stale: now - *last_beat > limit,
            })
            .collect()
    }

    /// True when every registered consumer has a fresh heartbeat
    pub fn is_healthy(&self) -> bool {
        self.snapshot().iter().all(|c| !c.stale)
    }
}
