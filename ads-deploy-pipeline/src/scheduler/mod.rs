//! Scheduler layer
//!
//! Deferred redelivery of payloads. Stages hand a payload to the scheduler
//! and return at once; a single background loop republishes it when its
//! delay has elapsed.

pub mod requeue;

pub use requeue::{RequeueLoop, RequeueScheduler, SchedulerError};
