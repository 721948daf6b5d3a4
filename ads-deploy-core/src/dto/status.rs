//! Status channel DTOs
//!
//! Every stage broadcasts one of these on its status topic whenever it
//! takes a terminal action or starts a long running step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::payload::Payload;
use crate::domain::topology::StageKind;

/// Where a stage is with the current payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    Started,
    Waiting,
    Succeeded,
    Failed,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Started => write!(f, "started"),
            Progress::Waiting => write!(f, "waiting"),
            Progress::Succeeded => write!(f, "succeeded"),
            Progress::Failed => write!(f, "failed"),
        }
    }
}

/// Observable snapshot of a payload, as published on the status topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub stage: StageKind,
    /// `<stage>:<progress>`, also stored on the deployment record
    pub status: String,
    pub application: String,
    pub environment: String,
    pub action: String,
    pub version: Option<String>,
    pub deployment_id: Option<i64>,
    pub deployed: Option<bool>,
    pub tested: Option<bool>,
    pub msg: Option<String>,
    pub err: Option<String>,
    pub init_timestamp: Option<f64>,
    pub timestamp: Option<f64>,
    pub emitted_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(stage: StageKind, progress: Progress, payload: &Payload) -> Self {
        Self {
            stage,
            status: status_label(stage, progress),
            application: payload.application.clone(),
            environment: payload.environment.clone(),
            action: payload.action.to_string(),
            version: payload.version().map(str::to_string),
            deployment_id: payload.deployment_id,
            deployed: payload.deployed,
            tested: payload.tested,
            msg: payload.msg.clone(),
            err: payload.err.clone(),
            init_timestamp: payload.init_timestamp,
            timestamp: payload.timestamp,
            emitted_at: Utc::now(),
        }
    }
}

pub fn status_label(stage: StageKind, progress: Progress) -> String {
    format!("{}:{}", stage, progress)
}
