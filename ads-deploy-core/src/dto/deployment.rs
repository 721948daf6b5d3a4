//! Deployment DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::deployment::Deployment;
use crate::domain::payload::{Action, Payload};

/// Request to push a deployment into the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDeployment {
    pub application: String,
    pub environment: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl SubmitDeployment {
    /// Builds the entry payload for a freshly created record
    pub fn into_payload(self, deployment_id: i64) -> Payload {
        let mut payload = Payload::new(self.application, self.environment).with_action(self.action);
        payload.commit = self.commit;
        payload.tag = self.tag;
        payload.deployment_id = Some(deployment_id);
        payload
    }
}

/// Deployment as shown by the status API, with the derived version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: i64,
    pub application: String,
    pub environment: String,
    pub commit: Option<String>,
    pub tag: Option<String>,
    pub version: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_last_modified: DateTime<Utc>,
    pub deployed: Option<bool>,
    pub tested: Option<bool>,
    pub msg: Option<String>,
    pub status: Option<String>,
}

impl From<Deployment> for DeploymentSummary {
    fn from(deployment: Deployment) -> Self {
        DeploymentSummary {
            version: deployment.version().map(str::to_string),
            id: deployment.id,
            application: deployment.application,
            environment: deployment.environment,
            commit: deployment.commit,
            tag: deployment.tag,
            date_created: deployment.date_created,
            date_last_modified: deployment.date_last_modified,
            deployed: deployment.deployed,
            tested: deployment.tested,
            msg: deployment.msg,
            status: deployment.status,
        }
    }
}
