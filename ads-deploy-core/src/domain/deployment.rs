//! Deployment domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One deployment attempt
///
/// Rows are only ever appended or updated so the table doubles as an audit
/// trail of everything the pipeline did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    pub application: String,
    pub environment: String,
    pub commit: Option<String>,
    pub tag: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_last_modified: DateTime<Utc>,
    pub deployed: Option<bool>,
    pub tested: Option<bool>,
    pub msg: Option<String>,
    pub status: Option<String>,
}

impl Deployment {
    /// The tag when one is set, otherwise the commit; blank values count
    /// as unset
    pub fn version(&self) -> Option<&str> {
        match self.tag.as_deref() {
            Some(tag) if !tag.is_empty() => Some(tag),
            _ => self.commit.as_deref().filter(|c| !c.is_empty()),
        }
    }
}

/// Mutable subset of a deployment row
///
/// `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentUpdate {
    pub deployed: Option<bool>,
    pub tested: Option<bool>,
    pub msg: Option<String>,
    pub status: Option<String>,
}
