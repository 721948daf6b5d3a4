//! Pipeline payload
//!
//! The message body carried between stages. Known fields are typed; anything
//! else a stage or producer attaches is kept in `extra` so it survives the
//! round trip through every topic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the pipeline should do with the environment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    #[default]
    Deploy,
    RestartSoft,
    RestartHard,
    /// Generic restart request; routed to the restart branch but not
    /// executable on its own
    Restart,
    /// Any value we do not recognise, preserved verbatim
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Deploy => "deploy",
            Action::RestartSoft => "restart-soft",
            Action::RestartHard => "restart-hard",
            Action::Restart => "restart",
            Action::Other(s) => s,
        }
    }

    /// True for every action routed to the restart stage
    pub fn is_restart(&self) -> bool {
        matches!(
            self,
            Action::RestartSoft | Action::RestartHard | Action::Restart
        ) || matches!(self, Action::Other(s) if s.starts_with("restart"))
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "deploy" => Action::Deploy,
            "restart-soft" => Action::RestartSoft,
            "restart-hard" => Action::RestartHard,
            "restart" => Action::Restart,
            _ => Action::Other(value),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body travelling through the deployment pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub application: String,
    pub environment: String,

    #[serde(default)]
    pub action: Action,

    /// Human readable description of the last thing that happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    /// Error tag; present only once something failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tested: Option<bool>,

    /// Epoch seconds at which the readiness wait loop began
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_timestamp: Option<f64>,

    /// Generic wait-start marker, epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Row id of the deployment record tracking this payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<i64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reasons a payload is rejected at a stage boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    Malformed(String),
    MissingField(&'static str),
    /// Identity field holding characters that are unsafe on a command line
    InvalidField(&'static str),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::Malformed(reason) => write!(f, "malformed payload: {}", reason),
            PayloadError::MissingField(field) => write!(f, "payload is missing '{}'", field),
            PayloadError::InvalidField(field) => write!(
                f,
                "payload field '{}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
                field
            ),
        }
    }
}

impl std::error::Error for PayloadError {}

impl Payload {
    pub fn new(application: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            environment: environment.into(),
            action: Action::default(),
            msg: None,
            err: None,
            deployed: None,
            tested: None,
            init_timestamp: None,
            timestamp: None,
            commit: None,
            tag: None,
            deployment_id: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Decodes and validates a message body
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| PayloadError::Malformed(e.to_string()))?;

        for field in ["application", "environment"] {
            if value.get(field).is_none() {
                return Err(PayloadError::MissingField(field));
            }
        }

        let payload: Payload =
            serde_json::from_value(value).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // A map of strings, numbers and bools cannot fail to serialise
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Rejects payloads whose identity fields are blank or unsafe to
    /// substitute into a command
    pub fn validate(&self) -> Result<(), PayloadError> {
        for (field, value) in [
            ("application", &self.application),
            ("environment", &self.environment),
        ] {
            if value.trim().is_empty() {
                return Err(PayloadError::MissingField(field));
            }
            if !is_safe_identifier(value) {
                return Err(PayloadError::InvalidField(field));
            }
        }
        Ok(())
    }

    /// Tag if present, otherwise the commit
    pub fn version(&self) -> Option<&str> {
        match self.tag.as_deref() {
            Some(tag) if !tag.is_empty() => Some(tag),
            _ => self.commit.as_deref().filter(|c| !c.is_empty()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.err.is_some()
    }

    /// Marks the payload failed with an error tag and a message
    pub fn fail(&mut self, err: impl Into<String>, msg: impl Into<String>) {
        self.err = Some(err.into());
        self.msg = Some(msg.into());
    }

    /// Stamps `init_timestamp` unless one is already set
    ///
    /// Returns true when the stamp was added.
    pub fn ensure_init_timestamp(&mut self, now: f64) -> bool {
        if self.init_timestamp.is_some() {
            return false;
        }
        self.init_timestamp = Some(now);
        true
    }

    /// Seconds elapsed since `init_timestamp`, zero when unset
    pub fn waited(&self, now: f64) -> f64 {
        self.init_timestamp.map(|start| now - start).unwrap_or(0.0)
    }

    /// Key used to record when this environment was last deployed to
    pub fn last_used_key(&self) -> String {
        format!("{}.{}.last-used", self.application, self.environment)
    }

    /// Substitutes `{application}` and `{environment}` in a command template
    ///
    /// Values are shell-quoted unless they are plain identifiers.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{application}", &shell_quote(&self.application))
            .replace("{environment}", &shell_quote(&self.environment))
    }
}

/// Letters, digits, `.`, `_` and `-`, starting with a letter or digit
///
/// Such a value is a single shell word, cannot be read as an option and
/// cannot climb out of a directory.
pub fn is_safe_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        _ => false,
    }
}

/// Quotes `value` as one POSIX shell word
fn shell_quote(value: &str) -> String {
    if is_safe_identifier(value) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Current wall clock as epoch seconds
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
