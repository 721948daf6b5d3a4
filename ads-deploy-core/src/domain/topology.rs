//! Pipeline topology
//!
//! Static wiring of stages to topics. Every stage subscribes one topic and
//! may publish forward, branch, report status and route errors to others.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const BEFORE_DEPLOY_TOPIC: &str = "ads.deploy.before_deploy";
pub const DEPLOY_TOPIC: &str = "ads.deploy.deploy";
pub const TEST_TOPIC: &str = "ads.deploy.test";
pub const RESTART_TOPIC: &str = "ads.deploy.restart";
pub const AFTER_DEPLOY_TOPIC: &str = "ads.deploy.after_deploy";
pub const STATUS_TOPIC: &str = "ads.deploy.status";
pub const ERROR_TOPIC: &str = "ads.deploy.error";

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    BeforeDeploy,
    Deploy,
    Test,
    Restart,
    AfterDeploy,
    ErrorHandler,
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::BeforeDeploy => "before_deploy",
            StageKind::Deploy => "deploy",
            StageKind::Test => "test",
            StageKind::Restart => "restart",
            StageKind::AfterDeploy => "after_deploy",
            StageKind::ErrorHandler => "error_handler",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Routing configuration for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub kind: StageKind,

    /// Number of concurrent consumers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    pub subscribe: String,

    /// Forward topic; `None` marks a terminal stage
    #[serde(default)]
    pub publish: Option<String>,

    /// Alternative forward topic (the restart branch)
    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    /// Durable topics survive a bus restart and carry persistent messages
    #[serde(default)]
    pub durable: bool,
}

fn default_concurrency() -> usize {
    1
}

impl StageConfig {
    pub fn new(kind: StageKind, subscribe: &str) -> Self {
        Self {
            kind,
            concurrency: 1,
            subscribe: subscribe.to_string(),
            publish: None,
            branch: None,
            status: None,
            error: None,
            durable: false,
        }
    }

    pub fn publish(mut self, topic: &str) -> Self {
        self.publish = Some(topic.to_string());
        self
    }

    pub fn branch(mut self, topic: &str) -> Self {
        self.branch = Some(topic.to_string());
        self
    }

    pub fn status(mut self, topic: &str) -> Self {
        self.status = Some(topic.to_string());
        self
    }

    pub fn error(mut self, topic: &str) -> Self {
        self.error = Some(topic.to_string());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.publish.is_none()
    }

    /// Topics this stage may emit to, in declaration order
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        [&self.publish, &self.branch, &self.error]
            .into_iter()
            .filter_map(|t| t.as_deref())
    }
}

/// Topology validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    ZeroConcurrency(StageKind),
    DuplicateSubscription(String),
    DuplicateStage(StageKind),
    DanglingTopic { stage: StageKind, topic: String },
    EntryCount(usize),
    NoTerminal,
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::ZeroConcurrency(stage) => {
                write!(f, "stage {} must have at least one consumer", stage)
            }
            TopologyError::DuplicateSubscription(topic) => {
                write!(f, "topic {} is subscribed by more than one stage", topic)
            }
            TopologyError::DuplicateStage(stage) => {
                write!(f, "stage {} is configured more than once", stage)
            }
            TopologyError::DanglingTopic { stage, topic } => {
                write!(f, "stage {} routes to {} which no stage subscribes", stage, topic)
            }
            TopologyError::EntryCount(n) => {
                write!(f, "expected exactly one entry stage, found {}", n)
            }
            TopologyError::NoTerminal => write!(f, "topology has no terminal stage"),
        }
    }
}

impl std::error::Error for TopologyError {}

/// The full stage table under one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTopology {
    pub exchange: String,
    pub stages: Vec<StageConfig>,
}

impl PipelineTopology {
    pub fn stage(&self, kind: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// The stage subscribing `topic`
    pub fn subscriber(&self, topic: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.subscribe == topic)
    }

    /// Whether messages on `topic` should be published persistent
    pub fn is_durable(&self, topic: &str) -> bool {
        self.subscriber(topic).map(|s| s.durable).unwrap_or(false)
    }

    /// The single stage no other stage routes into
    pub fn entry(&self) -> Option<&StageConfig> {
        let targeted = self.targeted_topics();
        self.stages
            .iter()
            .find(|s| !targeted.contains(s.subscribe.as_str()))
    }

    /// Every topic the pipeline touches, with its durability
    pub fn topics(&self) -> Vec<(String, bool)> {
        let mut seen: HashMap<String, bool> = HashMap::new();
        for stage in &self.stages {
            seen.insert(stage.subscribe.clone(), stage.durable);
        }
        for stage in &self.stages {
            for topic in stage.targets().chain(stage.status.as_deref()) {
                seen.entry(topic.to_string()).or_insert(false);
            }
        }
        let mut topics: Vec<_> = seen.into_iter().collect();
        topics.sort();
        topics
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut kinds = HashSet::new();
        let mut subscribed = HashSet::new();

        for stage in &self.stages {
            if stage.concurrency == 0 {
                return Err(TopologyError::ZeroConcurrency(stage.kind));
            }
            if !kinds.insert(stage.kind) {
                return Err(TopologyError::DuplicateStage(stage.kind));
            }
            if !subscribed.insert(stage.subscribe.as_str()) {
                return Err(TopologyError::DuplicateSubscription(stage.subscribe.clone()));
            }
        }

        for stage in &self.stages {
            for topic in stage.targets() {
                if !subscribed.contains(topic) {
                    return Err(TopologyError::DanglingTopic {
                        stage: stage.kind,
                        topic: topic.to_string(),
                    });
                }
            }
        }

        let targeted = self.targeted_topics();
        let entries = self
            .stages
            .iter()
            .filter(|s| !targeted.contains(s.subscribe.as_str()))
            .count();
        if entries != 1 {
            return Err(TopologyError::EntryCount(entries));
        }

        if !self.stages.iter().any(StageConfig::is_terminal) {
            return Err(TopologyError::NoTerminal);
        }

        Ok(())
    }

    fn targeted_topics(&self) -> HashSet<&str> {
        self.stages.iter().flat_map(|s| s.targets()).collect()
    }
}

impl Default for PipelineTopology {
    fn default() -> Self {
        Self {
            exchange: "ADSDeploy".to_string(),
            stages: vec![
                StageConfig::new(StageKind::BeforeDeploy, BEFORE_DEPLOY_TOPIC)
                    .publish(DEPLOY_TOPIC)
                    .branch(RESTART_TOPIC)
                    .status(STATUS_TOPIC)
                    .error(ERROR_TOPIC)
                    .durable(true),
                StageConfig::new(StageKind::Deploy, DEPLOY_TOPIC)
                    .publish(TEST_TOPIC)
                    .status(STATUS_TOPIC)
                    .error(ERROR_TOPIC)
                    .durable(true),
                StageConfig::new(StageKind::Test, TEST_TOPIC)
                    .publish(AFTER_DEPLOY_TOPIC)
                    .status(STATUS_TOPIC)
                    .error(ERROR_TOPIC)
                    .durable(true),
                StageConfig::new(StageKind::Restart, RESTART_TOPIC)
                    .publish(AFTER_DEPLOY_TOPIC)
                    .status(STATUS_TOPIC)
                    .error(ERROR_TOPIC)
                    .durable(true),
                StageConfig::new(StageKind::AfterDeploy, AFTER_DEPLOY_TOPIC)
                    .error(ERROR_TOPIC)
                    .durable(true),
                StageConfig::new(StageKind::ErrorHandler, ERROR_TOPIC)
                    .status(STATUS_TOPIC)
                    .durable(false),
            ],
        }
    }
}
