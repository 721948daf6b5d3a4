//! Pipeline configuration
//!
//! Everything the workers need is read once at startup into a `Config` and
//! handed to each stage behind an `Arc`.

use ads_deploy_core::domain::topology::PipelineTopology;
use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

/// Command templates run by the stages
///
/// `{application}` and `{environment}` are substituted from the payload.
#[derive(Debug, Clone)]
pub struct CommandSet {
    pub readiness: String,
    pub deploy: String,
    pub restart_soft: String,
    pub restart_hard: String,
    /// Unset means the test stage passes payloads straight through
    pub test: Option<String>,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            readiness: "./find-env-by-attr url {environment}".to_string(),
            deploy: "./safe-deploy.sh {environment}".to_string(),
            restart_soft: "./restart-soft {environment}".to_string(),
            restart_hard: "./restart-hard {environment}".to_string(),
            test: None,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifies this worker process in logs and health reports
    pub worker_id: String,

    /// Stage wiring; carries the exchange name
    pub topology: PipelineTopology,

    /// sqlx connection URL for the deployment store
    pub database_url: String,

    /// Upper bound for a command run and for the readiness wait loop
    pub max_wait: Duration,

    /// Root of the eb-deploy checkout
    pub deploy_home: PathBuf,

    /// Activation script of the virtualenv the deploy scripts need
    pub virtualenv: PathBuf,

    /// How long BeforeDeploy waits before looking at a busy environment again
    pub requeue_delay: Duration,

    /// First backoff before a delivery that hit an infrastructure error is
    /// handed out again; doubles on every further attempt
    pub retry_delay: Duration,

    /// Ceiling for the doubling backoff
    pub max_retry_delay: Duration,

    /// Deliveries failing this many times in a row are dead-lettered
    pub max_delivery_attempts: u32,

    /// Liveness heartbeat interval
    pub poll_interval: Duration,

    /// Default tracing directive when RUST_LOG is not set
    pub logging_level: String,

    /// Status web view bind address
    pub bind_addr: String,

    pub commands: CommandSet,
}

impl Config {
    /// Creates a configuration with defaults rooted at `deploy_home`
    pub fn new(deploy_home: impl Into<PathBuf>) -> Self {
        let deploy_home = deploy_home.into();
        let virtualenv = deploy_home.join("python/bin/activate");
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            topology: PipelineTopology::default(),
            database_url: "sqlite:ads-deploy.db?mode=rwc".to_string(),
            max_wait: Duration::from_secs(30 * 60),
            deploy_home,
            virtualenv,
            requeue_delay: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            max_delivery_attempts: 10,
            poll_interval: Duration::from_secs(15),
            logging_level: "info".to_string(),
            bind_addr: "0.0.0.0:9000".to_string(),
            commands: CommandSet::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - WORKER_ID
    /// - EXCHANGE (default: ADSDeploy)
    /// - PIPELINE_TOPOLOGY_FILE (JSON stage table)
    /// - DATABASE_URL
    /// - MAX_WAIT_TIME (seconds, default: 1800)
    /// - EB_DEPLOY_HOME (default: /dvt/workspace/eb-deploy)
    /// - EB_DEPLOY_VIRTUALENV (default: $EB_DEPLOY_HOME/python/bin/activate)
    /// - REQUEUE_DELAY (seconds, default: 30)
    /// - RETRY_DELAY (seconds, default: 1)
    /// - MAX_RETRY_DELAY (seconds, default: 60)
    /// - MAX_DELIVERY_ATTEMPTS (default: 10)
    /// - POLL_INTERVAL (seconds, default: 15)
    /// - LOGGING_LEVEL (default: info)
    /// - WEBAPP_URL (default: 0.0.0.0:9000)
    /// - DEPLOY_READINESS_COMMAND, DEPLOY_COMMAND, DEPLOY_RESTART_SOFT_COMMAND,
    ///   DEPLOY_RESTART_HARD_COMMAND, DEPLOY_TEST_COMMAND
    pub fn from_env() -> anyhow::Result<Self> {
        let deploy_home =
            env_string("EB_DEPLOY_HOME").unwrap_or_else(|| "/dvt/workspace/eb-deploy".to_string());
        let mut config = Self::new(deploy_home);

        if let Some(worker_id) = env_string("WORKER_ID") {
            config.worker_id = worker_id;
        }

        if let Some(path) = env_string("PIPELINE_TOPOLOGY_FILE") {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read topology file {}", path))?;
            config.topology = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse topology file {}", path))?;
        }

        if let Some(exchange) = env_string("EXCHANGE") {
            config.topology.exchange = exchange;
        }

        if let Some(url) = env_string("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(venv) = env_string("EB_DEPLOY_VIRTUALENV") {
            config.virtualenv = PathBuf::from(venv);
        }

        config.max_wait = env_secs("MAX_WAIT_TIME").unwrap_or(config.max_wait);
        config.requeue_delay = env_secs("REQUEUE_DELAY").unwrap_or(config.requeue_delay);
        config.retry_delay = env_secs("RETRY_DELAY").unwrap_or(config.retry_delay);
        config.max_retry_delay = env_secs("MAX_RETRY_DELAY").unwrap_or(config.max_retry_delay);
        config.poll_interval = env_secs("POLL_INTERVAL").unwrap_or(config.poll_interval);

        if let Some(attempts) = std::env::var("MAX_DELIVERY_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.max_delivery_attempts = attempts;
        }

        if let Some(level) = env_string("LOGGING_LEVEL") {
            config.logging_level = level.to_lowercase();
        }

        if let Some(addr) = env_string("WEBAPP_URL") {
            config.bind_addr = addr;
        }

        let commands = &mut config.commands;
        if let Some(cmd) = env_string("DEPLOY_READINESS_COMMAND") {
            commands.readiness = cmd;
        }
        if let Some(cmd) = env_string("DEPLOY_COMMAND") {
            commands.deploy = cmd;
        }
        if let Some(cmd) = env_string("DEPLOY_RESTART_SOFT_COMMAND") {
            commands.restart_soft = cmd;
        }
        if let Some(cmd) = env_string("DEPLOY_RESTART_HARD_COMMAND") {
            commands.restart_hard = cmd;
        }
        commands.test = env_string("DEPLOY_TEST_COMMAND");

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if self.topology.exchange.is_empty() {
            anyhow::bail!("exchange cannot be empty");
        }

        self.topology
            .validate()
            .context("Invalid pipeline topology")?;

        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if self.max_wait.is_zero() {
            anyhow::bail!("max_wait must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.retry_delay.is_zero() || self.max_retry_delay < self.retry_delay {
            anyhow::bail!("retry_delay must be greater than 0 and at most max_retry_delay");
        }

        if self.max_delivery_attempts == 0 {
            anyhow::bail!("max_delivery_attempts must be greater than 0");
        }

        if self.commands.readiness.trim().is_empty() || self.commands.deploy.trim().is_empty() {
            anyhow::bail!("readiness and deploy commands cannot be empty");
        }

        Ok(())
    }

    /// Tracing directive used when RUST_LOG is absent
    pub fn log_directive(&self) -> String {
        let level = match self.logging_level.as_str() {
            "warn" | "warning" => "warn",
            "debug" => "debug",
            "error" => "error",
            "trace" => "trace",
            _ => "info",
        };
        format!("ads_deploy_pipeline={},tower_http=info", level)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("/dvt/workspace/eb-deploy")
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
