//! Executioner capability
//!
//! Runs one external deployment-toolchain command with a bounded wait and
//! reports what happened. Stages never spawn processes themselves.

mod shell;

pub use shell::ShellExecutioner;

use ads_deploy_core::domain::payload::Payload;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// Outcome of a finished (or abandoned) command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    /// Process exit code; -1 when the process never produced one
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when the command was killed or could not be waited on
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command: {}, exit code: {}, stdout: {}, stderr: {}",
            self.command,
            self.exit_code,
            self.stdout.trim_end(),
            self.stderr.trim_end()
        )?;
        if let Some(error) = &self.error {
            write!(f, ", error: {}", error)?;
        }
        Ok(())
    }
}

/// Errors that prevent a command from running at all
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("deploy home {0} does not exist")]
    MissingDeployHome(PathBuf),

    #[error("application home {0} does not exist")]
    MissingAppHome(PathBuf),

    #[error("virtualenv {0} does not exist")]
    MissingVirtualenv(PathBuf),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs toolchain commands
#[async_trait]
pub trait Executioner: Send + Sync {
    /// Runs `command` inside `working_dir`, giving up after `max_wait`
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        max_wait: Duration,
    ) -> Result<CommandResult, ExecError>;
}

/// Resolved on-disk locations for one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployWorkspace {
    /// eb-deploy application home, `<deploy_home>/<app>/<app>`
    pub app_home: PathBuf,
    pub virtualenv: PathBuf,
}

impl DeployWorkspace {
    /// Checks that everything a command needs exists before anything runs
    pub fn resolve(config: &Config, payload: &Payload) -> Result<Self, ExecError> {
        if !config.deploy_home.exists() {
            return Err(ExecError::MissingDeployHome(config.deploy_home.clone()));
        }

        let app_home = config
            .deploy_home
            .join(&payload.application)
            .join(&payload.application);
        if !app_home.exists() {
            return Err(ExecError::MissingAppHome(app_home));
        }

        if !config.virtualenv.exists() {
            return Err(ExecError::MissingVirtualenv(config.virtualenv.clone()));
        }

        Ok(Self {
            app_home,
            virtualenv: config.virtualenv.clone(),
        })
    }
}
