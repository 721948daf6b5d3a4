//! Shell executioner
//!
//! Activates the deploy virtualenv and runs the command through `sh -c`.
//! The child is killed if it outlives the allowed wait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandResult, ExecError, Executioner};

/// Executioner backed by the local shell
pub struct ShellExecutioner {
    virtualenv: Option<PathBuf>,
}

impl ShellExecutioner {
    /// # Arguments
    /// * `virtualenv` - activation script sourced before every command
    pub fn new(virtualenv: impl Into<PathBuf>) -> Self {
        Self {
            virtualenv: Some(virtualenv.into()),
        }
    }

    /// Runs commands without activating anything first
    pub fn bare() -> Self {
        Self { virtualenv: None }
    }

    fn script(&self, command: &str) -> String {
        match &self.virtualenv {
            Some(venv) => format!(". '{}' && {}", venv.display(), command),
            None => command.to_string(),
        }
    }
}

#[async_trait]
impl Executioner for ShellExecutioner {
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        max_wait: Duration,
    ) -> Result<CommandResult, ExecError> {
        debug!(command, dir = %working_dir.display(), "Executing command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(self.script(command))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;

        match tokio::time::timeout(max_wait, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandResult {
                command: command.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                error: None,
            }),
            Ok(Err(e)) => Ok(CommandResult {
                command: command.to_string(),
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                error: Some(format!("failed to wait for command: {}", e)),
            }),
            Err(_) => {
                // dropping the wait future kills the child
                warn!(command, ?max_wait, "Command timed out");
                Ok(CommandResult {
                    command: command.to_string(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(format!("timed out after {}s", max_wait.as_secs())),
                })
            }
        }
    }
}
