//! Controller-issued command execution.
//!
//! Commands run through the host shell with a bounded execution time; every
//! failure mode folds into a `CommandResult` instead of propagating. Exit
//! code -1 is reserved for agent-side failure (timeout, spawn error, signal
//! death) and is never a legitimate process exit code.
//!
//! Arbitrary host mutation is possible here by design. Allow-listing is a
//! controller-side responsibility; this single entry point is where such a
//! policy would be inserted without touching the execution mechanics.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

/// Reserved exit code for commands the agent could not run to completion.
pub const EXIT_CODE_AGENT_FAILURE: i64 = -1;

/// Inbound command request from a controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    /// Falls back to the configured default timeout when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Outcome of one command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    fn agent_failure(command: &str, error: String) -> Self {
        Self {
            command: command.to_string(),
            exit_code: EXIT_CODE_AGENT_FAILURE,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
        }
    }
}

/// Shell command executor with an enforced timeout ceiling.
#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    max_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(max_timeout: Duration) -> Self {
        Self { max_timeout }
    }

    /// Run a command through the host shell, capturing stdout, stderr, and
    /// the exit code.
    ///
    /// The requested timeout is clamped to the executor's ceiling regardless
    /// of what the caller asked for. On timeout the child is killed; it never
    /// outlives this call.
    pub async fn execute(&self, command: &str, timeout: Duration) -> CommandResult {
        let timeout = timeout.min(self.max_timeout);
        debug!("Executing command (timeout {:?}): {}", timeout, command);

        let mut shell = if cfg!(target_os = "windows") {
            let mut shell = AsyncCommand::new("cmd");
            shell.args(["/C", command]);
            shell
        } else {
            let mut shell = AsyncCommand::new("sh");
            shell.args(["-c", command]);
            shell
        };
        shell
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future at the timeout must take the child
            // with it.
            .kill_on_drop(true);

        let child = match shell.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Command spawn failed: {}", e);
                return CommandResult::agent_failure(command, format!("spawn failed: {e}"));
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                match output.status.code() {
                    Some(code) => CommandResult {
                        command: command.to_string(),
                        exit_code: i64::from(code),
                        stdout,
                        stderr,
                        error: None,
                    },
                    // Killed by a signal: no real exit code exists.
                    None => CommandResult {
                        command: command.to_string(),
                        exit_code: EXIT_CODE_AGENT_FAILURE,
                        stdout,
                        stderr,
                        error: Some("terminated by signal".to_string()),
                    },
                }
            }
            Ok(Err(e)) => CommandResult::agent_failure(command, format!("wait failed: {e}")),
            Err(_) => {
                warn!("Command timed out after {:?}: {}", timeout, command);
                CommandResult::agent_failure(
                    command,
                    format!("timed out after {}s", timeout.as_secs()),
                )
            }
        }
    }
}
