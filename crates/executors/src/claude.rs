//! Invocation of the Claude Code CLI as one bounded unit of work.
//!
//! The agent runs to completion inside a single workspace directory. The only
//! restrictions imposed here are the working directory and the tool
//! allow-list; what the agent does inside the workspace is its own business.

use std::{path::Path, process::Stdio};

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use utils::shell::resolve_executable_path;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("agent executable `{0}` not found on PATH")]
    NotAvailable(String),
    #[error("failed to spawn agent: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Structured output of `claude --output-format json`.
///
/// Only the fields the dispatcher needs; anything else in the payload is
/// ignored on purpose.
#[derive(Debug, Deserialize)]
struct ClaudeJson {
    result: Option<String>,
    session_id: Option<String>,
}

/// Result of one agent run.
///
/// `session_id` is present only when the agent's structured output parsed;
/// callers treat its absence as "nothing to record".
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClaudeExecutor {
    binary: String,
    allowed_tools: String,
}

impl ClaudeExecutor {
    pub fn new(binary: impl Into<String>, allowed_tools: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            allowed_tools: allowed_tools.into(),
        }
    }

    /// Run the agent in `workspace` and wait for it to finish.
    ///
    /// Malformed or missing structured output degrades to raw captured output
    /// so the caller always has something to show the user; only a
    /// spawn-level I/O failure is a hard error. No timeout is imposed; the
    /// agent runs to completion or tool failure.
    pub async fn invoke(
        &self,
        task: &str,
        workspace: &Path,
        resume_session: Option<&str>,
    ) -> Result<AgentOutcome, ExecutorError> {
        let program = resolve_executable_path(&self.binary)
            .ok_or_else(|| ExecutorError::NotAvailable(self.binary.clone()))?;

        let mut cmd = Command::new(program);
        // `--resume` must precede `-p` for the CLI to pick the session up.
        if let Some(session) = resume_session {
            cmd.arg("--resume").arg(session);
        }
        cmd.arg("-p")
            .arg(task)
            .arg("--allowedTools")
            .arg(&self.allowed_tools)
            .arg("--output-format")
            .arg("json")
            .arg("--dangerously-skip-permissions")
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(
            workspace = %workspace.display(),
            resume = ?resume_session,
            "invoking agent"
        );
        let output = cmd.output().await?;
        if !output.status.success() {
            tracing::warn!(status = ?output.status.code(), "agent exited nonzero");
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok(Self::parse_outcome(stdout, stderr))
    }

    fn parse_outcome(stdout: String, stderr: String) -> AgentOutcome {
        match serde_json::from_str::<ClaudeJson>(&stdout) {
            Ok(parsed) => AgentOutcome {
                message: parsed
                    .result
                    .unwrap_or_else(|| "Done, but no output.".to_string()),
                session_id: parsed.session_id,
            },
            Err(e) => {
                tracing::warn!("failed to parse agent output: {e}");
                let message = if !stdout.trim().is_empty() {
                    stdout
                } else if !stderr.trim().is_empty() {
                    stderr
                } else {
                    "Something went wrong.".to_string()
                };
                AgentOutcome {
                    message,
                    session_id: None,
                }
            }
        }
    }
}
