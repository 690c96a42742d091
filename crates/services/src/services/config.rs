//! Runtime configuration, read once at startup from the environment.

use std::{
    env,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the Slack Web API.
    pub slack_bot_token: String,
    /// Secret for verifying inbound request signatures.
    pub slack_signing_secret: String,
    /// The base repository checkout worktrees are derived from.
    pub repo_dir: PathBuf,
    /// Root directory holding per-conversation worktrees.
    pub worktree_dir: PathBuf,
    /// Ceiling on simultaneous agent runs.
    pub max_agent_runs: usize,
    pub default_branch: String,
    pub git_remote: String,
    /// Unregistered worktrees older than this are swept.
    pub worktree_retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub claude_bin: String,
    /// Comma-separated tool allow-list passed to the agent.
    pub allowed_tools: String,
    pub host: String,
    pub port: u16,
    /// Reject requests whose `X-Forwarded-Proto` is not https (for
    /// deployments behind a TLS-terminating proxy).
    pub require_https: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Tests pass a map so they
    /// never touch process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let repo_dir = PathBuf::from(
            lookup("WORKSPACE_DIR").unwrap_or_else(|| "/home/agent/workspace".to_string()),
        );
        let worktree_dir = lookup("WORKTREE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_worktree_dir(&repo_dir));
        Self {
            slack_bot_token: lookup("SLACK_BOT_TOKEN").unwrap_or_default(),
            slack_signing_secret: lookup("SLACK_SIGNING_SECRET").unwrap_or_default(),
            repo_dir,
            worktree_dir,
            max_agent_runs: parse_or(&lookup, "MAX_AGENT_RUNS", 5),
            default_branch: lookup("DEFAULT_BRANCH").unwrap_or_else(|| "main".to_string()),
            git_remote: lookup("GIT_REMOTE").unwrap_or_else(|| "origin".to_string()),
            worktree_retention_hours: parse_or(&lookup, "WORKTREE_RETENTION_HOURS", 24),
            sweep_interval_secs: parse_or(&lookup, "SWEEP_INTERVAL_SECS", 1800),
            claude_bin: lookup("CLAUDE_BIN").unwrap_or_else(|| "claude".to_string()),
            allowed_tools: lookup("ALLOWED_TOOLS")
                .unwrap_or_else(|| "Bash,Read,Write,Edit".to_string()),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080),
            require_https: lookup("REQUIRE_HTTPS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn default_worktree_dir(repo_dir: &Path) -> PathBuf {
    repo_dir
        .parent()
        .map(|p| p.join("worktrees"))
        .unwrap_or_else(|| PathBuf::from("worktrees"))
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("invalid value for {key}: {raw:?}, using default");
            default
        }),
        None => default,
    }
}
