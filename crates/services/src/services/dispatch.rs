//! Event dispatch: admission, workspace setup, agent run, reply.
//!
//! This is the seam between the webhook transport and the lifecycle
//! machinery. `dispatch` runs on the request path and must stay cheap;
//! everything that touches the filesystem, git, or the agent happens on a
//! spawned worker so the chat platform gets its acknowledgment immediately.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use executors::claude::ClaudeExecutor;
use serde::Serialize;

use crate::services::{
    config::Config,
    coordinator::{AdmissionError, RunCoordinator, RunPermit},
    git::GitService,
    registry::ConversationRegistry,
    slack::SlackClient,
    worktree::WorktreeManager,
};

/// What kind of conversational event arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Mention,
    DirectMessage,
    Other,
}

/// A normalized inbound chat event.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Thread key: `thread_ts` of the conversation, falling back to the
    /// message's own `ts` for thread roots.
    pub conversation_id: String,
    pub channel: String,
    pub message_ts: String,
    pub text: String,
    pub sender_is_bot: bool,
    pub kind: EventKind,
}

/// Per-conversation slice of the status snapshot.
#[derive(Debug, Serialize)]
pub struct ConversationStatus {
    pub session_id: Option<String>,
    pub branch: String,
    pub workspace_path: PathBuf,
    pub workspace_exists: bool,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub running_count: usize,
    pub ceiling: usize,
    pub active_conversation_ids: Vec<String>,
    pub conversations: HashMap<String, ConversationStatus>,
}

#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    coordinator: RunCoordinator,
    registry: ConversationRegistry,
    worktrees: WorktreeManager,
    git: GitService,
    executor: ClaudeExecutor,
    slack: SlackClient,
}

impl Dispatcher {
    pub fn new(config: Config, slack: SlackClient) -> Self {
        let config = Arc::new(config);
        let registry = ConversationRegistry::new();
        let git = GitService::new();
        let worktrees = WorktreeManager::new(
            config.repo_dir.clone(),
            config.worktree_dir.clone(),
            config.default_branch.clone(),
            config.git_remote.clone(),
            git.clone(),
            registry.clone(),
        );
        let coordinator = RunCoordinator::new(config.max_agent_runs);
        let executor = ClaudeExecutor::new(
            config.claude_bin.clone(),
            config.allowed_tools.clone(),
        );
        Self {
            config,
            coordinator,
            registry,
            worktrees,
            git,
            executor,
            slack,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn worktrees(&self) -> &WorktreeManager {
        &self.worktrees
    }

    /// Entry point from the webhook route.
    ///
    /// Filters bot echo and unknown event kinds, parses administrative
    /// commands, and otherwise runs admission control. Admitted work is
    /// spawned; rejected requests get an immediate reply and are dropped.
    /// There is no queue.
    pub fn dispatch(&self, event: InboundEvent) {
        if event.sender_is_bot || event.kind == EventKind::Other {
            return;
        }
        let task = match event.kind {
            EventKind::Mention => strip_leading_mention(&event.text),
            _ => event.text.trim().to_string(),
        };
        if task.is_empty() {
            return;
        }

        if let Some(command) = task.strip_prefix('!') {
            let this = self.clone();
            let command = command.to_string();
            tokio::spawn(async move {
                let reply = this.run_admin_command(&event, &command).await;
                this.slack
                    .post_message(&event.channel, &event.conversation_id, &reply)
                    .await;
            });
            return;
        }

        match self.coordinator.admit(&event.conversation_id) {
            Ok(permit) => {
                let this = self.clone();
                tokio::spawn(async move { this.run_agent(event, task, permit).await });
            }
            Err(AdmissionError::Busy(_)) => {
                self.reply(&event, "Busy right now boss");
            }
            Err(AdmissionError::AlreadyRunning) => {
                self.reply(&event, "Still working on this thread, give me a minute.");
            }
        }
    }

    /// Fire-and-forget reply used on the request path.
    fn reply(&self, event: &InboundEvent, text: &str) {
        let slack = self.slack.clone();
        let channel = event.channel.clone();
        let thread = event.conversation_id.clone();
        let text = text.to_string();
        tokio::spawn(async move { slack.post_message(&channel, &thread, &text).await });
    }

    /// One admitted agent run. The permit is owned here, so every exit path
    /// releases the global slot and the single-flight marker.
    async fn run_agent(&self, event: InboundEvent, task: String, _permit: RunPermit) {
        self.slack
            .add_reaction(&event.channel, &event.message_ts, "thumbsup")
            .await;

        let prior = self.registry.get(&event.conversation_id);
        let prior_branch = prior.as_ref().map(|p| p.branch.clone());
        let prior_session = prior.and_then(|p| p.session_id);

        let workspace = {
            let worktrees = self.worktrees.clone();
            let id = event.conversation_id.clone();
            let branch = prior_branch.clone();
            match tokio::task::spawn_blocking(move || worktrees.ensure(&id, branch.as_deref()))
                .await
            {
                Ok(Ok(path)) => path,
                Ok(Err(e)) => {
                    tracing::error!(
                        conversation = %event.conversation_id,
                        error = %e,
                        "workspace setup failed"
                    );
                    self.slack
                        .post_message(
                            &event.channel,
                            &event.conversation_id,
                            &format!("Failed to prepare workspace: {e}"),
                        )
                        .await;
                    return;
                }
                Err(e) => {
                    tracing::error!("workspace setup task failed: {e}");
                    self.slack
                        .post_message(
                            &event.channel,
                            &event.conversation_id,
                            "Failed to prepare workspace.",
                        )
                        .await;
                    return;
                }
            }
        };

        let outcome = match self
            .executor
            .invoke(&task, &workspace, prior_session.as_deref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    conversation = %event.conversation_id,
                    error = %e,
                    "agent invocation failed"
                );
                self.slack
                    .post_message(
                        &event.channel,
                        &event.conversation_id,
                        &format!("Agent failed to start: {e}"),
                    )
                    .await;
                return;
            }
        };

        // Session continuity is only recorded when the structured output
        // parsed; raw fallback text still reaches the user below.
        if let Some(session_id) = outcome.session_id.clone() {
            let branch = self
                .workspace_branch(&workspace)
                .await
                .or(prior_branch)
                .unwrap_or_else(|| self.config.default_branch.clone());
            tracing::info!(
                conversation = %event.conversation_id,
                session = %session_id,
                %branch,
                "recorded agent session"
            );
            self.registry
                .record_run(&event.conversation_id, session_id, branch, workspace);
        }

        self.slack
            .post_message(&event.channel, &event.conversation_id, &outcome.message)
            .await;
    }

    /// Branch currently checked out in the workspace, if any. The agent may
    /// have moved the workspace since the last run; a detached HEAD reads as
    /// `None`.
    async fn workspace_branch(&self, workspace: &std::path::Path) -> Option<String> {
        let git = self.git.clone();
        let path = workspace.to_path_buf();
        tokio::task::spawn_blocking(move || git.current_branch(&path))
            .await
            .ok()
            .and_then(|r| r.ok())
            .filter(|b| !b.is_empty())
    }

    async fn run_admin_command(&self, event: &InboundEvent, command: &str) -> String {
        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("status"), _) => self.render_status(),
            (Some("update"), _) => self.update_base().await,
            (Some("branch"), Some(name)) => self.switch_branch(event, name).await,
            (Some("branch"), None) => "Usage: !branch <name>".to_string(),
            _ => format!("Unknown command: !{command}"),
        }
    }

    /// `!update`: move the base checkout onto the default branch and pull.
    /// Only administrative commands ever touch the base checkout's branch.
    async fn update_base(&self) -> String {
        let git = self.git.clone();
        let repo = self.config.repo_dir.clone();
        let branch = self.config.default_branch.clone();
        match tokio::task::spawn_blocking(move || git.checkout_and_pull(&repo, &branch)).await {
            Ok(Ok(output)) if output.is_empty() => "Updated.".to_string(),
            Ok(Ok(output)) => output,
            Ok(Err(e)) => format!("Update failed: {e}"),
            Err(e) => format!("Update failed: {e}"),
        }
    }

    async fn switch_branch(&self, event: &InboundEvent, name: &str) -> String {
        if !self.git.is_branch_name_valid(name) {
            return format!("`{name}` is not a valid branch name");
        }
        let worktrees = self.worktrees.clone();
        let id = event.conversation_id.clone();
        let branch = name.to_string();
        match tokio::task::spawn_blocking(move || worktrees.switch_branch(&id, &branch)).await {
            Ok(Ok((path, outcome))) => {
                self.registry
                    .record_branch_switch(&event.conversation_id, name.to_string(), path);
                outcome.describe()
            }
            Ok(Err(e)) => format!("Branch switch failed: {e}"),
            Err(e) => format!("Branch switch failed: {e}"),
        }
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let conversations = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(id, session)| {
                let status = ConversationStatus {
                    workspace_exists: session.workspace_path.exists(),
                    active: self.coordinator.is_active(&id),
                    session_id: session.session_id,
                    branch: session.branch,
                    workspace_path: session.workspace_path,
                };
                (id, status)
            })
            .collect();
        StatusSnapshot {
            running_count: self.coordinator.running_count(),
            ceiling: self.coordinator.ceiling(),
            active_conversation_ids: self.coordinator.active_ids(),
            conversations,
        }
    }

    fn render_status(&self) -> String {
        let snapshot = self.status_snapshot();
        let mut lines = vec![format!(
            "Runs: {}/{}",
            snapshot.running_count, snapshot.ceiling
        )];
        if snapshot.conversations.is_empty() {
            lines.push("No tracked conversations.".to_string());
        } else {
            let mut entries: Vec<_> = snapshot.conversations.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (id, status) in entries {
                lines.push(format!(
                    "{id}: branch {}, workspace {}{}",
                    status.branch,
                    status.workspace_path.display(),
                    if status.active { " (running)" } else { "" }
                ));
            }
        }
        lines.join("\n")
    }
}

/// Drop the leading `<@U…>` token Slack prepends to app mentions.
fn strip_leading_mention(text: &str) -> String {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<@") {
        match rest.find('>') {
            Some(idx) => rest[idx + 1..].trim().to_string(),
            None => trimmed.trim().to_string(),
        }
    } else {
        trimmed.trim().to_string()
    }
}
