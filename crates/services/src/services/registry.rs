//! In-memory conversation registry.
//!
//! Volatile by design: the restart story is "purge the worktrees and start
//! fresh", so nothing here touches disk. Entries are created by the first
//! recorded run (or branch switch) for a conversation and are never removed
//! by normal operation: the janitor reclaims worktrees, not registry
//! entries, because directories are the expensive resource.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;

/// Resumable state for one conversation thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSession {
    /// Opaque resume token from the agent's last structured output.
    pub session_id: Option<String>,
    pub branch: String,
    pub workspace_path: PathBuf,
}

#[derive(Clone, Default)]
pub struct ConversationRegistry {
    inner: Arc<Mutex<HashMap<String, ThreadSession>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &str) -> Option<ThreadSession> {
        self.inner.lock().get(conversation_id).cloned()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.inner.lock().contains_key(conversation_id)
    }

    /// Record the outcome of a successful agent run.
    pub fn record_run(
        &self,
        conversation_id: &str,
        session_id: String,
        branch: String,
        workspace_path: PathBuf,
    ) {
        let mut inner = self.inner.lock();
        inner.insert(
            conversation_id.to_string(),
            ThreadSession {
                session_id: Some(session_id),
                branch,
                workspace_path,
            },
        );
    }

    /// Rewrite branch and workspace after a branch switch, keeping any
    /// session token so the conversation resumes where it left off.
    pub fn record_branch_switch(
        &self,
        conversation_id: &str,
        branch: String,
        workspace_path: PathBuf,
    ) {
        let mut inner = self.inner.lock();
        let session_id = inner
            .get(conversation_id)
            .and_then(|s| s.session_id.clone());
        inner.insert(
            conversation_id.to_string(),
            ThreadSession {
                session_id,
                branch,
                workspace_path,
            },
        );
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> HashMap<String, ThreadSession> {
        self.inner.lock().clone()
    }
}
