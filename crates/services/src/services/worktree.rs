//! Per-conversation worktree lifecycle.
//!
//! Each conversation gets its own working copy derived from the base
//! checkout. Worktrees are created detached so any number of conversations
//! can sit on the same branch without fighting over the checkout, and so the
//! branch checked out in the base repository is never in the way.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use utils::text::dir_id;

use crate::services::{
    git::{GitCliError, GitService, GitServiceError},
    registry::ConversationRegistry,
};

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error(transparent)]
    Git(#[from] GitServiceError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a branch switch was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The branch already existed (locally or on the remote) and the new
    /// workspace was checked out from it.
    ReusedExisting { branch: String },
    /// The branch existed nowhere, so the workspace was created from the
    /// default branch and the branch was created inside it.
    CreatedFromDefault {
        branch: String,
        default_branch: String,
    },
}

impl SwitchOutcome {
    /// Human-readable outcome for the chat reply.
    pub fn describe(&self) -> String {
        match self {
            SwitchOutcome::ReusedExisting { branch } => {
                format!("Switched to existing branch `{branch}`.")
            }
            SwitchOutcome::CreatedFromDefault {
                branch,
                default_branch,
            } => format!("Created new branch `{branch}` from `{default_branch}`."),
        }
    }
}

#[derive(Clone)]
pub struct WorktreeManager {
    repo_dir: PathBuf,
    worktree_dir: PathBuf,
    default_branch: String,
    git_remote: String,
    git: GitService,
    registry: ConversationRegistry,
}

impl WorktreeManager {
    pub fn new(
        repo_dir: PathBuf,
        worktree_dir: PathBuf,
        default_branch: String,
        git_remote: String,
        git: GitService,
        registry: ConversationRegistry,
    ) -> Self {
        Self {
            repo_dir,
            worktree_dir,
            default_branch,
            git_remote,
            git,
            registry,
        }
    }

    /// Where the workspace for `conversation_id` lives (whether or not it
    /// exists yet). Distinct conversation ids map to distinct paths.
    pub fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.worktree_dir.join(dir_id(conversation_id))
    }

    /// Ensure a workspace exists for the conversation and return its path.
    ///
    /// Idempotent: an existing workspace is returned untouched. Otherwise a
    /// detached worktree is materialized from `branch` (or the default
    /// branch), with one prune-and-retry if git reports stale worktree
    /// metadata left behind by an out-of-band deletion.
    pub fn ensure(
        &self,
        conversation_id: &str,
        branch: Option<&str>,
    ) -> Result<PathBuf, WorktreeError> {
        let path = self.path_for(conversation_id);
        if path.exists() {
            return Ok(path);
        }
        let reference = branch.unwrap_or(&self.default_branch).to_string();
        self.create(conversation_id, &path, &reference)?;
        Ok(path)
    }

    fn create(
        &self,
        conversation_id: &str,
        path: &Path,
        reference: &str,
    ) -> Result<(), WorktreeError> {
        fs::create_dir_all(&self.worktree_dir)?;
        match self.git.add_worktree_detached(&self.repo_dir, path, reference) {
            Ok(()) => {}
            Err(GitServiceError::GitCli(GitCliError::StaleWorktreeMetadata(msg))) => {
                tracing::warn!(
                    conversation = conversation_id,
                    %msg,
                    "stale worktree metadata, pruning and retrying"
                );
                self.git.prune_worktrees(&self.repo_dir)?;
                self.git
                    .add_worktree_detached(&self.repo_dir, path, reference)?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(
            conversation = conversation_id,
            path = %path.display(),
            %reference,
            "created workspace"
        );
        Ok(())
    }

    /// Force-remove the conversation's workspace if present. Returns whether
    /// a workspace was removed. Uncommitted agent edits never block
    /// reclamation; failures are logged and reported, not escalated.
    pub fn remove(&self, conversation_id: &str) -> bool {
        let path = self.path_for(conversation_id);
        self.remove_path(&path)
    }

    fn remove_path(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        if let Err(e) = self.git.remove_worktree(&self.repo_dir, path, true) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "git worktree remove failed, deleting directory"
            );
            if let Err(e) = fs::remove_dir_all(path) {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "failed to delete workspace directory"
                );
                return false;
            }
        }
        true
    }

    /// Tear down the conversation's workspace and rebuild it on `branch`.
    ///
    /// If the branch exists locally or on the configured remote the new
    /// workspace is checked out from it (detached); otherwise the workspace
    /// starts from the default branch and the branch is created inside it.
    pub fn switch_branch(
        &self,
        conversation_id: &str,
        branch: &str,
    ) -> Result<(PathBuf, SwitchOutcome), WorktreeError> {
        self.remove(conversation_id);
        let path = self.path_for(conversation_id);

        // Existence may change between this check and the checkout; that
        // window is accepted as best-effort.
        if self.git.branch_exists(&self.repo_dir, branch)? {
            self.create(conversation_id, &path, branch)?;
            Ok((
                path,
                SwitchOutcome::ReusedExisting {
                    branch: branch.to_string(),
                },
            ))
        } else if self
            .git
            .branch_exists_on_remote(&self.repo_dir, &self.git_remote, branch)?
        {
            let remote_ref = format!("{}/{}", self.git_remote, branch);
            self.create(conversation_id, &path, &remote_ref)?;
            Ok((
                path,
                SwitchOutcome::ReusedExisting {
                    branch: branch.to_string(),
                },
            ))
        } else {
            let default_branch = self.default_branch.clone();
            self.create(conversation_id, &path, &default_branch)?;
            self.git.create_branch_here(&path, branch)?;
            Ok((
                path,
                SwitchOutcome::CreatedFromDefault {
                    branch: branch.to_string(),
                    default_branch,
                },
            ))
        }
    }

    /// Remove workspaces whose conversation is no longer registered and
    /// whose last modification is older than `max_age_hours`. Registered
    /// conversations are never swept, whatever their age. Finishes with a
    /// metadata prune.
    pub fn sweep_stale(&self, max_age_hours: u64) -> Result<(), WorktreeError> {
        if !self.worktree_dir.exists() {
            return Ok(());
        }
        let live: HashSet<PathBuf> = self
            .registry
            .ids()
            .iter()
            .map(|id| self.path_for(id))
            .collect();
        let max_age = Duration::from_secs(max_age_hours * 3600);

        for entry in fs::read_dir(&self.worktree_dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable worktree entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() || live.contains(&path) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok());
            match age {
                Some(age) if age > max_age => {
                    tracing::info!(path = %path.display(), ?age, "sweeping stale workspace");
                    self.remove_path(&path);
                }
                _ => {}
            }
        }
        self.git.prune_worktrees(&self.repo_dir)?;
        Ok(())
    }

    /// Startup reconciliation: the registry does not survive restarts, so
    /// every workspace on disk is an orphan. Fatal only when the worktree
    /// root cannot be created; everything past that is best-effort.
    pub fn purge_all(&self) -> Result<(), WorktreeError> {
        fs::create_dir_all(&self.worktree_dir)?;
        let entries = match fs::read_dir(&self.worktree_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("could not enumerate worktree directory: {e}");
                return Ok(());
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.remove_path(&path);
            }
        }
        if let Err(e) = self.git.prune_worktrees(&self.repo_dir) {
            tracing::warn!("worktree prune failed during startup purge: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::TempDir;

    use super::*;

    fn init_test_repo_via_cli(dir: &Path) {
        Command::new("git")
            .args(["init", "-b", "main"])
            .current_dir(dir)
            .output()
            .expect("Failed to init repo");
        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(dir)
            .output()
            .expect("Failed to set email");
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir)
            .output()
            .expect("Failed to set name");
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", "Initial commit"])
            .current_dir(dir)
            .output()
            .expect("Failed to create initial commit");
    }

    fn manager(temp: &TempDir) -> (WorktreeManager, ConversationRegistry) {
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        init_test_repo_via_cli(&repo);
        let registry = ConversationRegistry::new();
        let manager = WorktreeManager::new(
            repo,
            temp.path().join("worktrees"),
            "main".to_string(),
            "origin".to_string(),
            GitService::new(),
            registry.clone(),
        );
        (manager, registry)
    }

    #[test]
    fn ensure_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let first = manager.ensure("1700000000.0001", None).unwrap();
        assert!(first.exists());

        // Leave a marker; a second ensure must not recreate the directory.
        fs::write(first.join("marker.txt"), "x").unwrap();
        let second = manager.ensure("1700000000.0001", None).unwrap();
        assert_eq!(first, second);
        assert!(second.join("marker.txt").exists());
    }

    #[test]
    fn distinct_conversations_get_distinct_paths() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let a = manager.ensure("a.b", None).unwrap();
        let b = manager.ensure("a-b", None).unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn workspaces_are_detached() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let path = manager.ensure("t1", None).unwrap();
        assert_eq!(GitService::new().current_branch(&path).unwrap(), "");
    }

    #[test]
    fn ensure_recovers_from_stale_metadata() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let path = manager.ensure("t1", None).unwrap();
        // Simulate an out-of-band deletion that leaves git's metadata behind.
        fs::remove_dir_all(&path).unwrap();

        let recreated = manager.ensure("t1", None).unwrap();
        assert_eq!(path, recreated);
        assert!(recreated.exists());
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        assert!(!manager.remove("t1"));
        let path = manager.ensure("t1", None).unwrap();
        fs::write(path.join("dirty.txt"), "uncommitted").unwrap();
        assert!(manager.remove("t1"));
        assert!(!path.exists());
    }

    #[test]
    fn switch_branch_creates_missing_branch_from_default() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let (path, outcome) = manager.switch_branch("t1", "feature-x").unwrap();
        assert_eq!(
            outcome,
            SwitchOutcome::CreatedFromDefault {
                branch: "feature-x".to_string(),
                default_branch: "main".to_string(),
            }
        );
        assert_eq!(GitService::new().current_branch(&path).unwrap(), "feature-x");

        // A subsequent ensure reuses the workspace as-is.
        let again = manager.ensure("t1", Some("feature-x")).unwrap();
        assert_eq!(again, path);
        assert_eq!(GitService::new().current_branch(&again).unwrap(), "feature-x");
    }

    #[test]
    fn switch_branch_reuses_existing_local_branch() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);
        Command::new("git")
            .args(["branch", "existing"])
            .current_dir(temp.path().join("repo"))
            .output()
            .unwrap();

        let (path, outcome) = manager.switch_branch("t1", "existing").unwrap();
        assert_eq!(
            outcome,
            SwitchOutcome::ReusedExisting {
                branch: "existing".to_string(),
            }
        );
        // Existing branches are checked out detached.
        assert_eq!(GitService::new().current_branch(&path).unwrap(), "");
    }

    #[test]
    fn switch_branch_tears_down_the_previous_workspace() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let before = manager.ensure("t1", None).unwrap();
        fs::write(before.join("stale.txt"), "old").unwrap();
        let (after, _) = manager.switch_branch("t1", "feature-y").unwrap();
        assert_eq!(before, after);
        assert!(!after.join("stale.txt").exists());
    }

    #[test]
    fn sweep_never_removes_registered_workspaces() {
        let temp = TempDir::new().unwrap();
        let (manager, registry) = manager(&temp);

        let path = manager.ensure("tracked", None).unwrap();
        registry.record_run("tracked", "sid-1".into(), "main".into(), path.clone());

        manager.sweep_stale(0).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn sweep_removes_unregistered_workspaces_past_the_threshold() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let path = manager.ensure("abandoned", None).unwrap();
        // Let the clock move past the zero-hour threshold.
        std::thread::sleep(Duration::from_millis(50));
        manager.sweep_stale(0).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn sweep_keeps_young_unregistered_workspaces() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        let path = manager.ensure("fresh", None).unwrap();
        manager.sweep_stale(1000).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn purge_all_clears_every_workspace() {
        let temp = TempDir::new().unwrap();
        let (manager, registry) = manager(&temp);

        let a = manager.ensure("a", None).unwrap();
        let b = manager.ensure("b", None).unwrap();
        registry.record_run("a", "sid".into(), "main".into(), a.clone());

        manager.purge_all().unwrap();
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn purge_all_creates_the_worktree_root() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);

        manager.purge_all().unwrap();
        assert!(temp.path().join("worktrees").exists());
    }
}
