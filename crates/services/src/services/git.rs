//! Domain-level git operations for the base checkout and its worktrees.

use std::path::Path;

use thiserror::Error;

mod cli;

pub use cli::{GitCli, GitCliError};

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error(transparent)]
    GitCli(#[from] GitCliError),
}

/// Service wrapping the git CLI for the operations the dispatcher needs.
#[derive(Clone, Default)]
pub struct GitService {}

impl GitService {
    pub fn new() -> Self {
        Self {}
    }

    /// Check a branch name against git's ref-format rules before any CLI
    /// invocation sees it.
    pub fn is_branch_name_valid(&self, name: &str) -> bool {
        git2::Branch::name_is_valid(name).unwrap_or(false)
    }

    /// Branch checked out at `path`, empty string for a detached HEAD.
    pub fn current_branch(&self, path: &Path) -> Result<String, GitServiceError> {
        Ok(GitCli::new().current_branch(path)?)
    }

    pub fn branch_exists(&self, repo_path: &Path, branch: &str) -> Result<bool, GitServiceError> {
        Ok(GitCli::new().ref_exists(repo_path, &format!("refs/heads/{branch}"))?)
    }

    pub fn branch_exists_on_remote(
        &self,
        repo_path: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<bool, GitServiceError> {
        Ok(GitCli::new().ref_exists(repo_path, &format!("refs/remotes/{remote}/{branch}"))?)
    }

    /// The `!update` operation: move the base checkout to `branch` and pull.
    /// Returns the pull output for the chat reply.
    pub fn checkout_and_pull(&self, repo_path: &Path, branch: &str) -> Result<String, GitServiceError> {
        let git = GitCli::new();
        git.checkout(repo_path, branch)?;
        let out = git.pull(repo_path)?;
        Ok(out.trim().to_string())
    }

    pub fn add_worktree_detached(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        git_ref: &str,
    ) -> Result<(), GitServiceError> {
        Ok(GitCli::new().worktree_add_detached(repo_path, worktree_path, git_ref)?)
    }

    pub fn remove_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        force: bool,
    ) -> Result<(), GitServiceError> {
        Ok(GitCli::new().worktree_remove(repo_path, worktree_path, force)?)
    }

    pub fn prune_worktrees(&self, repo_path: &Path) -> Result<(), GitServiceError> {
        Ok(GitCli::new().worktree_prune(repo_path)?)
    }

    /// Create `branch` at HEAD of the given worktree and check it out.
    pub fn create_branch_here(&self, worktree_path: &Path, branch: &str) -> Result<(), GitServiceError> {
        Ok(GitCli::new().checkout_new_branch(worktree_path, branch)?)
    }
}
