//! Every git interaction goes through the `git` CLI as a subprocess.
//!
//! The dispatcher treats git as a black box: each operation is `git -C <dir>
//! <args...>` with captured output, and a nonzero exit becomes an error
//! carrying the tool's own text so it can be surfaced to the user verbatim.
//! Centralizing the invocations here keeps command choices and error
//! classification in one place.

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::{Command, Stdio},
};

use thiserror::Error;
use utils::shell::resolve_executable_path;

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("git executable not found or not runnable")]
    NotAvailable,
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("branch or reference not found: {0}")]
    InvalidReference(String),
    #[error("stale worktree metadata: {0}")]
    StaleWorktreeMetadata(String),
}

#[derive(Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self {}
    }

    /// Run `git -C <repo> worktree add --detach <path> <ref>`.
    ///
    /// Detached checkout is what lets any number of worktrees share one
    /// branch without tripping git's "already checked out" refusal, including
    /// the branch checked out in the base repository itself.
    pub fn worktree_add_detached(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        git_ref: &str,
    ) -> Result<(), GitCliError> {
        let args: Vec<OsString> = vec![
            "worktree".into(),
            "add".into(),
            "--detach".into(),
            worktree_path.as_os_str().into(),
            OsString::from(git_ref),
        ];
        self.git(repo_path, args).map(|_| ())
    }

    /// Run `git -C <repo> worktree remove [--force] <path>`.
    pub fn worktree_remove(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        force: bool,
    ) -> Result<(), GitCliError> {
        let mut args: Vec<OsString> = vec!["worktree".into(), "remove".into()];
        if force {
            args.push("--force".into());
        }
        args.push(worktree_path.as_os_str().into());
        self.git(repo_path, args).map(|_| ())
    }

    /// Drop metadata for worktrees whose directories no longer exist.
    pub fn worktree_prune(&self, repo_path: &Path) -> Result<(), GitCliError> {
        self.git(repo_path, ["worktree", "prune"]).map(|_| ())
    }

    /// Name of the branch checked out at `path`, empty for a detached HEAD.
    pub fn current_branch(&self, path: &Path) -> Result<String, GitCliError> {
        let out = self.git(path, ["branch", "--show-current"])?;
        Ok(out.trim().to_string())
    }

    pub fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitCliError> {
        self.git(path, ["checkout", branch]).map(|_| ())
    }

    /// Create `branch` at HEAD and check it out (`checkout -b`).
    pub fn checkout_new_branch(&self, path: &Path, branch: &str) -> Result<(), GitCliError> {
        self.git(path, ["checkout", "-b", branch]).map(|_| ())
    }

    /// Pull the currently checked-out branch, returning the combined output.
    pub fn pull(&self, path: &Path) -> Result<String, GitCliError> {
        let envs = vec![(OsString::from("GIT_TERMINAL_PROMPT"), OsString::from("0"))];
        self.git_with_env(path, ["pull"], &envs)
    }

    /// Return true if `git rev-parse --verify <ref>` resolves.
    pub fn ref_exists(&self, repo_path: &Path, git_ref: &str) -> Result<bool, GitCliError> {
        match self.git(repo_path, ["rev-parse", "--verify", git_ref]) {
            Ok(_) => Ok(true),
            Err(GitCliError::CommandFailed(_)) | Err(GitCliError::InvalidReference(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// Private methods
impl GitCli {
    /// Ensure `git` is available on PATH.
    fn ensure_available(&self) -> Result<(), GitCliError> {
        let git = resolve_executable_path("git").ok_or(GitCliError::NotAvailable)?;
        let out = Command::new(&git)
            .arg("--version")
            .output()
            .map_err(|_| GitCliError::NotAvailable)?;
        if out.status.success() {
            Ok(())
        } else {
            Err(GitCliError::NotAvailable)
        }
    }

    fn classify_failure(combined: String) -> GitCliError {
        // `worktree add` against a path whose directory was deleted out from
        // under git reports the path as "already registered"; callers prune
        // and retry once on this variant.
        if combined.contains("already registered") {
            return GitCliError::StaleWorktreeMetadata(combined);
        }
        if combined.contains("invalid reference:")
            || combined.contains("not a valid ref")
            || combined.contains("unknown revision")
        {
            return GitCliError::InvalidReference(combined);
        }
        GitCliError::CommandFailed(combined)
    }

    /// Run `git -C <repo_path> <args...>` and return stdout on success.
    ///
    /// Arguments are `OsStr` so non-UTF-8 paths survive; call sites can still
    /// pass `&str` literals. Prefer the named helpers above so the command
    /// vocabulary stays in one place.
    pub fn git<I, S>(&self, repo_path: &Path, args: I) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.git_impl(repo_path, args, None)
    }

    fn git_with_env<I, S>(
        &self,
        repo_path: &Path,
        args: I,
        envs: &[(OsString, OsString)],
    ) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.git_impl(repo_path, args, Some(envs))
    }

    fn git_impl<I, S>(
        &self,
        repo_path: &Path,
        args: I,
        envs: Option<&[(OsString, OsString)]>,
    ) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.ensure_available()?;
        let git = resolve_executable_path("git").ok_or(GitCliError::NotAvailable)?;
        let mut cmd = Command::new(&git);
        cmd.arg("-C").arg(repo_path);
        for a in args {
            cmd.arg(a);
        }
        if let Some(envs) = envs {
            for (k, v) in envs {
                cmd.env(k, v);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::trace!(repo = ?repo_path, "running git command: {:?}", cmd);

        let out = cmd
            .output()
            .map_err(|e| GitCliError::CommandFailed(e.to_string()))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let combined = match (stderr.is_empty(), stdout.is_empty()) {
                (true, true) => "Command failed with no output".to_string(),
                (false, true) => stderr,
                (true, false) => stdout,
                (false, false) => format!("{stderr}\n{stdout}"),
            };
            return Err(Self::classify_failure(combined));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}
