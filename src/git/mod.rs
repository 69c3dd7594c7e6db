//! Git operations wrapper
//!
//! Git-family sources (`git+https://`, `git+ssh://`, `git+file://`, `git://`) are
//! materialized by shelling out to the system `git` binary through
//! [`command_builder::GitCommand`]. Using the CLI keeps SSH agents, credential helpers
//! and user git configuration working without extra setup.
//!
//! Checked-out packages are live working copies. Before the cleaner deletes one it asks
//! [`GitRepo::has_local_changes`] so uncommitted work is never thrown away.

pub mod command_builder;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use command_builder::GitCommand;

/// Handle to a local git working copy.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Wrap an existing directory. No validation is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Clone `url` into `target` and check out `reference` when given.
    ///
    /// Both steps share the same timeout; git is killed if it runs over.
    pub async fn clone_at(
        url: &str,
        reference: Option<&str>,
        target: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<Self> {
        let target = target.as_ref();
        GitCommand::clone(url, target)
            .with_timeout(Some(timeout))
            .with_context(url)
            .execute_success()
            .await?;

        let repo = Self::new(target);
        if let Some(reference) = reference {
            repo.checkout(reference, timeout).await?;
        }
        Ok(repo)
    }

    /// Check out a branch, tag or commit.
    pub async fn checkout(&self, reference: &str, timeout: Duration) -> Result<()> {
        GitCommand::checkout(reference)
            .current_dir(&self.path)
            .with_timeout(Some(timeout))
            .execute_success()
            .await
    }

    /// True when the working copy has modified, staged or untracked files.
    pub async fn has_local_changes(&self) -> Result<bool> {
        let status = GitCommand::status_porcelain().current_dir(&self.path).execute_stdout().await?;
        Ok(!status.is_empty())
    }

    /// Whether the path looks like a git working copy.
    #[must_use]
    pub fn is_git_repo(&self) -> bool {
        is_valid_git_repo(&self.path)
    }

    /// Path of the working copy.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A directory is a working copy when it contains a `.git` entry (directory, or file
/// for worktrees and submodules).
#[must_use]
pub fn is_valid_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Remove `user:password@` from http(s) URLs before they reach logs or errors.
#[must_use]
pub fn strip_auth_from_url(url: &str) -> String {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            let host_end = rest.find('/').unwrap_or(rest.len());
            if let Some(at) = rest[..host_end].rfind('@') {
                return format!("{scheme}{}", &rest[at + 1..]);
            }
        }
    }
    url.to_string()
}
