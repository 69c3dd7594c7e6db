//! Git test helper utilities
//!
//! Builds small repositories on disk so git sources can be installed from
//! `git+file://` locators without network access.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::fixtures::PackageFixture;
use crate::utils::get_git_command;

/// Git command runner for one test repository.
pub struct TestGit {
    repo_path: PathBuf,
}

impl TestGit {
    fn run_git_command(&self, args: &[&str], action: &str) -> Result<std::process::Output> {
        let output = Command::new(get_git_command())
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .with_context(|| action.to_string())?;

        if !output.status.success() {
            bail!("{} failed: {}", action, String::from_utf8_lossy(&output.stderr));
        }

        Ok(output)
    }

    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Create a repository at `dir` holding `fixture`, committed on `main`.
    pub fn package_repo(dir: &Path, fixture: &PackageFixture) -> Result<Self> {
        fixture.write_to(dir)?;
        let git = Self::new(dir);
        git.init()?;
        git.config_user()?;
        git.add_all()?;
        git.commit("Initial commit")?;
        Ok(git)
    }

    /// Initialize a repository whose first branch is `main`.
    pub fn init(&self) -> Result<()> {
        self.run_git_command(&["init", "-q"], "Failed to initialize git repository")?;
        self.run_git_command(&["symbolic-ref", "HEAD", "refs/heads/main"], "Failed to name the main branch")?;
        Ok(())
    }

    pub fn config_user(&self) -> Result<()> {
        self.run_git_command(&["config", "user.email", "test@trellis.example"], "Failed to configure git user email")?;
        self.run_git_command(&["config", "user.name", "Test User"], "Failed to configure git user name")?;
        Ok(())
    }

    pub fn add_all(&self) -> Result<()> {
        self.run_git_command(&["add", "."], "Failed to add files to git")?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        self.run_git_command(&["commit", "-q", "-m", message], "Failed to create git commit")?;
        Ok(())
    }

    pub fn tag(&self, tag_name: &str) -> Result<()> {
        self.run_git_command(&["tag", tag_name], &format!("Failed to create tag: {tag_name}"))?;
        Ok(())
    }

    /// `git+file://` locator for this repository at `reference`.
    pub fn locator(&self, reference: &str) -> String {
        format!("git+file://{}#{}", self.repo_path.display(), reference)
    }
}
