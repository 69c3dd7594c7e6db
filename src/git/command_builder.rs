//! Type-safe Git command builder for consistent command execution
//!
//! Every git subprocess the source layer spawns goes through [`GitCommand`], so
//! timeouts, logging and error classification behave the same for clone, checkout
//! and status calls.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::TrellisError;
use crate::utils::platform::get_git_command;

/// Builder for a single git invocation.
///
/// New commands capture output, disable terminal credential prompts and time out
/// after five minutes. On timeout the child process is killed.
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::git::command_builder::GitCommand;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let output = GitCommand::new()
///     .args(["status", "--porcelain"])
///     .current_dir("/path/to/repo")
///     .with_timeout(Some(Duration::from_secs(10)))
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
pub struct GitCommand {
    /// Command arguments to pass to Git (e.g., ["clone", "url", "path"])
    args: Vec<String>,

    /// Working directory, passed to git as `-C <dir>`
    current_dir: Option<PathBuf>,

    /// Environment variables to set for the Git process
    env_vars: Vec<(String, String)>,

    /// Maximum duration to wait for command completion (None = no timeout)
    timeout_duration: Option<Duration>,

    /// Optional context string for log messages
    context: Option<String>,

    /// Remote URL for clone commands, used in error messages
    remote_url: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            timeout_duration: Some(Duration::from_secs(300)),
            context: None,
            remote_url: None,
        }
    }
}

impl GitCommand {
    /// Creates a new Git command builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run git in `dir` (via `-C`).
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Adds a single argument to the Git command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to the Git command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for the Git process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set a custom timeout for the command (None for no timeout)
    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Set a context for logging (e.g., the package being fetched)
    ///
    /// Concurrent installs interleave their git output; the context prefixes every
    /// log line so they can be told apart.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn log_prefix(&self) -> String {
        self.context.as_ref().map(|ctx| format!("({ctx}) ")).unwrap_or_default()
    }

    /// The git subcommand, skipping the `-C <dir>` prefix.
    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    /// Execute the command and return the output
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let git_command = get_git_command();
        let mut cmd = Command::new(git_command);

        let mut full_args = Vec::new();
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());
        cmd.args(&full_args);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the output future on timeout kills the child
        cmd.kill_on_drop(true);

        let prefix = self.log_prefix();
        tracing::debug!(
            target: "git",
            "{}Executing command: {} {}",
            prefix,
            git_command,
            full_args.join(" ")
        );

        let output_future = cmd.output();
        let result = match self.timeout_duration {
            Some(duration) => match timeout(duration, output_future).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        target: "git",
                        "{}Command timed out after {} seconds: git {}",
                        prefix,
                        duration.as_secs(),
                        full_args.join(" ")
                    );
                    return Err(TrellisError::GitCommandError {
                        operation: self.operation(),
                        stderr: format!(
                            "Git command timed out after {} seconds and was killed",
                            duration.as_secs()
                        ),
                    }
                    .into());
                }
            },
            None => output_future.await,
        };

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrellisError::GitNotFound.into());
            }
            Err(e) => {
                return Err(e).context(format!("Failed to execute git {}", full_args.join(" ")));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "git",
                "{}Command failed with exit code {:?}: {}",
                prefix,
                output.status.code(),
                stderr.trim()
            );
            return Err(self.classify_failure(&stderr, &stdout).into());
        }

        if !stdout.is_empty() {
            tracing::trace!(target: "git", "{}{}", prefix, stdout.trim());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(
                target: "git::perf",
                "{}Git {} took {:.2}s",
                prefix,
                self.operation(),
                elapsed.as_secs_f64()
            );
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Map git's stderr onto the error taxonomy.
    fn classify_failure(&self, stderr: &str, stdout: &str) -> TrellisError {
        let lower = stderr.to_lowercase();
        let url = self.remote_url.clone().unwrap_or_else(|| {
            self.current_dir.as_ref().map(|d| d.display().to_string()).unwrap_or_default()
        });

        let auth_markers = [
            "authentication failed",
            "could not read username",
            "terminal prompts disabled",
            "permission denied (publickey)",
            "403",
        ];
        let not_found_markers = [
            "not found",
            "does not exist",
            "does not appear to be a git repository",
            "did not match any",
            "couldn't find remote ref",
            "unknown revision",
            "invalid reference",
        ];

        if auth_markers.iter().any(|m| lower.contains(m)) {
            TrellisError::GitAuthenticationFailed {
                url,
            }
        } else if not_found_markers.iter().any(|m| lower.contains(m)) {
            TrellisError::GitNotFoundRemote {
                url,
            }
        } else {
            TrellisError::GitCommandError {
                operation: self.operation(),
                stderr: if stderr.is_empty() {
                    stdout.to_string()
                } else {
                    stderr.to_string()
                },
            }
        }
    }

    /// Execute the command and return only stdout as a trimmed string
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Execute the command and discard its output
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

/// Output from a Git command
pub struct GitCommandOutput {
    /// Standard output from the Git command
    pub stdout: String,
    /// Standard error output from the Git command
    pub stderr: String,
}

// Convenience builders for the operations the source layer needs

impl GitCommand {
    /// Create a clone command
    pub fn clone(url: &str, target: impl AsRef<Path>) -> Self {
        let mut cmd = Self::new().args(["clone", "--quiet", "--recurse-submodules"]);
        cmd.args.push(url.to_string());
        cmd.args.push(target.as_ref().display().to_string());
        cmd.remote_url = Some(url.to_string());
        cmd
    }

    /// Create a checkout command
    pub fn checkout(ref_name: &str) -> Self {
        Self::new().args(["checkout", "--quiet", ref_name])
    }

    /// List modified and untracked files in machine-readable form
    pub fn status_porcelain() -> Self {
        Self::new().args(["status", "--porcelain"])
    }

    /// Create an init command
    pub fn init() -> Self {
        Self::new().arg("init")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_basic() {
        let cmd = GitCommand::new().arg("status").arg("--short");
        assert_eq!(cmd.args, vec!["status", "--short"]);
        assert_eq!(cmd.operation(), "status");
    }

    #[test]
    fn test_clone_builder_records_url() {
        let cmd = GitCommand::clone("https://example.com/repo.git", "/tmp/target");
        assert_eq!(cmd.args[0], "clone");
        assert_eq!(cmd.remote_url.as_deref(), Some("https://example.com/repo.git"));
        assert!(cmd.args.contains(&"/tmp/target".to_string()));
    }

    #[test]
    fn test_classify_failure() {
        let cmd = GitCommand::clone("https://example.com/missing.git", "/tmp/x");
        let err = cmd.classify_failure("remote: Repository not found.\nfatal: repository not found", "");
        assert!(matches!(err, TrellisError::GitNotFoundRemote { .. }));

        let cmd = GitCommand::clone("https://example.com/private.git", "/tmp/x");
        let err = cmd.classify_failure(
            "fatal: could not read Username for 'https://example.com': terminal prompts disabled",
            "",
        );
        assert!(matches!(err, TrellisError::GitAuthenticationFailed { .. }));

        let cmd = GitCommand::checkout("main");
        let err = cmd.classify_failure("error: something else broke", "");
        assert!(matches!(err, TrellisError::GitCommandError { ref operation, .. } if operation == "checkout"));
    }

    #[tokio::test]
    async fn test_git_version_executes() {
        let output = GitCommand::new().arg("--version").execute().await.unwrap();
        assert!(output.stdout.starts_with("git version"));
    }
}
