//! Project-level file locking for cross-process coordination.
//!
//! Every top-level installer call holds `{project}/.trellis/.locks/install.lock` for its
//! whole duration, so two processes working on one project serialize instead of
//! racing on the install tree. The lock is released when the guard drops.
//!
//! File operations run in `spawn_blocking` so waiting on the lock never blocks a
//! runtime worker thread.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS, default_lock_timeout};
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

/// An exclusive, OS-level file lock on a project.
#[derive(Debug)]
pub struct ProjectLock {
    /// The lock is held as long as this handle is open
    file: Arc<File>,
    lock_name: String,
    lock_path: PathBuf,
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        // The file stays in place: unlinking it would let a waiter lock a stale inode
        if let Err(e) = FileExt::unlock(self.file.as_ref()) {
            debug!(lock_name = %self.lock_name, error = %e, "Failed to unlock project lock");
        }
        debug!(lock_name = %self.lock_name, path = %self.lock_path.display(), "Project lock released");
    }
}

impl ProjectLock {
    /// Acquire `lock_name` with the default timeout.
    pub async fn acquire(project_dir: &Path, lock_name: &str) -> Result<Self> {
        Self::acquire_with_timeout(project_dir, lock_name, default_lock_timeout()).await
    }

    /// Acquire `lock_name`, polling with exponential backoff (10ms up to 500ms) until
    /// `timeout` elapses.
    pub async fn acquire_with_timeout(project_dir: &Path, lock_name: &str, timeout: Duration) -> Result<Self> {
        let display_name = format!("project:{lock_name}");
        debug!(lock_name = %display_name, "Waiting for project lock");

        let locks_dir = project_dir.join(".trellis").join(".locks");
        tokio::fs::create_dir_all(&locks_dir)
            .await
            .with_context(|| format!("Failed to create project locks directory: {}", locks_dir.display()))?;
        let lock_path = locks_dir.join(format!("{lock_name}.lock"));

        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let file = Arc::new(file);

        let start = std::time::Instant::now();
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(STARTING_BACKOFF_DELAY_MS / 2)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let attempt = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || attempt.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            if let Ok(true) = locked {
                debug!(lock_name = %display_name, wait_ms = start.elapsed().as_millis(), "Project lock acquired");
                return Ok(Self {
                    file,
                    lock_name: display_name,
                    lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(anyhow::anyhow!(
            "Timed out after {:?} waiting for project lock '{}' ({}). Is another install running?",
            timeout,
            lock_name,
            lock_path.display()
        ))
    }
}
