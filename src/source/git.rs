//! Git-family sources.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::git::{GitRepo, strip_auth_from_url};

/// Clone `remote` into `out_dir` and check out `reference`.
///
/// Not-found and authentication failures surface as their dedicated error variants;
/// the git process is killed when `timeout` elapses.
pub async fn download(remote: &str, reference: Option<&str>, out_dir: &Path, timeout: Duration) -> Result<()> {
    let display_url = strip_auth_from_url(remote);
    tracing::info!(
        target: "source",
        "Cloning {}{}",
        display_url,
        reference.map(|r| format!(" at {r}")).unwrap_or_default()
    );
    GitRepo::clone_at(remote, reference, out_dir, timeout)
        .await
        .with_context(|| format!("Failed to fetch git source {display_url}"))?;
    Ok(())
}
