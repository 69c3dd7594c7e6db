//! Cache records (`<cacheRoot>/pcfg/<hash>.json`).
//!
//! A record is written after a download has been promoted. It stores the manifest the
//! resolver should use (with any override applied) and the newest file mtime of the
//! promoted directory, which full verification compares against.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::package::PackageConfig;
use crate::utils::fs::atomic_write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Manifest after the override was applied
    pub config: PackageConfig,
    /// Override delta actually applied, if any
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_delta: Option<Value>,
    pub hash: String,
    /// Newest file modification time in nanoseconds since the epoch
    pub mtime: u64,
}

impl CacheRecord {
    /// `<cache_root>/pcfg/<hash>.json`
    #[must_use]
    pub fn path(cache_root: &Path, hash: &str) -> PathBuf {
        cache_root.join("pcfg").join(format!("{hash}.json"))
    }

    /// Read the record for `hash`. Missing or unreadable records are treated as absent.
    pub async fn load(cache_root: &Path, hash: &str) -> Option<Self> {
        let path = Self::path(cache_root, hash);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(target: "cache", "Ignoring corrupt cache record {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, cache_root: &Path) -> Result<()> {
        let path = Self::path(cache_root, &self.hash);
        let content = serde_json::to_vec_pretty(self).context("Failed to serialize cache record")?;
        atomic_write(&path, &content)
    }

    pub async fn remove(cache_root: &Path, hash: &str) -> Result<()> {
        let path = Self::path(cache_root, hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Newest modification time of any file below `dir`, in nanoseconds since the epoch.
///
/// Directories are skipped: their mtimes change whenever an entry is added, which says
/// nothing about file contents. Symlinks are not followed.
pub fn newest_mtime(dir: &Path) -> Result<u64> {
    let mut newest = 0u64;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?
            .modified()?;
        let nanos = modified.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        newest = newest.max(u64::try_from(nanos).unwrap_or(u64::MAX));
    }
    Ok(newest)
}
