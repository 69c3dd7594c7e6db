//! Content-addressed package cache with verification
//!
//! Every downloaded source is materialized once into the global cache, keyed by a hash
//! of its locator (plus the override applied to it). Project install trees link into
//! the cache, so any number of projects share one copy.
//!
//! # Cache Directory Structure
//!
//! ```text
//! ~/.trellis/cache/
//! ├── packages/<hash>/                    # Promoted package directories
//! ├── pcfg/<hash>.json                    # Cache records (manifest, override, mtime)
//! ├── registry_cache/<registry>/<name>.json   # Registry lookup records
//! └── tmp/<uuid>/                         # In-progress downloads
//! ```
//!
//! # Verification
//!
//! A cached entry is classified on a small lattice:
//!
//! `NotInstalled < Invalid < HashValid < VerifiedValid`
//!
//! A record plus its directory is `HashValid`. Under full verification the newest
//! file mtime below the directory must also equal the recorded one (`VerifiedValid`),
//! otherwise the entry is `Invalid`. Only `Invalid` entries are cleared before the
//! redownload; a missing entry is simply fetched.
//!
//! # Concurrency
//!
//! Downloads are serialized per hash through [`KeyedLocks`] and re-checked after the
//! lock is taken, so two tasks asking for the same source download it once. The
//! number of concurrent downloads is bounded by a semaphore. Downloads land in
//! `tmp/<uuid>` and are renamed into `packages/<hash>` only after they were verified,
//! so a failed download never leaves a promoted directory behind.

pub mod lock;
pub mod record;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::constants::{GIT_CLONE_TIMEOUT, TARBALL_DOWNLOAD_TIMEOUT};
use crate::core::TrellisError;
use crate::fetch::FetchClient;
use crate::package::{PackageConfig, override_package_config};
use crate::source::{SourceLocator, file};
use crate::utils::fs::{ensure_dir, remove_dir_all};

pub use lock::KeyedLocks;
pub use record::{CacheRecord, newest_mtime};

/// Verification state of a cached package, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verification {
    /// No record or no directory
    NotInstalled,
    /// Present but modified since promotion
    Invalid,
    /// Record and directory present
    HashValid,
    /// Present and the newest file mtime matches the record
    VerifiedValid,
}

/// Options for [`GlobalCache::ensure_global_install`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Redownload even when a valid entry exists
    pub force: bool,
    /// Walk the directory and compare mtimes instead of trusting the record
    pub full_verification: bool,
}

/// Result of [`GlobalCache::ensure_global_install`].
#[derive(Debug, Clone)]
pub struct GlobalInstall {
    /// Manifest with the override applied
    pub config: PackageConfig,
    /// Override delta that actually changed the manifest
    pub override_delta: Option<Value>,
    pub hash: String,
    /// True only when this call performed a fresh download
    pub changed: bool,
    /// Directory holding the package files
    pub path: PathBuf,
}

/// Hook run on a freshly downloaded package before it is promoted.
///
/// The cache only provides the seam; nothing is built by default.
#[async_trait]
pub trait BuildHook: Send + Sync {
    async fn build(&self, dir: &Path, config: &PackageConfig) -> Result<()>;
}

/// Cache key for a source and an optional override.
///
/// `sha256(source)` alone, or `sha256(source)-md5(override)` when an override is
/// applied, so the same source with different overrides materializes separately.
#[must_use]
pub fn source_hash(source: &SourceLocator, override_value: Option<&Value>) -> String {
    let base = hex::encode(Sha256::digest(source.to_string().as_bytes()));
    match override_value {
        // serde_json maps are sorted, so the serialization is canonical
        Some(value) => format!("{base}-{:x}", md5::compute(value.to_string().as_bytes())),
        None => base,
    }
}

/// The global package cache.
pub struct GlobalCache {
    root: PathBuf,
    fetch: Arc<FetchClient>,
    locks: KeyedLocks,
    downloads: Semaphore,
    build_hook: Option<Arc<dyn BuildHook>>,
}

impl std::fmt::Debug for GlobalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalCache")
            .field("root", &self.root)
            .field("available_downloads", &self.downloads.available_permits())
            .finish_non_exhaustive()
    }
}

impl GlobalCache {
    /// Create a cache rooted at `root` allowing `max_parallel` concurrent downloads.
    pub fn new(root: impl Into<PathBuf>, fetch: Arc<FetchClient>, max_parallel: usize) -> Self {
        Self {
            root: root.into(),
            fetch,
            locks: KeyedLocks::new(),
            downloads: Semaphore::new(max_parallel.max(1)),
            build_hook: None,
        }
    }

    /// Install a hook that runs on every fresh download before promotion.
    #[must_use]
    pub fn with_build_hook(mut self, hook: Arc<dyn BuildHook>) -> Self {
        self.build_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn fetch_client(&self) -> &Arc<FetchClient> {
        &self.fetch
    }

    /// `<root>/packages/<hash>`
    #[must_use]
    pub fn package_dir(&self, hash: &str) -> PathBuf {
        self.root.join("packages").join(hash)
    }

    /// Classify the cache entry for `hash`.
    pub async fn verify(&self, hash: &str, full: bool) -> Result<(Verification, Option<CacheRecord>)> {
        let Some(record) = CacheRecord::load(&self.root, hash).await else {
            return Ok((Verification::NotInstalled, None));
        };
        let dir = self.package_dir(hash);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok((Verification::NotInstalled, None));
        }
        if !full {
            return Ok((Verification::HashValid, Some(record)));
        }

        let walk_dir = dir.clone();
        let mtime = tokio::task::spawn_blocking(move || newest_mtime(&walk_dir))
            .await
            .context("mtime walk panicked")??;
        if mtime == record.mtime {
            Ok((Verification::VerifiedValid, Some(record)))
        } else {
            tracing::debug!(
                target: "cache",
                "Cache entry {} modified since promotion (recorded {}, found {})",
                hash,
                record.mtime,
                mtime
            );
            Ok((Verification::Invalid, Some(record)))
        }
    }

    /// Make sure `source` is materialized in the cache and return where it lives.
    ///
    /// `file:` sources are used in place: no record, no copy, `changed` is always
    /// false. Overrides given for checkout sources (git, `file:`) are ignored with a
    /// warning.
    pub async fn ensure_global_install(
        &self,
        source: &SourceLocator,
        override_value: Option<&Value>,
        options: CacheOptions,
    ) -> Result<GlobalInstall> {
        let override_value = match override_value {
            Some(_) if source.is_checkout() => {
                tracing::warn!(target: "cache", "Ignoring override for checkout source {}", source);
                None
            }
            other => other,
        };

        if let SourceLocator::File {
            path,
        } = source
        {
            let dir = file::resolve_dir(path)?;
            let read_dir = dir.clone();
            let config = tokio::task::spawn_blocking(move || PackageConfig::read_from_dir(&read_dir))
                .await
                .context("manifest read panicked")??;
            return Ok(GlobalInstall {
                config,
                override_delta: None,
                hash: source.hash(),
                changed: false,
                path: dir,
            });
        }

        let hash = source_hash(source, override_value);
        let wanted = if options.full_verification {
            Verification::VerifiedValid
        } else {
            Verification::HashValid
        };

        if !options.force {
            if let (state, Some(record)) = self.verify(&hash, options.full_verification).await? {
                if state >= wanted {
                    tracing::trace!(target: "cache", "Cache hit for {} ({:?})", source, state);
                    return Ok(self.from_record(record));
                }
            }
        }

        let _guard = self.locks.acquire(&hash).await;

        // Someone else may have finished the download while we waited
        let (state, record) = self.verify(&hash, options.full_verification).await?;
        if !options.force && state >= wanted {
            if let Some(record) = record {
                return Ok(self.from_record(record));
            }
        }
        if state == Verification::Invalid {
            tracing::info!(target: "cache", "Cached copy of {} is invalid, redownloading", source);
            self.evict(&hash).await?;
        }

        self.download_and_promote(source, override_value, &hash).await
    }

    fn from_record(&self, record: CacheRecord) -> GlobalInstall {
        GlobalInstall {
            path: self.package_dir(&record.hash),
            config: record.config,
            override_delta: record.override_delta,
            hash: record.hash,
            changed: false,
        }
    }

    /// Remove the record and directory for `hash`.
    pub async fn evict(&self, hash: &str) -> Result<()> {
        CacheRecord::remove(&self.root, hash).await?;
        let dir = self.package_dir(hash);
        tokio::task::spawn_blocking(move || remove_dir_all(&dir)).await.context("cache eviction panicked")?
    }

    async fn download_and_promote(
        &self,
        source: &SourceLocator,
        override_value: Option<&Value>,
        hash: &str,
    ) -> Result<GlobalInstall> {
        let tmp_root = self.root.join("tmp");
        ensure_dir(&tmp_root)?;
        let tmp_dir = tmp_root.join(uuid::Uuid::new_v4().to_string());

        let timeout = if source.is_checkout() {
            GIT_CLONE_TIMEOUT
        } else {
            TARBALL_DOWNLOAD_TIMEOUT
        };

        let promoted = self.download_into(source, override_value, hash, &tmp_dir, timeout).await;
        if promoted.is_err() {
            let cleanup = tmp_dir.clone();
            let _ = tokio::task::spawn_blocking(move || remove_dir_all(&cleanup)).await;
        }
        promoted
    }

    async fn download_into(
        &self,
        source: &SourceLocator,
        override_value: Option<&Value>,
        hash: &str,
        tmp_dir: &Path,
        timeout: Duration,
    ) -> Result<GlobalInstall> {
        {
            let _permit = self
                .downloads
                .acquire()
                .await
                .map_err(|_| TrellisError::internal("download semaphore closed"))?;
            tracing::info!(target: "cache", "Downloading {}", source);
            source.download(tmp_dir, &self.fetch, timeout).await?;
        }

        let read_dir = tmp_dir.to_path_buf();
        let base = tokio::task::spawn_blocking(move || PackageConfig::read_from_dir(&read_dir))
            .await
            .context("manifest read panicked")??;
        let (config, override_delta) = match override_value {
            Some(value) => override_package_config(&base, value)?,
            None => (base, None),
        };

        if let Some(hook) = &self.build_hook {
            hook.build(tmp_dir, &config).await.with_context(|| format!("Build hook failed for {source}"))?;
        }

        let final_dir = self.package_dir(hash);
        let root = self.root.clone();
        let tmp = tmp_dir.to_path_buf();
        let record_hash = hash.to_string();
        let record_config = config.clone();
        let record_override = override_delta.clone();
        let dest = final_dir.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = dest.parent() {
                ensure_dir(parent)?;
            }
            // Clear-then-rename: a stale or concurrently written directory loses
            remove_dir_all(&dest)?;
            std::fs::rename(&tmp, &dest)
                .with_context(|| format!("Failed to promote {} to {}", tmp.display(), dest.display()))?;
            let mtime = newest_mtime(&dest)?;
            CacheRecord {
                config: record_config,
                override_delta: record_override,
                hash: record_hash,
                mtime,
            }
            .save(&root)
        })
        .await
        .context("cache promotion panicked")??;

        tracing::debug!(target: "cache", "Promoted {} into {}", source, final_dir.display());
        Ok(GlobalInstall {
            config,
            override_delta,
            hash: hash.to_string(),
            changed: true,
            path: final_dir,
        })
    }
}
