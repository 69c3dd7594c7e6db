//! Placing resolved packages into the project.
//!
//! A resolved package is first made available in the global cache, then linked into
//! `trellis_packages/<registry>/<name>@<version>`. Within one pass each package is
//! materialized at most once: the first request claims an [`InFlight`] slot and later
//! requests for the same package wait for its result.
//!
//! A package directory that is a real directory instead of a link is a checkout the
//! user may have edited. It is never replaced by a link; when a different source
//! claims the same name and version, the directory is moved aside (orphaned) under
//! `trellis_packages/.orphaned/` instead of being deleted.

use anyhow::{Context, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::future::Future;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::cache::{CacheOptions, GlobalCache, GlobalInstall};
use crate::constants::ORPHANED_DIR;
use crate::package::{ExactPackage, PackageConfig};
use crate::source::SourceLocator;
use crate::utils::fs::{ensure_parent_dir, is_link, link_dir, remove_path};

/// A package placed into the project.
#[derive(Debug, Clone)]
pub struct Materialized {
    pub exact: ExactPackage,
    /// Manifest with any override applied
    pub config: PackageConfig,
    /// Location under the packages directory
    pub path: PathBuf,
    /// True when the cache had to download the package
    pub downloaded: bool,
}

enum Slot<V> {
    /// Someone is producing the value. Waiters are woken when it is done.
    Pending(Arc<Notify>),
    Ready(Arc<V>),
}

/// Single-flight map: each key is produced once, concurrent requests share the result.
///
/// A failed production clears the slot and wakes the waiters, which then try again
/// themselves.
pub struct InFlight<K, V> {
    slots: DashMap<K, Slot<V>>,
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The finished value for `key`, if any.
    #[must_use]
    pub fn ready(&self, key: &K) -> Option<Arc<V>> {
        match self.slots.get(key).as_deref() {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the value for `key`, running `produce` if nobody has produced it yet.
    pub async fn get_or_run<F, Fut>(&self, key: &K, produce: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let notify = loop {
            let waiting = match self.slots.entry(key.clone()) {
                Entry::Occupied(entry) => match entry.get() {
                    Slot::Ready(value) => return Ok(value.clone()),
                    Slot::Pending(notify) => notify.clone(),
                },
                Entry::Vacant(entry) => {
                    let notify = Arc::new(Notify::new());
                    entry.insert(Slot::Pending(notify.clone()));
                    break notify;
                }
            };

            // Register before re-checking so a completion in between is not missed
            let notified = waiting.notified();
            let still_pending = matches!(
                self.slots.get(key).as_deref(),
                Some(Slot::Pending(current)) if Arc::ptr_eq(current, &waiting)
            );
            if still_pending {
                notified.await;
            }
        };

        match produce().await {
            Ok(value) => {
                let value = Arc::new(value);
                self.slots.insert(key.clone(), Slot::Ready(value.clone()));
                notify.notify_waiters();
                Ok(value)
            }
            Err(e) => {
                self.slots.remove(key);
                notify.notify_waiters();
                Err(e)
            }
        }
    }
}

/// Make `source` available in the cache and link it into the project as `exact`.
pub async fn materialize(
    cache: &GlobalCache,
    packages_dir: &Path,
    exact: &ExactPackage,
    source: &SourceLocator,
    override_value: Option<&Value>,
    options: CacheOptions,
) -> Result<Materialized> {
    let install = cache
        .ensure_global_install(source, override_value, options)
        .await
        .with_context(|| format!("Failed to fetch {exact} from {source}"))?;
    place(packages_dir, exact, install).await
}

/// Link an already cached package into the project as `exact`.
pub async fn place(packages_dir: &Path, exact: &ExactPackage, install: GlobalInstall) -> Result<Materialized> {
    let link = packages_dir.join(exact.install_path());
    let target = install.path.clone();
    let path = tokio::task::spawn_blocking(move || link_into_project(&target, &link))
        .await
        .context("linking task panicked")??;
    Ok(Materialized {
        exact: exact.clone(),
        config: install.config,
        path,
        downloaded: install.changed,
    })
}

/// Point `link` at `target` unless it already does or is a checkout.
pub fn link_into_project(target: &Path, link: &Path) -> Result<PathBuf> {
    if is_checkout_dir(link) {
        tracing::debug!(target: "installer", "Keeping checked out directory {}", link.display());
        return Ok(link.to_path_buf());
    }
    if is_link(link) && std::fs::read_link(link).is_ok_and(|current| current == target) {
        return Ok(link.to_path_buf());
    }
    link_dir(target, link)?;
    Ok(link.to_path_buf())
}

/// A real directory (not a link) inside the packages directory.
#[must_use]
pub fn is_checkout_dir(path: &Path) -> bool {
    !is_link(path) && path.is_dir()
}

/// Move whatever occupies `exact`'s install path out of the way.
///
/// Links are simply removed. A checked-out directory is moved to
/// `.orphaned/<registry>/<name>@<version>-<uuid>` and its new location returned.
pub fn orphan(packages_dir: &Path, exact: &ExactPackage) -> Result<Option<PathBuf>> {
    let path = packages_dir.join(exact.install_path());
    if is_link(&path) {
        remove_path(&path)?;
        return Ok(None);
    }
    if !path.exists() {
        return Ok(None);
    }

    let destination = packages_dir
        .join(ORPHANED_DIR)
        .join(&exact.registry)
        .join(format!("{}@{}-{}", exact.name, exact.version, uuid::Uuid::new_v4()));
    ensure_parent_dir(&destination)?;
    std::fs::rename(&path, &destination)
        .with_context(|| format!("Failed to move {} to {}", path.display(), destination.display()))?;
    tracing::warn!(target: "installer", "Moved {} aside to {}", path.display(), destination.display());
    Ok(Some(destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_flight_produces_once() {
        let slots: InFlight<String, u32> = InFlight::new();
        let runs = &AtomicU32::new(0);
        let key = "npm:pkg@1.0.0".to_string();

        let request = || {
            slots.get_or_run(&key, || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
            })
        };
        let results = futures::future::join_all((0..5).map(|_| request())).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| **r.as_ref().unwrap() == 42));
        assert_eq!(slots.ready(&key).map(|v| *v), Some(42));
    }

    #[tokio::test]
    async fn test_in_flight_failure_lets_waiters_retry() {
        let slots: InFlight<&'static str, u32> = InFlight::new();
        let runs = &AtomicU32::new(0);

        let first = slots.get_or_run(&"pkg", || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            anyhow::bail!("download failed")
        });
        let second = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            slots
                .get_or_run(&"pkg", || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_err());
        assert_eq!(*second.unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_link_into_project() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("cache/pkg");
        let other = temp.path().join("cache/other");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::create_dir_all(&other).unwrap();
        let link = temp.path().join("trellis_packages/npm/pkg@1.0.0");

        link_into_project(&target, &link).unwrap();
        assert!(is_link(&link));
        assert_eq!(std::fs::read_link(&link).unwrap(), target);

        // Relinking moves the link
        link_into_project(&other, &link).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), other);

        // A checkout is left alone
        remove_path(&link).unwrap();
        std::fs::create_dir_all(&link).unwrap();
        link_into_project(&target, &link).unwrap();
        assert!(is_checkout_dir(&link));
    }

    #[test]
    fn test_orphan_moves_checkouts_aside() {
        let temp = TempDir::new().unwrap();
        let packages = temp.path().join("trellis_packages");
        let exact: ExactPackage = "git:tool@main".parse().unwrap();
        let path = packages.join(exact.install_path());
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("edited.txt"), "local work").unwrap();

        let moved = orphan(&packages, &exact).unwrap().unwrap();
        assert!(!path.exists());
        assert!(moved.starts_with(packages.join(ORPHANED_DIR).join("git")));
        assert_eq!(std::fs::read_to_string(moved.join("edited.txt")).unwrap(), "local work");

        // Nothing there: nothing to do
        assert!(orphan(&packages, &exact).unwrap().is_none());
    }
}
