//! Reconciling the project's packages directory with the install tree.
//!
//! After the tree dropped its unreachable entries, every directory under
//! `trellis_packages` that no longer corresponds to a reachable package is removed.
//! Links go without asking. Checked-out directories need an explicit confirmation,
//! and a git working copy with local changes stops the sweep with
//! [`TrellisError::UnsavedChanges`] before anything is deleted.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::constants::ORPHANED_DIR;
use crate::core::TrellisError;
use crate::git::GitRepo;
use crate::package::{ExactPackage, PackageConfig};
use crate::tree::ResolveTree;
use crate::ui::{Logger, Prompter};
use crate::utils::fs::{is_link, remove_path};

/// A package directory found under the packages directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledDir {
    pub exact: ExactPackage,
    pub path: PathBuf,
    /// A real directory rather than a link
    pub checkout: bool,
}

/// Drop top-level resolutions the project manifest no longer declares.
pub fn drop_undeclared(tree: &mut ResolveTree, manifest: &PackageConfig) -> Vec<String> {
    let undeclared: Vec<String> =
        tree.primaries().filter(|(name, _)| manifest.declared(name).is_none()).map(|(name, _)| name.clone()).collect();
    for name in &undeclared {
        tree.remove_resolution(name, None);
    }
    undeclared
}

/// Every `<registry>/[@scope/]<name>@<version>` directory or link on disk.
pub fn scan_packages_dir(packages_dir: &Path) -> Result<Vec<InstalledDir>> {
    let mut found = Vec::new();
    for registry in read_entries(packages_dir)? {
        let Some(registry_name) = file_name(&registry) else { continue };
        if registry_name == ORPHANED_DIR || !registry.is_dir() {
            continue;
        }
        for entry in read_entries(&registry)? {
            let Some(leaf) = file_name(&entry) else { continue };
            if leaf.starts_with('@') && !is_package_leaf(&entry) {
                // `@scope` directory holding scoped packages
                for scoped in read_entries(&entry)? {
                    if let Some(scoped_leaf) = file_name(&scoped) {
                        push_installed(&mut found, &registry_name, &format!("{leaf}/{scoped_leaf}"), scoped);
                    }
                }
                continue;
            }
            push_installed(&mut found, &registry_name, &leaf, entry);
        }
    }
    found.sort_by(|a, b| a.exact.cmp(&b.exact));
    Ok(found)
}

fn push_installed(found: &mut Vec<InstalledDir>, registry: &str, leaf: &str, path: PathBuf) {
    match format!("{registry}:{leaf}").parse::<ExactPackage>() {
        Ok(exact) => found.push(InstalledDir {
            exact,
            checkout: !is_link(&path) && path.is_dir(),
            path,
        }),
        Err(_) => tracing::debug!(target: "installer", "Ignoring unexpected entry {}", path.display()),
    }
}

fn read_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut paths = Vec::new();
            for entry in entries {
                paths.push(entry.with_context(|| format!("Failed to read {}", dir.display()))?.path());
            }
            Ok(paths)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", dir.display())),
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// Removes directories of packages that are no longer installed.
pub struct Sweep<'a> {
    pub packages_dir: &'a Path,
    pub prompter: &'a dyn Prompter,
    pub logger: &'a dyn Logger,
}

impl Sweep<'_> {
    /// Remove every package directory not in `keep`. Returns the packages removed.
    pub async fn run(&self, keep: &BTreeSet<ExactPackage>) -> Result<Vec<ExactPackage>> {
        let packages_dir = self.packages_dir.to_path_buf();
        let stale: Vec<InstalledDir> = tokio::task::spawn_blocking(move || scan_packages_dir(&packages_dir))
            .await
            .context("directory scan panicked")??
            .into_iter()
            .filter(|dir| !keep.contains(&dir.exact))
            .collect();

        // Refuse before deleting anything
        for dir in stale.iter().filter(|dir| dir.checkout) {
            ensure_no_local_changes(&dir.path).await?;
        }

        let mut removed = Vec::new();
        for dir in stale {
            if dir.checkout {
                let question = format!("Delete checked out directory {}?", dir.path.display());
                if !self.prompter.confirm(&question, false).await? {
                    self.logger.warn(&format!("Keeping {} ({} is no longer installed)", dir.path.display(), dir.exact));
                    continue;
                }
            }
            self.remove(&dir.path).await?;
            self.logger.debug(&format!("Removed {}", dir.exact));
            removed.push(dir.exact);
        }
        Ok(removed)
    }

    /// Offer to delete every directory previously moved to `.orphaned`.
    pub async fn orphans(&self) -> Result<usize> {
        let root = self.packages_dir.join(ORPHANED_DIR);
        let candidates = tokio::task::spawn_blocking(move || orphan_dirs(&root))
            .await
            .context("orphan scan panicked")??;

        let mut deleted = 0;
        for path in candidates {
            ensure_no_local_changes(&path).await?;
            let question = format!("Delete orphaned directory {}?", path.display());
            if self.prompter.confirm(&question, false).await? {
                self.remove(&path).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Remove `path` and any registry or scope directories it leaves empty.
    async fn remove(&self, path: &Path) -> Result<()> {
        let (packages_dir, path) = (self.packages_dir.to_path_buf(), path.to_path_buf());
        tokio::task::spawn_blocking(move || remove_with_empty_parents(&packages_dir, &path))
            .await
            .context("removal task panicked")?
    }
}

fn remove_with_empty_parents(packages_dir: &Path, path: &Path) -> Result<()> {
    remove_path(path)?;
    let mut parent = path.parent();
    while let Some(dir) = parent {
        if dir == packages_dir || !dir.starts_with(packages_dir) {
            break;
        }
        // Fails on non-empty directories, which ends the walk
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        parent = dir.parent();
    }
    Ok(())
}

/// Every package directory under `.orphaned/<registry>/`, scopes included.
fn orphan_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for registry in read_entries(root)? {
        for entry in read_entries(&registry)? {
            let scoped = file_name(&entry).is_some_and(|n| n.starts_with('@')) && !is_package_leaf(&entry);
            if scoped {
                candidates.extend(read_entries(&entry)?);
            } else {
                candidates.push(entry);
            }
        }
    }
    Ok(candidates)
}

/// `name@version...` as opposed to a bare `@scope` directory.
fn is_package_leaf(path: &Path) -> bool {
    file_name(path).is_some_and(|n| n.get(1..).is_some_and(|rest| rest.contains('@')))
}

async fn ensure_no_local_changes(path: &Path) -> Result<()> {
    let repo = GitRepo::new(path);
    if repo.is_git_repo() && repo.has_local_changes().await? {
        return Err(TrellisError::UnsavedChanges {
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(())
}
