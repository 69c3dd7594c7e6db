//! Install orchestration.
//!
//! The [`Installer`] turns install requests into a deduplicated install tree and a
//! populated `trellis_packages` directory. Every top-level call runs one *pass*:
//!
//! 1. Load `trellis.lock` and `trellis.toml`, validate the project overrides
//! 2. Run every request concurrently; each request resolves, records itself into the
//!    tree, materializes its package and recurses into that package's dependencies
//! 3. Drop tree entries that are no longer reachable and remove their directories
//! 4. Write the tree (and the manifest when saving) only if the whole pass succeeded
//!
//! # Resolving a package request
//!
//! - With `lock`, an existing resolution the target still accepts is reused without
//!   touching the network
//! - A secondary request without `latest` prefers what its parent already resolved,
//!   then the best version already installed anywhere in the tree
//! - Otherwise the registry resolves the target
//!
//! The resolution is recorded before the package's dependencies are installed, so a
//! dependency cycle finds its own entry and stops. A fresh resolution then runs the
//! dedupe upgrade (see [`dedupe`]).
//!
//! # Roles
//!
//! - **primary / dev**: recorded at the top level and saved to the manifest
//! - **peer**: reuses the top-level resolution when it is in range, installs at the top
//!   level when there is none, and otherwise warns and installs as a secondary
//! - **optional**: a failure is reported and skipped
//!
//! # Concurrency
//!
//! Sibling requests run concurrently and are all joined before a failure is reported,
//! so no work is left running behind an error. A package is materialized once per
//! pass (see [`materialize::InFlight`]). One installer runs one pass at a time; a
//! second call fails with [`TrellisError::InstallInProgress`]. Across processes the
//! pass holds the project lock (see [`project_lock`]).

pub mod clean;
pub mod dedupe;
pub mod materialize;
pub mod project_lock;
pub mod request;

use anyhow::{Context, Result};
use dashmap::DashSet;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::{CacheOptions, GlobalCache};
use crate::config::GlobalConfig;
use crate::constants::{GIT_CLONE_TIMEOUT, PACKAGES_DIR, PROJECT_MANIFEST, TREE_FILE};
use crate::core::TrellisError;
use crate::fetch::FetchClient;
use crate::git::GitRepo;
use crate::package::{DependencyTarget, ExactPackage, PackageConfig, PackageTarget, validate_override};
use crate::registry::{RegistryManager, ResolveOptions};
use crate::source::SourceLocator;
use crate::tree::{Resolution, ResolveTree};
use crate::ui::{Logger, NonInteractive, Prompter, TracingLogger};
use crate::utils::fs::{copy_dir, remove_dir_all, remove_path};
use crate::version::{PackageRange, PackageVersion};

use clean::Sweep;
pub use materialize::{InFlight, Materialized};
pub use project_lock::ProjectLock;
pub use request::{Ancestry, InstallRequest, RequestType};

/// Registries assigned to resource installs, by source kind.
const GIT_REGISTRY: &str = "git";
const URL_REGISTRY: &str = "url";
const FILE_REGISTRY: &str = "file";

/// Name of the project lock held by every top-level call.
const INSTALL_LOCK: &str = "install";

/// Options for a top-level call.
#[derive(Debug, Clone, Copy)]
pub struct InstallOptions {
    /// Reuse existing resolutions the targets still accept
    pub lock: bool,
    /// Resolve secondaries through the registry instead of reusing installed versions
    pub latest: bool,
    /// Let prereleases match anywhere inside a range's bounds
    pub edge: bool,
    /// Upgrade older compatible installs onto fresh resolutions
    pub dedupe: bool,
    /// Redownload packages even when the cache is valid
    pub force: bool,
    /// Write top-level requests to the project manifest
    pub save: bool,
    pub offline: bool,
    pub prefer_offline: bool,
    /// Check cached packages file by file instead of trusting their records
    pub full_verification: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            lock: false,
            latest: false,
            edge: false,
            dedupe: true,
            force: false,
            save: true,
            offline: false,
            prefer_offline: false,
            full_verification: false,
        }
    }
}

impl InstallOptions {
    /// Defaults with the network settings taken from `config`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            offline: config.offline,
            prefer_offline: config.prefer_offline,
            ..Self::default()
        }
    }

    const fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            edge: self.edge,
            offline: self.offline,
            prefer_offline: self.prefer_offline,
        }
    }

    const fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            force: self.force,
            full_verification: self.full_verification,
        }
    }
}

/// Installs packages into one project.
pub struct Installer {
    project_dir: PathBuf,
    config: Arc<GlobalConfig>,
    registries: Arc<RegistryManager>,
    cache: Arc<GlobalCache>,
    logger: Arc<dyn Logger>,
    prompter: Arc<dyn Prompter>,
    busy: AtomicBool,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("project_dir", &self.project_dir)
            .field("registries", &self.registries)
            .field("cache", &self.cache)
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the busy flag when a top-level call ends.
struct Busy<'a>(&'a AtomicBool);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Installer {
    /// An installer for `project_dir` with the registries and cache described by `config`.
    pub fn new(project_dir: impl Into<PathBuf>, config: GlobalConfig) -> Result<Self> {
        let config = Arc::new(config);
        let cache_root = config.cache_root()?;
        let fetch = Arc::new(FetchClient::from_config(config.clone()));
        let registries = Arc::new(RegistryManager::new(config.clone(), fetch.clone(), &cache_root));
        let cache = Arc::new(GlobalCache::new(cache_root, fetch, config.max_parallel()));
        Ok(Self {
            project_dir: project_dir.into(),
            config,
            registries,
            cache,
            logger: Arc::new(TracingLogger),
            prompter: Arc::new(NonInteractive::default()),
            busy: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_registries(mut self, registries: Arc<RegistryManager>) -> Self {
        self.registries = registries;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<GlobalCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    #[must_use]
    pub fn registries(&self) -> &Arc<RegistryManager> {
        &self.registries
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<GlobalCache> {
        &self.cache
    }

    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    #[must_use]
    pub fn tree_path(&self) -> PathBuf {
        self.project_dir.join(TREE_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.project_dir.join(PROJECT_MANIFEST)
    }

    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.project_dir.join(PACKAGES_DIR)
    }

    /// The persisted install tree.
    pub async fn load_tree(&self) -> Result<ResolveTree> {
        ResolveTree::load(&self.tree_path()).await
    }

    fn enter(&self) -> Result<Busy<'_>, TrellisError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Busy(&self.busy))
            .map_err(|_| TrellisError::InstallInProgress)
    }

    /// Install `requests`, or everything the project manifest declares when empty.
    ///
    /// Returns whether the install tree changed.
    pub async fn install(&self, requests: Vec<InstallRequest>, options: InstallOptions) -> Result<bool> {
        let _busy = self.enter()?;
        let _lock = ProjectLock::acquire(&self.project_dir, INSTALL_LOCK).await?;
        for request in &requests {
            if let Some(value) = &request.override_value {
                validate_override(value)?;
            }
        }

        let mut pass = self.start(options, BTreeSet::new()).await?;
        let requests = if requests.is_empty() {
            pass.manifest_requests()?
        } else {
            pass.save_requests = options.save;
            requests
        };
        pass.install_all(requests).await?;
        self.finish(pass, false, true).await
    }

    /// Re-resolve installed packages matching `selectors` (all of them when empty),
    /// keeping every other resolution.
    pub async fn update(&self, selectors: &[&str], options: InstallOptions) -> Result<bool> {
        let _busy = self.enter()?;
        let _lock = ProjectLock::acquire(&self.project_dir, INSTALL_LOCK).await?;

        let tree = self.load_tree().await?;
        let mut refresh = BTreeSet::new();
        for selector in selectors {
            let matches = tree.select_all(selector)?;
            if matches.is_empty() {
                return Err(TrellisError::NotInstalled {
                    selector: (*selector).to_string(),
                }
                .into());
            }
            refresh.extend(matches);
        }

        let options = InstallOptions {
            lock: !selectors.is_empty(),
            ..options
        };
        let pass = self.start(options, refresh).await?;
        let requests = pass.manifest_requests()?;
        pass.install_all(requests).await?;
        self.finish(pass, false, true).await
    }

    /// Remove top-level dependencies by name, from the tree and the manifest.
    pub async fn uninstall(&self, names: &[&str]) -> Result<bool> {
        let _busy = self.enter()?;
        let _lock = ProjectLock::acquire(&self.project_dir, INSTALL_LOCK).await?;

        let pass = self.start(InstallOptions::default(), BTreeSet::new()).await?;
        for name in names {
            let declared = pass.manifest().remove_dependency(name);
            let resolved = pass.tree(|tree| tree.remove_resolution(name, None));
            if !declared && resolved.is_none() {
                return Err(TrellisError::NotInstalled {
                    selector: (*name).to_string(),
                }
                .into());
            }
            self.logger.info(&format!("Removed {name}"));
        }
        self.finish(pass, false, true).await
    }

    /// Install a literal source as the top-level dependency `name`.
    pub async fn link(&self, name: &str, source: SourceLocator, options: InstallOptions) -> Result<bool> {
        let _busy = self.enter()?;
        let _lock = ProjectLock::acquire(&self.project_dir, INSTALL_LOCK).await?;

        let mut pass = self.start(options, BTreeSet::new()).await?;
        pass.save_requests = options.save;
        pass.install_all(vec![InstallRequest::resource(Some(name.to_string()), source)]).await?;
        self.finish(pass, false, true).await
    }

    /// Replace the links of installed packages with editable copies.
    ///
    /// Git sources are cloned, tarballs are copied out of the cache. `file:` sources are
    /// already live and are left alone. The tree itself does not change.
    pub async fn checkout(&self, selectors: &[&str]) -> Result<bool> {
        let _busy = self.enter()?;
        let _lock = ProjectLock::acquire(&self.project_dir, INSTALL_LOCK).await?;

        let tree = self.load_tree().await?;
        let mut targets = Vec::new();
        for selector in selectors {
            let exact = tree.select(selector)?;
            let source = tree
                .get_source(&exact)
                .cloned()
                .ok_or_else(|| TrellisError::internal(format!("{exact} has no recorded source")))?;
            targets.push((exact, source));
        }
        for (exact, source) in targets {
            self.checkout_one(&exact, &source).await?;
        }
        Ok(false)
    }

    /// Drop undeclared top-level dependencies and everything no longer reachable,
    /// on disk and in the tree. The tree is written when `save` is set.
    pub async fn clean(&self, save: bool) -> Result<bool> {
        let _busy = self.enter()?;
        let _lock = ProjectLock::acquire(&self.project_dir, INSTALL_LOCK).await?;

        let options = InstallOptions {
            save,
            ..InstallOptions::default()
        };
        let pass = self.start(options, BTreeSet::new()).await?;
        self.finish(pass, true, save).await
    }

    async fn start(&self, options: InstallOptions, refresh: BTreeSet<ExactPackage>) -> Result<Pass<'_>> {
        let tree = self.load_tree().await?;
        let manifest = PackageConfig::load_project(&self.manifest_path())?;
        for value in manifest.overrides.values() {
            validate_override(value)?;
        }
        let default_registry = manifest.registry.clone().unwrap_or_else(|| self.config.default_registry.clone());
        tracing::debug!(
            target: "installer",
            "Starting pass in {} ({} packages in tree)",
            self.project_dir.display(),
            tree.packages().count()
        );

        Ok(Pass {
            installer: self,
            options,
            default_registry,
            overrides: manifest.overrides.clone(),
            initial_tree: tree.clone(),
            initial_manifest: manifest.clone(),
            tree: Mutex::new(tree),
            manifest: Mutex::new(manifest),
            materialized: InFlight::new(),
            expanded: DashSet::new(),
            sourced: DashSet::new(),
            refresh,
            save_requests: false,
        })
    }

    /// Collect garbage and persist the pass.
    async fn finish(&self, pass: Pass<'_>, prune_undeclared: bool, persist: bool) -> Result<bool> {
        let Pass {
            tree,
            manifest,
            initial_tree,
            initial_manifest,
            options,
            ..
        } = pass;
        let mut tree = tree.into_inner().unwrap_or_else(PoisonError::into_inner);
        let manifest = manifest.into_inner().unwrap_or_else(PoisonError::into_inner);

        if prune_undeclared {
            for name in clean::drop_undeclared(&mut tree, &manifest) {
                self.logger.info(&format!("Dropping {name}, the project no longer declares it"));
            }
        }
        tree.remove_unreachable();

        let packages_dir = self.packages_dir();
        let sweep = Sweep {
            packages_dir: &packages_dir,
            prompter: self.prompter.as_ref(),
            logger: self.logger.as_ref(),
        };
        let removed = sweep.run(&tree.reachable()).await?;
        if prune_undeclared {
            sweep.orphans().await?;
        }

        let changed = tree != initial_tree;
        if changed && persist {
            let (snapshot, path) = (tree.clone(), self.tree_path());
            tokio::task::spawn_blocking(move || snapshot.save(&path)).await.context("tree save task panicked")??;
        }
        if persist && options.save && manifest != initial_manifest {
            let path = self.manifest_path();
            tokio::task::spawn_blocking(move || manifest.save_project(&path))
                .await
                .context("manifest save task panicked")??;
        }

        if changed || !removed.is_empty() {
            self.logger.ok(&format!(
                "{} packages installed, {} removed",
                tree.packages().count(),
                removed.len()
            ));
        }
        Ok(changed)
    }

    async fn checkout_one(&self, exact: &ExactPackage, source: &SourceLocator) -> Result<()> {
        let path = self.packages_dir().join(exact.install_path());
        if materialize::is_checkout_dir(&path) {
            self.logger.info(&format!("{exact} is already checked out"));
            return Ok(());
        }

        let staging = path.with_file_name(format!(".checkout-{}", uuid::Uuid::new_v4()));
        let prepared = match source.with_base(&self.project_dir) {
            SourceLocator::File {
                ..
            } => {
                self.logger.info(&format!("{exact} is a local directory, nothing to check out"));
                return Ok(());
            }
            SourceLocator::Git {
                remote,
                reference,
                ..
            } => GitRepo::clone_at(&remote, reference.as_deref(), &staging, GIT_CLONE_TIMEOUT).await.map(|_| ()),
            tarball @ SourceLocator::Tarball {
                ..
            } => match self.cache.ensure_global_install(&tarball, None, CacheOptions::default()).await {
                Ok(install) => {
                    let (from, to) = (install.path, staging.clone());
                    tokio::task::spawn_blocking(move || copy_dir(&from, &to)).await.context("copy task panicked")?
                }
                Err(e) => Err(e),
            },
        };
        let target = path.clone();
        tokio::task::spawn_blocking(move || finish_checkout(prepared, &staging, &target))
            .await
            .context("checkout task panicked")?
            .with_context(|| format!("Failed to check out {exact}"))?;

        self.logger.ok(&format!("Checked out {exact} into {}", path.display()));
        Ok(())
    }
}

/// Swap the installed link (or directory) at `path` for the prepared `staging` copy.
///
/// `staging` never survives a failure, whether preparing or moving it failed.
fn finish_checkout(prepared: Result<()>, staging: &Path, path: &Path) -> Result<()> {
    let result = prepared.and_then(|()| {
        remove_path(path)?;
        std::fs::rename(staging, path).with_context(|| format!("Failed to move checkout into {}", path.display()))
    });
    if result.is_err() {
        remove_dir_all(staging)?;
    }
    result
}

/// State of one top-level call.
struct Pass<'a> {
    installer: &'a Installer,
    options: InstallOptions,
    /// Registry for bare dependency ranges
    default_registry: String,
    /// Project overrides keyed by `registry:name@version`, `registry:name` or name
    overrides: BTreeMap<String, Value>,
    initial_tree: ResolveTree,
    initial_manifest: PackageConfig,
    /// Never held across an await
    tree: Mutex<ResolveTree>,
    manifest: Mutex<PackageConfig>,
    materialized: InFlight<ExactPackage, Materialized>,
    /// Packages whose dependencies were already requested
    expanded: DashSet<ExactPackage>,
    /// Packages whose source was recorded during this pass
    sourced: DashSet<ExactPackage>,
    /// Installed packages that must be resolved again
    refresh: BTreeSet<ExactPackage>,
    /// Record top-level requests in the manifest
    save_requests: bool,
}

/// How a package request was satisfied.
struct Choice {
    exact: ExactPackage,
    source: SourceLocator,
    override_value: Option<Value>,
    /// Resolved by the registry rather than reused from the tree
    fresh: bool,
}

/// Like [`PackageTarget::has`], but tag ranges accept any version of the package they
/// were resolved to before.
fn accepts(target: &PackageTarget, exact: &ExactPackage, edge: bool) -> bool {
    target.has(exact, edge) || (target.range.is_tag() && target.same_package(exact))
}

/// Registry a resource install is recorded under.
const fn resource_registry(source: &SourceLocator) -> &'static str {
    match source {
        SourceLocator::Git {
            ..
        } => GIT_REGISTRY,
        SourceLocator::Tarball {
            ..
        } => URL_REGISTRY,
        SourceLocator::File {
            ..
        } => FILE_REGISTRY,
    }
}

/// Version a resource install is recorded at: the manifest version, else the git ref,
/// else `local`.
fn resource_version(config: &PackageConfig, source: &SourceLocator) -> PackageVersion {
    let declared = config.version.as_deref().and_then(crate::version::range::parse_exact_version);
    if let Some(version) = declared {
        return version;
    }
    match source {
        SourceLocator::Git {
            reference: Some(reference),
            ..
        } => PackageVersion::Tag(reference.replace('/', "-")),
        _ => PackageVersion::Tag("local".to_string()),
    }
}

impl Pass<'_> {
    fn tree<R>(&self, f: impl FnOnce(&mut ResolveTree) -> R) -> R {
        let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tree)
    }

    fn manifest(&self) -> std::sync::MutexGuard<'_, PackageConfig> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn manifest_snapshot(&self) -> PackageConfig {
        self.manifest().clone()
    }

    /// One request per dependency the project declares.
    fn manifest_requests(&self) -> Result<Vec<InstallRequest>> {
        let declared = self.manifest().dependency_targets(&self.default_registry, true)?;
        Ok(declared.into_iter().map(|dependency| InstallRequest::declared(dependency, None, Ancestry::default())).collect())
    }

    /// Run `requests` concurrently. Every request finishes before the first error is
    /// returned.
    async fn install_all(&self, requests: Vec<InstallRequest>) -> Result<()> {
        let results = join_all(requests.into_iter().map(|request| self.install(request))).await;
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    fn install(&self, request: InstallRequest) -> BoxFuture<'_, Result<()>> {
        async move {
            let description = request.describe();
            let optional = request.kind == RequestType::Optional;
            let edge = request.name.clone().map(|name| (name, request.parent.clone()));

            let result = match request.target.clone() {
                DependencyTarget::Package(target) => self.install_package(request, target).await,
                DependencyTarget::Resource(source) => self.install_resource(request, source).await,
            };
            match result {
                Err(e) if optional => {
                    self.installer.logger.warn(&format!("Skipping optional dependency {description}: {e:#}"));
                    if let Some((name, parent)) = edge {
                        self.tree(|tree| tree.remove_resolution(&name, parent.as_ref()));
                    }
                    Ok(())
                }
                other => other.with_context(|| format!("Failed to install {description}")),
            }
        }
        .boxed()
    }

    async fn install_package(&self, request: InstallRequest, target: PackageTarget) -> Result<()> {
        let name = request.name.clone().unwrap_or_else(|| target.name.clone());
        let mut parent = request.parent.clone();
        let mut kind = request.kind;
        // Parent that also gets an edge to a peer installed at the top level
        let mut peer_of = None;

        if kind == RequestType::Peer && parent.is_some() {
            let top = self.tree(|tree| tree.get_resolution(&name, None).cloned());
            match top {
                Some(top) if accepts(&target, &top, true) => {
                    self.tree(|tree| tree.set_resolution(&name, top.clone(), parent.as_ref()));
                    let source = self.tree(|tree| tree.get_source(&top).cloned());
                    return match source {
                        // Installed by a top-level request of this pass, or by an earlier one
                        Some(source) => {
                            let override_value = self.project_override(&name, &top);
                            self.realize(&top, &source, override_value.as_ref(), &request.ancestry).await
                        }
                        None => Ok(()),
                    };
                }
                Some(top) => {
                    self.installer.logger.warn(&format!(
                        "{} wants peer {} but the project has {}, installing a separate copy",
                        parent.as_ref().map_or_else(String::new, ToString::to_string),
                        target,
                        top
                    ));
                    kind = RequestType::Secondary;
                }
                None => peer_of = parent.take(),
            }
        }

        let choice = self.choose(&name, parent.as_ref(), kind, &target).await?;
        let exact = choice.exact.clone();
        let override_value =
            request.override_value.clone().or_else(|| self.project_override(&name, &exact)).or(choice.override_value);

        self.record(&name, &exact, parent.as_ref(), &choice.source)?;
        if let Some(peer_parent) = &peer_of {
            self.tree(|tree| tree.set_resolution(&name, exact.clone(), Some(peer_parent)));
        }
        if request.is_top_level() && self.save_requests {
            let value = self.manifest_value(&name, &request.target, &exact);
            self.manifest().set_dependency(&name, &value, request.kind.manifest_kind());
        }

        if request.ancestry.contains(&exact) {
            tracing::debug!(target: "installer", "{} is its own ancestor, stopping", exact);
            return Ok(());
        }
        if choice.fresh && self.options.dedupe {
            self.dedupe(&exact).await?;
        }
        self.realize(&exact, &choice.source, override_value.as_ref(), &request.ancestry).await
    }

    /// Pick the exact package for a package request.
    async fn choose(
        &self,
        name: &str,
        parent: Option<&ExactPackage>,
        kind: RequestType,
        target: &PackageTarget,
    ) -> Result<Choice> {
        let reusable = |exact: &ExactPackage| -> Option<Choice> {
            if self.refresh.contains(exact) {
                return None;
            }
            let source = self.tree(|tree| tree.get_source(exact).cloned())?;
            Some(Choice {
                exact: exact.clone(),
                source,
                override_value: None,
                fresh: false,
            })
        };

        let existing = self.tree(|tree| tree.get_resolution(name, parent).cloned());
        if self.options.lock {
            if let Some(choice) = existing.as_ref().filter(|e| accepts(target, e, true)).and_then(|e| reusable(e)) {
                tracing::trace!(target: "installer", "Reusing locked {}", choice.exact);
                return Ok(choice);
            }
        }

        if kind == RequestType::Secondary && !self.options.latest {
            let in_range = existing.filter(|e| accepts(target, e, self.options.edge));
            let candidate = in_range.or_else(|| self.tree(|tree| tree.get_best_match(target, self.options.edge)));
            if let Some(choice) = candidate.as_ref().and_then(|e| reusable(e)) {
                tracing::trace!(target: "installer", "Reusing installed {} for {}", choice.exact, target);
                return Ok(choice);
            }
        }

        let resolved = self.installer.registries.resolve(target, self.options.resolve_options()).await?;
        Ok(Choice {
            exact: resolved.exact,
            source: resolved.source,
            override_value: resolved.override_value,
            fresh: true,
        })
    }

    /// Record `name -> exact` under `parent` along with the package's source.
    ///
    /// A source recorded earlier in this pass must match. A source left over from a
    /// previous pass is replaced.
    fn record(&self, name: &str, exact: &ExactPackage, parent: Option<&ExactPackage>, source: &SourceLocator) -> Result<()> {
        let first = self.sourced.insert(exact.clone());
        self.tree(|tree| {
            tree.set_resolution(name, exact.clone(), parent);
            if first {
                tree.replace_source(exact, source.clone());
                Ok(())
            } else {
                tree.set_source(exact, source.clone()).map(|_| ())
            }
        })?;
        Ok(())
    }

    async fn install_resource(&self, request: InstallRequest, source: SourceLocator) -> Result<()> {
        let located = source.with_base(&self.installer.project_dir);
        let install = self
            .installer
            .cache
            .ensure_global_install(&located, request.override_value.as_ref(), self.options.cache_options())
            .await
            .with_context(|| format!("Failed to fetch {source}"))?;

        let package_name = install.config.name.clone().or_else(|| request.name.clone()).ok_or_else(|| {
            TrellisError::InvalidTarget {
                target: source.to_string(),
                reason: "the package manifest has no name, give one explicitly".to_string(),
            }
        })?;
        crate::package::validate_name(&package_name).map_err(|reason| TrellisError::InvalidTarget {
            target: source.to_string(),
            reason,
        })?;
        let exact =
            ExactPackage::new(resource_registry(&source), package_name.as_str(), resource_version(&install.config, &source));
        let name = request.name.clone().unwrap_or(package_name);

        // Another source installed under the same identity in an earlier pass
        let previous = self.tree(|tree| tree.get_source(&exact).cloned());
        if let Some(previous) = previous.filter(|previous| *previous != source) {
            if !self.sourced.contains(&exact) {
                let packages_dir = self.installer.packages_dir();
                let orphaned = exact.clone();
                let moved = tokio::task::spawn_blocking(move || materialize::orphan(&packages_dir, &orphaned))
                    .await
                    .context("orphaning task panicked")??;
                self.installer.logger.warn(&format!(
                    "{exact} now comes from {source} instead of {previous}{}",
                    moved.map(|path| format!(", the old copy was moved to {}", path.display())).unwrap_or_default()
                ));
            }
        }

        self.record(&name, &exact, request.parent.as_ref(), &source)?;
        if request.parent.is_none() && self.save_requests {
            self.manifest().set_dependency(&name, &source.to_string(), request.kind.manifest_kind());
        }
        if request.ancestry.contains(&exact) {
            return Ok(());
        }

        let packages_dir = self.installer.packages_dir();
        let materialized = self
            .materialized
            .get_or_run(&exact, || materialize::place(&packages_dir, &exact, install))
            .await?;
        self.expand(&materialized, &request.ancestry).await
    }

    /// Materialize `exact` once per pass, then install its dependencies.
    async fn realize(
        &self,
        exact: &ExactPackage,
        source: &SourceLocator,
        override_value: Option<&Value>,
        ancestry: &Ancestry,
    ) -> Result<()> {
        let cache = self.installer.cache.as_ref();
        let packages_dir = self.installer.packages_dir();
        let located = source.with_base(&self.installer.project_dir);
        let options = self.options.cache_options();

        let materialized = self
            .materialized
            .get_or_run(exact, || async move {
                materialize::materialize(cache, &packages_dir, exact, &located, override_value, options).await
            })
            .await?;
        if materialized.downloaded {
            self.installer.logger.ok(&format!("Installed {exact}"));
        }
        self.expand(&materialized, ancestry).await
    }

    /// Request every dependency `materialized` declares, once per pass.
    async fn expand(&self, materialized: &Materialized, ancestry: &Ancestry) -> Result<()> {
        let exact = &materialized.exact;
        if !self.expanded.insert(exact.clone()) {
            return Ok(());
        }

        // Resource installs declare their dependencies against the project's registry
        let registry = match exact.registry.as_str() {
            GIT_REGISTRY | URL_REGISTRY | FILE_REGISTRY => self.default_registry.as_str(),
            other => other,
        };
        let children = materialized.config.dependency_targets(registry, false)?;
        if children.is_empty() {
            return Ok(());
        }

        let ancestry = ancestry.child(exact);
        let requests = children
            .into_iter()
            .map(|dependency| InstallRequest::declared(dependency, Some(exact), ancestry.clone()))
            .collect();
        self.install_all(requests).await
    }

    /// Upgrade older installs of `new`'s package whose declared ranges accept it.
    async fn dedupe(&self, new: &ExactPackage) -> Result<()> {
        let candidates = self.tree(|tree| dedupe::candidates(tree, new));
        if candidates.is_empty() {
            return Ok(());
        }

        let mut declared = Vec::new();
        for edge in candidates {
            if let Some(range) = self.declared_range(&edge).await? {
                declared.push((edge, range));
            }
        }
        let upgraded = self.tree(|tree| dedupe::upgrade(tree, new, &declared, self.options.edge));
        if !upgraded.is_empty() {
            self.installer.logger.info(&format!("Deduplicated {} installs onto {new}", upgraded.len()));
        }
        Ok(())
    }

    /// The range `edge`'s parent declares for it, if it can still be determined.
    async fn declared_range(&self, edge: &Resolution) -> Result<Option<PackageRange>> {
        let (config, registry) = match &edge.parent {
            None => (self.manifest_snapshot(), self.default_registry.clone()),
            Some(parent) => {
                let config = match self.materialized.ready(parent) {
                    Some(materialized) => materialized.config.clone(),
                    None => {
                        let dir = self.installer.packages_dir().join(parent.install_path());
                        let read = tokio::task::spawn_blocking(move || PackageConfig::read_from_dir(&dir))
                            .await
                            .context("manifest read panicked")?;
                        match read {
                            Ok(config) => config,
                            Err(e) => {
                                tracing::debug!(target: "installer", "Cannot read manifest of {}: {:#}", parent, e);
                                return Ok(None);
                            }
                        }
                    }
                };
                (config, parent.registry.clone())
            }
        };

        let Some((value, _)) = config.declared(&edge.name) else {
            return Ok(None);
        };
        let registry = config.registry.as_deref().unwrap_or(&registry);
        Ok(match DependencyTarget::parse(&edge.name, value, registry) {
            Ok(DependencyTarget::Package(target)) if target.same_package(&edge.exact) => Some(target.range),
            _ => None,
        })
    }

    fn project_override(&self, name: &str, exact: &ExactPackage) -> Option<Value> {
        [exact.to_string(), exact.package_id(), name.to_string()]
            .iter()
            .find_map(|key| self.overrides.get(key))
            .cloned()
    }

    /// How a top-level request is written to the manifest.
    fn manifest_value(&self, name: &str, target: &DependencyTarget, exact: &ExactPackage) -> String {
        match target {
            DependencyTarget::Resource(source) => source.to_string(),
            DependencyTarget::Package(target) => {
                let range = if target.range.is_wildcard() {
                    match &exact.version {
                        PackageVersion::Semver(version) => format!("^{version}"),
                        PackageVersion::Tag(tag) => tag.clone(),
                    }
                } else {
                    target.range.as_str().to_string()
                };
                if target.registry == self.default_registry && target.name == name {
                    range
                } else {
                    format!("{}:{}@{}", target.registry, target.name, range)
                }
            }
        }
    }
}
