//! Registry manager: turning package targets into exact versions and sources.
//!
//! Resolution of one target runs four steps:
//!
//! 1. **Lookup** - fetch (or reuse) the list of published versions
//! 2. **Match** - pick the highest satisfying version, stable versions first
//! 3. **Resolve** - ask the endpoint for the version's source; the answer is cached in
//!    the lookup record
//! 4. **Redirect** - a lookup may point at another package; the chain is followed with
//!    cycle detection
//!
//! Endpoints are built from a static table of constructors keyed by handler name and
//! pooled per manager. Custom endpoints are registered on the instance with
//! [`RegistryManager::register_endpoint`].
//!
//! Only one lookup or resolve runs per `registry:name` at a time. With
//! `prefer_offline`, a persisted lookup is served without locking or revalidation;
//! with `offline`, the network is never touched.

pub mod endpoint;
pub mod lookup_cache;
pub mod npm;
pub mod retry;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::cache::KeyedLocks;
use crate::config::{GlobalConfig, RegistryConfig};
use crate::core::TrellisError;
use crate::fetch::FetchClient;
use crate::package::{ExactPackage, PackageConfig, PackageTarget};
use crate::source::SourceLocator;
use crate::version::{PackageRange, PackageVersion};

pub use endpoint::{HookError, LookupOutcome, LookupRecord, RegistryEndpoint, ResolvedPackage, VersionEntry};
pub use lookup_cache::LookupCache;
pub use retry::{HookCall, RetryPolicy};

/// What an endpoint constructor gets to work with.
pub struct EndpointContext {
    /// Registry name the endpoint serves
    pub name: String,
    pub config: RegistryConfig,
    pub fetch: Arc<FetchClient>,
}

/// Builds an endpoint for a configured registry.
pub type EndpointConstructor = fn(&EndpointContext) -> Result<Arc<dyn RegistryEndpoint>>;

/// Built-in handlers.
const HANDLERS: &[(&str, EndpointConstructor)] = &[("npm", npm::NpmEndpoint::construct)];

/// Options for one resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Let prereleases match anywhere inside a range's bounds
    pub edge: bool,
    pub offline: bool,
    pub prefer_offline: bool,
}

/// A resolved target.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub exact: ExactPackage,
    pub source: SourceLocator,
    /// Manifest supplied by the registry, if any
    pub config: Option<PackageConfig>,
    /// Override supplied by the registry, if any
    pub override_value: Option<Value>,
}

pub struct RegistryManager {
    config: Arc<GlobalConfig>,
    fetch: Arc<FetchClient>,
    endpoints: DashMap<String, Arc<dyn RegistryEndpoint>>,
    lookups: LookupCache,
    locks: KeyedLocks,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RegistryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryManager")
            .field("endpoints", &self.endpoints.iter().map(|e| e.key().clone()).collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RegistryManager {
    pub fn new(config: Arc<GlobalConfig>, fetch: Arc<FetchClient>, cache_root: &Path) -> Self {
        let policy = RetryPolicy {
            timeout: config.hook_timeout(),
            max_retries: config.max_retries,
        };
        Self {
            config,
            fetch,
            endpoints: DashMap::new(),
            lookups: LookupCache::new(cache_root),
            locks: KeyedLocks::new(),
            policy,
        }
    }

    /// Replace the retry policy (mostly useful to shorten timeouts).
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Serve `name` from `endpoint` on this instance, replacing any configured one.
    pub fn register_endpoint(&self, name: &str, endpoint: Arc<dyn RegistryEndpoint>) {
        tracing::debug!(target: "registry", "Registered endpoint for {}", name);
        self.endpoints.insert(name.to_string(), endpoint);
    }

    /// The endpoint for `registry`, constructing and pooling it on first use.
    pub fn endpoint(&self, registry: &str) -> Result<Arc<dyn RegistryEndpoint>> {
        if let Some(endpoint) = self.endpoints.get(registry) {
            return Ok(endpoint.clone());
        }

        let config = self.config.registry(registry).ok_or_else(|| TrellisError::UnknownRegistry {
            name: registry.to_string(),
        })?;
        let constructor = HANDLERS
            .iter()
            .find(|(handler, _)| *handler == config.handler)
            .map(|(_, constructor)| *constructor)
            .ok_or_else(|| TrellisError::ConfigError {
                message: format!("registry '{}' uses unknown handler '{}'", registry, config.handler),
            })?;
        let endpoint = constructor(&EndpointContext {
            name: registry.to_string(),
            config,
            fetch: self.fetch.clone(),
        })?;

        // Another task may have won the race; keep whichever got in first
        Ok(self.endpoints.entry(registry.to_string()).or_insert(endpoint).clone())
    }

    /// Resolve `target` to an exact version and its source, following redirects.
    pub async fn resolve(&self, target: &PackageTarget, options: ResolveOptions) -> Result<Resolved> {
        let mut current = target.clone();
        let mut chain: Vec<String> = Vec::new();

        loop {
            let id = current.package_id();
            if chain.contains(&id) {
                chain.push(id);
                return Err(TrellisError::CircularRedirect {
                    package: target.package_id(),
                    chain: chain.join(" -> "),
                }
                .into());
            }
            chain.push(id);

            let record = self.lookup(&current, options).await?;
            if let Some(redirect) = &record.redirect {
                let next = PackageTarget::parse_with_default(redirect, &current.registry)?;
                tracing::debug!(target: "registry", "{} redirects to {}", current.package_id(), next.package_id());
                current = PackageTarget::new(next.registry, next.name, current.range.clone());
                continue;
            }

            let Some((version_key, version)) = match_version(&record, &current.range, options.edge) else {
                return Err(TrellisError::PackageNotFound {
                    package: current.package_id(),
                    range: current.range.to_string(),
                }
                .into());
            };

            let resolved = self.resolve_version(&current, &version_key, record, options).await?;
            let exact = current.at(version);
            tracing::debug!(target: "registry", "Resolved {} to {}", target, exact);
            return Ok(Resolved {
                exact,
                source: resolved.source,
                config: resolved.config,
                override_value: resolved.override_value,
            });
        }
    }

    /// The lookup record for `target`'s package.
    pub async fn lookup(&self, target: &PackageTarget, options: ResolveOptions) -> Result<Arc<LookupRecord>> {
        let (registry, name) = (target.registry.as_str(), target.name.as_str());
        if let Some(record) = self.lookups.fresh(registry, name) {
            return Ok(record);
        }

        if options.offline || options.prefer_offline {
            if let Some(record) = self.lookups.stored(registry, name).await {
                tracing::trace!(target: "registry", "Using cached lookup for {}", target.package_id());
                return Ok(self.lookups.remember(registry, name, record));
            }
            if options.offline {
                return Err(TrellisError::OfflineUnresolved {
                    package: target.package_id(),
                }
                .into());
            }
        }

        let _guard = self.locks.acquire(&target.package_id()).await;
        if let Some(record) = self.lookups.fresh(registry, name) {
            return Ok(record);
        }

        let cached = self.lookups.stored(registry, name).await;
        let endpoint = self.endpoint(registry)?;
        let call = HookCall {
            registry,
            package: name,
            hook: "lookup",
        };
        let outcome = self
            .policy
            .call(endpoint.as_ref(), call, || endpoint.lookup(name, &target.range, cached.as_ref()))
            .await?;

        match outcome {
            LookupOutcome::NotFound => Err(TrellisError::PackageNotFound {
                package: target.package_id(),
                range: target.range.to_string(),
            }
            .into()),
            LookupOutcome::Unchanged => match cached {
                Some(record) => Ok(self.lookups.remember(registry, name, record)),
                None => Err(TrellisError::internal(format!(
                    "{registry} reported {name} unchanged without a cached lookup"
                ))
                .into()),
            },
            LookupOutcome::Found(mut record) => {
                // Keep resolutions we already paid for when the version list is unchanged
                if let Some(previous) = cached {
                    for (version, entry) in previous.versions {
                        if let (Some(resolved), Some(current)) = (entry.resolved, record.versions.get_mut(&version)) {
                            if current.meta == entry.meta && current.resolved.is_none() {
                                current.resolved = Some(resolved);
                            }
                        }
                    }
                }
                self.lookups.store(registry, name, record).await
            }
        }
    }

    async fn resolve_version(
        &self,
        target: &PackageTarget,
        version: &str,
        record: Arc<LookupRecord>,
        options: ResolveOptions,
    ) -> Result<ResolvedPackage> {
        let (registry, name) = (target.registry.as_str(), target.name.as_str());
        if let Some(resolved) = cached_resolution(&record, version) {
            return Ok(resolved);
        }

        let _guard = self.locks.acquire(&target.package_id()).await;
        // A concurrent resolve may have updated the record while we waited
        let record = self.lookups.fresh(registry, name).unwrap_or(record);
        if let Some(resolved) = cached_resolution(&record, version) {
            return Ok(resolved);
        }

        let endpoint = self.endpoint(registry)?;
        let call = HookCall {
            registry,
            package: name,
            hook: "resolve",
        };
        let resolved = self
            .policy
            .call(endpoint.as_ref(), call, || endpoint.resolve(name, version, &record))
            .await?
            .ok_or_else(|| TrellisError::PackageNotFound {
                package: target.package_id(),
                range: version.to_string(),
            })?;

        let mut updated = (*record).clone();
        if let Some(entry) = updated.versions.get_mut(version) {
            entry.resolved = Some(resolved.clone());
        }
        if options.offline {
            self.lookups.remember(registry, name, updated);
        } else {
            self.lookups.store(registry, name, updated).await?;
        }
        Ok(resolved)
    }

    /// Publish a package directory through the registry's endpoint.
    pub async fn publish(&self, registry: &str, dir: &Path, config: &PackageConfig) -> Result<()> {
        let endpoint = self.endpoint(registry)?;
        let package = config.name.clone().unwrap_or_default();
        let call = HookCall {
            registry,
            package: &package,
            hook: "publish",
        };
        self.policy.call(endpoint.as_ref(), call, || endpoint.publish(dir, config)).await
    }
}

fn cached_resolution(record: &LookupRecord, version: &str) -> Option<ResolvedPackage> {
    record.versions.get(version).and_then(|entry| entry.resolved.clone())
}

/// Pick the version of `record` that `range` selects.
///
/// Tag ranges go through the registry's tags first and then match version keys
/// literally (git branches). Semver ranges take the highest satisfying stable
/// version, or a prerelease when `edge` is set or nothing stable matches.
fn match_version(record: &LookupRecord, range: &PackageRange, edge: bool) -> Option<(String, PackageVersion)> {
    if range.is_tag() {
        let tag = range.as_str();
        let key = record.tags.get(tag).cloned().or_else(|| record.versions.contains_key(tag).then(|| tag.to_string()))?;
        let version = PackageVersion::parse(&key);
        return Some((key, version));
    }

    let versions: Vec<(String, PackageVersion)> =
        record.versions.keys().map(|key| (key.clone(), PackageVersion::parse(key))).collect();
    let best = range.best_match(versions.iter().map(|(_, version)| version), edge)?;
    versions.into_iter().find(|(_, version)| *version == best)
}
