//! In-memory registry endpoint.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::package::PackageConfig;
use crate::registry::{HookError, LookupOutcome, LookupRecord, RegistryEndpoint, ResolvedPackage, VersionEntry};
use crate::source::SourceLocator;
use crate::version::PackageRange;

/// Registry whose packages are published directly by the test.
///
/// Lookups always answer from the current contents, so a package published after a
/// lookup shows up on the next one.
#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<BTreeMap<String, LookupRecord>>,
    lookups: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<R>(&self, name: &str, f: impl FnOnce(&mut LookupRecord) -> R) -> R {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(records.entry(name.to_string()).or_default())
    }

    /// Publish `name@version` served from `source`.
    pub fn add(&self, name: &str, version: &str, source: SourceLocator) {
        self.add_with_config(name, version, source, None);
    }

    /// Publish with a registry-supplied manifest.
    pub fn add_with_config(&self, name: &str, version: &str, source: SourceLocator, config: Option<PackageConfig>) {
        self.with_record(name, |record| {
            record.versions.insert(
                version.to_string(),
                VersionEntry {
                    meta: serde_json::json!({ "source": source.to_string() }),
                    resolved: Some(ResolvedPackage {
                        source,
                        config,
                        override_value: None,
                    }),
                },
            );
        });
    }

    pub fn tag(&self, name: &str, tag: &str, version: &str) {
        self.with_record(name, |record| {
            record.tags.insert(tag.to_string(), version.to_string());
        });
    }

    /// Make `name` a redirect to `to` (`[registry:]name`).
    pub fn redirect(&self, name: &str, to: &str) {
        self.with_record(name, |record| record.redirect = Some(to.to_string()));
    }

    /// Number of `lookup` calls served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryEndpoint for MemoryRegistry {
    async fn lookup(
        &self,
        name: &str,
        _range: &PackageRange,
        _cached: Option<&LookupRecord>,
    ) -> Result<LookupOutcome, HookError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(name).cloned().map_or(LookupOutcome::NotFound, LookupOutcome::Found))
    }

    async fn resolve(
        &self,
        _name: &str,
        version: &str,
        lookup: &LookupRecord,
    ) -> Result<Option<ResolvedPackage>, HookError> {
        Ok(lookup.versions.get(version).and_then(|entry| entry.resolved.clone()))
    }
}
