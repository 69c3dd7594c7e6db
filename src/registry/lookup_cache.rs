//! Lookup records, on disk and in memory.
//!
//! Disk records (`<cacheRoot>/registry_cache/<registry>/<name>.json`) survive between
//! runs and are revalidated with the endpoint before use. The in-memory map holds the
//! records this manager instance already fetched or revalidated, which are trusted
//! for the rest of its lifetime.

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::endpoint::LookupRecord;
use crate::utils::fs::atomic_write;

#[derive(Debug)]
pub struct LookupCache {
    dir: PathBuf,
    memory: DashMap<String, Arc<LookupRecord>>,
}

fn key(registry: &str, name: &str) -> String {
    format!("{registry}:{name}")
}

impl LookupCache {
    /// Cache rooted at `<cache_root>/registry_cache`.
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: cache_root.join("registry_cache"),
            memory: DashMap::new(),
        }
    }

    /// Scoped names keep their `@scope/` directory.
    fn path(&self, registry: &str, name: &str) -> PathBuf {
        self.dir.join(registry).join(format!("{name}.json"))
    }

    /// A record already fetched by this instance.
    #[must_use]
    pub fn fresh(&self, registry: &str, name: &str) -> Option<Arc<LookupRecord>> {
        self.memory.get(&key(registry, name)).map(|r| r.clone())
    }

    /// The persisted record, if any. Corrupt files are ignored.
    pub async fn stored(&self, registry: &str, name: &str) -> Option<LookupRecord> {
        let path = self.path(registry, name);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(target: "registry", "Ignoring corrupt lookup cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Mark `record` fresh for this instance without writing it.
    pub fn remember(&self, registry: &str, name: &str, record: LookupRecord) -> Arc<LookupRecord> {
        let record = Arc::new(record);
        self.memory.insert(key(registry, name), record.clone());
        record
    }

    /// Store `record` in memory and on disk.
    pub async fn store(&self, registry: &str, name: &str, record: LookupRecord) -> Result<Arc<LookupRecord>> {
        let path = self.path(registry, name);
        let content = serde_json::to_vec(&record).context("Failed to serialize lookup record")?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &content))
            .await
            .context("lookup cache write panicked")??;
        Ok(self.remember(registry, name, record))
    }
}
