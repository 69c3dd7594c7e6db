//! Persisted form of the install tree (`trellis.lock`).
//!
//! ```toml
//! [resolve]
//! left-pad = "npm:left-pad@1.3.0"
//!
//! [dependencies."npm:left-pad@1.3.0"]
//! source = "https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz#sha512-..."
//!
//! [dependencies."npm:left-pad@1.3.0".resolve]
//! tiny = "npm:tiny@0.1.0"
//! ```
//!
//! All tables are keyed by their textual form and sorted alphabetically, so saving an
//! unchanged tree reproduces the file byte for byte.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{ResolveTree, TreeEntry};
use crate::core::TrellisError;
use crate::package::ExactPackage;
use crate::source::SourceLocator;
use crate::utils::fs::atomic_write;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTree {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    resolve: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dependencies: BTreeMap<String, PersistedEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    resolve: BTreeMap<String, String>,
}

fn resolve_map(map: &BTreeMap<String, ExactPackage>) -> BTreeMap<String, String> {
    map.iter().map(|(name, exact)| (name.clone(), exact.to_string())).collect()
}

fn parse_resolve_map(map: BTreeMap<String, String>) -> Result<BTreeMap<String, ExactPackage>, TrellisError> {
    map.into_iter().map(|(name, exact)| Ok((name, exact.parse()?))).collect()
}

impl ResolveTree {
    /// Render the tree as TOML.
    pub fn serialize(&self) -> Result<String> {
        let persisted = PersistedTree {
            resolve: resolve_map(&self.resolve),
            dependencies: self
                .dependencies
                .iter()
                .map(|(exact, entry)| {
                    (
                        exact.to_string(),
                        PersistedEntry {
                            source: entry.source.as_ref().map(ToString::to_string),
                            resolve: resolve_map(&entry.resolve),
                        },
                    )
                })
                .collect(),
        };
        toml::to_string_pretty(&persisted).context("Failed to serialize install tree")
    }

    /// Parse the TOML form produced by [`ResolveTree::serialize`].
    pub fn deserialize(content: &str) -> Result<Self> {
        let persisted: PersistedTree = toml::from_str(content).map_err(TrellisError::from)?;
        let mut dependencies = BTreeMap::new();
        for (key, entry) in persisted.dependencies {
            let exact: ExactPackage = key.parse()?;
            let source = entry.source.as_deref().map(SourceLocator::parse).transpose()?;
            dependencies.insert(
                exact,
                TreeEntry {
                    source,
                    resolve: parse_resolve_map(entry.resolve)?,
                },
            );
        }
        Ok(Self {
            resolve: parse_resolve_map(persisted.resolve)?,
            dependencies,
        })
    }

    /// Load from `path`. A missing file is an empty tree.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::deserialize(&content)
                .with_context(|| format!("Failed to parse install tree {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read install tree {}", path.display())),
        }
    }

    /// Atomically write the tree to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.serialize()?;
        atomic_write(path, content.as_bytes())
            .with_context(|| format!("Failed to write install tree {}", path.display()))
    }
}
