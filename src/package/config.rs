//! Normalized package manifests.
//!
//! [`PackageConfig`] is the subset of a manifest the resolver consumes. Downloaded
//! packages carry it as `package.json`; the project declares it in `trellis.toml`.
//! Unknown fields are ignored in both formats.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::DependencyTarget;
use crate::constants::PACKAGE_MANIFEST;
use crate::core::TrellisError;
use crate::utils::fs::atomic_write;

/// Dependency section a declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// `dependencies`
    Normal,
    /// `devDependencies`, only honored for the project itself
    Dev,
    /// `peerDependencies`
    Peer,
    /// `optionalDependencies`
    Optional,
}

/// One parsed dependency declaration.
#[derive(Debug, Clone)]
pub struct DeclaredDependency {
    /// Key the dependency is declared under (the name it is resolved as)
    pub name: String,
    /// What it points at
    pub target: DependencyTarget,
    /// Section it was declared in
    pub kind: DependencyKind,
}

/// Manifest fields consumed by the resolver and installer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Registry bare dependency ranges resolve against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, alias = "peer-dependencies", skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, alias = "optional-dependencies", skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, alias = "dev-dependencies", skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    /// Per-target overrides, keyed by the target string they apply to
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, Value>,
}

impl PackageConfig {
    /// Parse a `package.json` document.
    pub fn from_json_str(content: &str) -> Result<Self, TrellisError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Read `package.json` from a package directory. A missing manifest yields an
    /// empty config; packages without one simply have no dependencies.
    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(PACKAGE_MANIFEST);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid package manifest: {}", path.display()))
    }

    /// Load the project manifest (TOML). A missing file is an empty project.
    pub fn load_project(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read project manifest: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&content)
            .map_err(TrellisError::from)
            .with_context(|| format!("Invalid TOML in project manifest: {}", path.display()))
    }

    /// Write the project manifest atomically.
    pub fn save_project(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| format!("Failed to serialize {}", path.display()))?;
        atomic_write(path, content.as_bytes())
    }

    /// Parse every declaration into typed targets.
    ///
    /// `include_dev` is set for the project manifest only. Bare ranges resolve on the
    /// manifest's own `registry`, else `default_registry`.
    pub fn dependency_targets(
        &self,
        default_registry: &str,
        include_dev: bool,
    ) -> Result<Vec<DeclaredDependency>, TrellisError> {
        let registry = self.registry.as_deref().unwrap_or(default_registry);
        let mut sections = vec![
            (&self.dependencies, DependencyKind::Normal),
            (&self.peer_dependencies, DependencyKind::Peer),
            (&self.optional_dependencies, DependencyKind::Optional),
        ];
        if include_dev {
            sections.push((&self.dev_dependencies, DependencyKind::Dev));
        }

        let mut declared = Vec::new();
        for (section, kind) in sections {
            for (name, value) in section {
                declared.push(DeclaredDependency {
                    name: name.clone(),
                    target: DependencyTarget::parse(name, value, registry)?,
                    kind,
                });
            }
        }
        Ok(declared)
    }

    /// The declaration for `name`, searched across all sections.
    #[must_use]
    pub fn declared(&self, name: &str) -> Option<(&str, DependencyKind)> {
        [
            (&self.dependencies, DependencyKind::Normal),
            (&self.dev_dependencies, DependencyKind::Dev),
            (&self.peer_dependencies, DependencyKind::Peer),
            (&self.optional_dependencies, DependencyKind::Optional),
        ]
        .into_iter()
        .find_map(|(section, kind)| section.get(name).map(|v| (v.as_str(), kind)))
    }

    /// Declare `name` in the section for `kind`, removing it from the others.
    /// Returns true when the manifest changed.
    pub fn set_dependency(&mut self, name: &str, value: &str, kind: DependencyKind) -> bool {
        if self.declared(name) == Some((value, kind)) {
            return false;
        }
        self.remove_dependency(name);
        self.section_mut(kind).insert(name.to_string(), value.to_string());
        true
    }

    /// Remove `name` from every section. Returns true when it was declared.
    pub fn remove_dependency(&mut self, name: &str) -> bool {
        let mut removed = false;
        for kind in [
            DependencyKind::Normal,
            DependencyKind::Dev,
            DependencyKind::Peer,
            DependencyKind::Optional,
        ] {
            removed |= self.section_mut(kind).remove(name).is_some();
        }
        removed
    }

    fn section_mut(&mut self, kind: DependencyKind) -> &mut BTreeMap<String, String> {
        match kind {
            DependencyKind::Normal => &mut self.dependencies,
            DependencyKind::Dev => &mut self.dev_dependencies,
            DependencyKind::Peer => &mut self.peer_dependencies,
            DependencyKind::Optional => &mut self.optional_dependencies,
        }
    }
}
