//! Test project setup.
//!
//! A [`TestProject`] owns a temporary directory holding the project, a private cache
//! and a directory of published package fixtures, plus a [`MemoryRegistry`] that the
//! installers it creates use as their default registry.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::fixtures::PackageFixture;
use super::registry::MemoryRegistry;
use crate::config::GlobalConfig;
use crate::constants::{DEFAULT_REGISTRY, PACKAGES_DIR, PROJECT_MANIFEST, TREE_FILE};
use crate::installer::Installer;
use crate::package::{ExactPackage, PackageConfig};
use crate::source::SourceLocator;
use crate::tree::ResolveTree;

pub struct TestProject {
    pub temp_dir: TempDir,
    pub project_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Published package directories
    pub packages_root: PathBuf,
    pub registry: Arc<MemoryRegistry>,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        super::init_test_logging(None);

        let temp_dir = TempDir::new()?;
        let project_dir = temp_dir.path().join("project");
        let cache_dir = temp_dir.path().join("cache");
        let packages_root = temp_dir.path().join("published");
        for dir in [&project_dir, &cache_dir, &packages_root] {
            fs::create_dir_all(dir)?;
        }

        Ok(Self {
            temp_dir,
            project_dir,
            cache_dir,
            packages_root,
            registry: Arc::new(MemoryRegistry::new()),
        })
    }

    /// Global configuration pointing at the private cache.
    pub fn config(&self) -> GlobalConfig {
        GlobalConfig {
            cache_dir: Some(self.cache_dir.clone()),
            max_retries: 1,
            ..GlobalConfig::default()
        }
    }

    /// A fresh installer serving the default registry from [`Self::registry`].
    ///
    /// Lookups are remembered per installer, so create a new one after publishing
    /// versions the previous one already looked up.
    pub fn installer(&self) -> Result<Installer> {
        let installer = Installer::new(&self.project_dir, self.config())?;
        installer.registries().register_endpoint(DEFAULT_REGISTRY, self.registry.clone());
        Ok(installer)
    }

    /// Write `fixture` as a directory and publish it on the default registry.
    pub fn publish(&self, fixture: &PackageFixture) -> Result<PathBuf> {
        let dir_name = format!("{}@{}", fixture.name().replace('/', "+"), fixture.version());
        let dir = fixture.write_to(&self.packages_root.join(dir_name))?;
        let source = SourceLocator::File {
            path: dir.clone(),
        };
        self.registry.add(fixture.name(), fixture.version(), source);
        Ok(dir)
    }

    pub fn write_manifest(&self, content: &str) -> Result<()> {
        fs::write(self.project_dir.join(PROJECT_MANIFEST), content).context("Failed to write project manifest")
    }

    pub fn manifest(&self) -> Result<PackageConfig> {
        PackageConfig::load_project(&self.project_dir.join(PROJECT_MANIFEST))
    }

    pub fn tree_file(&self) -> PathBuf {
        self.project_dir.join(TREE_FILE)
    }

    pub async fn tree(&self) -> Result<ResolveTree> {
        ResolveTree::load(&self.tree_file()).await
    }

    /// Where `exact` is placed inside the project.
    pub fn installed(&self, exact: &str) -> Result<PathBuf> {
        let exact: ExactPackage = exact.parse()?;
        Ok(self.project_dir.join(PACKAGES_DIR).join(exact.install_path()))
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}
