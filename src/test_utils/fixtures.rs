//! Package fixtures.
//!
//! A [`PackageFixture`] describes one published package: its manifest and a few
//! files. It can be written out as a directory (for `file:` and git sources) or packed
//! into a gzipped tarball with the usual `package/` prefix (for tarball sources).

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::PACKAGE_MANIFEST;
use crate::package::PackageConfig;
use crate::source::{HashAlgorithm, Integrity};

#[derive(Debug, Clone)]
pub struct PackageFixture {
    pub config: PackageConfig,
    /// `(relative path, content)`
    pub files: Vec<(String, String)>,
}

impl PackageFixture {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            config: PackageConfig {
                name: Some(name.to_string()),
                version: Some(version.to_string()),
                main: Some("index.js".to_string()),
                ..PackageConfig::default()
            },
            files: vec![("index.js".to_string(), format!("module.exports = '{name}@{version}';\n"))],
        }
    }

    pub fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.config.version.as_deref().unwrap_or_default()
    }

    pub fn dependency(mut self, name: &str, range: &str) -> Self {
        self.config.dependencies.insert(name.to_string(), range.to_string());
        self
    }

    pub fn peer_dependency(mut self, name: &str, range: &str) -> Self {
        self.config.peer_dependencies.insert(name.to_string(), range.to_string());
        self
    }

    pub fn optional_dependency(mut self, name: &str, range: &str) -> Self {
        self.config.optional_dependencies.insert(name.to_string(), range.to_string());
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    /// Write `package.json` and the files into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::write(dir.join(PACKAGE_MANIFEST), serde_json::to_string_pretty(&self.config)?)?;
        for (path, content) in &self.files {
            let file = dir.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&file, content)?;
        }
        Ok(dir.to_path_buf())
    }

    /// A gzipped tarball with every entry below `package/`.
    pub fn tarball(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let manifest = serde_json::to_vec_pretty(&self.config)?;
        append(&mut builder, PACKAGE_MANIFEST, &manifest)?;
        for (path, content) in &self.files {
            append(&mut builder, path, content.as_bytes())?;
        }
        let encoder = builder.into_inner().context("Failed to finish tarball")?;
        Ok(encoder.finish()?)
    }
}

fn append(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, path: &str, content: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1_700_000_000);
    header.set_cksum();
    builder.append_data(&mut header, format!("package/{path}"), content)?;
    Ok(())
}

/// SRI string (`sha512-<base64>`) for `bytes`.
pub fn sri(bytes: &[u8]) -> String {
    Integrity::compute(HashAlgorithm::Sha512, bytes).to_string()
}
