//! Package identity types.
//!
//! Every package the engine touches is addressed by a registry, a name and a version:
//!
//! - [`PackageTarget`] - a requirement: `registry:name@range`
//! - [`ExactPackage`] - a resolved package: `registry:name@version`. This is the key used
//!   throughout the install tree, the materialization map and the project layout.
//! - [`DependencyTarget`] - what a dependency string declares, either a registry package
//!   or a literal [`SourceLocator`]
//!
//! Names follow npm rules loosely: a plain name, or `@scope/name`.

pub mod config;
pub mod overrides;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::TrellisError;
use crate::source::SourceLocator;
use crate::version::{PackageRange, PackageVersion};

pub use config::{DeclaredDependency, DependencyKind, PackageConfig};
pub use overrides::{OVERRIDE_KEYS, override_package_config, validate_override};

/// Split `registry:rest` when the prefix is a plausible registry name.
fn split_registry(input: &str) -> (Option<&str>, &str) {
    if let Some((prefix, rest)) = input.split_once(':') {
        let plausible = !prefix.is_empty()
            && prefix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if plausible {
            return (Some(prefix), rest);
        }
    }
    (None, input)
}

/// Split `name@version`, keeping the leading `@` of scoped names.
fn split_version(input: &str) -> (&str, Option<&str>) {
    let search_from = usize::from(input.starts_with('@'));
    match input[search_from..].find('@') {
        Some(idx) => {
            let at = idx + search_from;
            (&input[..at], Some(&input[at + 1..]))
        }
        None => (input, None),
    }
}

/// Validate a package name, returning the reason it is malformed.
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("package name is empty".to_string());
    }
    if name.chars().any(char::is_whitespace) {
        return Err("package names cannot contain whitespace".to_string());
    }
    if let Some(scoped) = name.strip_prefix('@') {
        let Some((scope, base)) = scoped.split_once('/') else {
            return Err("scoped names must have the form @scope/name".to_string());
        };
        if scope.is_empty() {
            return Err("scope is empty".to_string());
        }
        if base.is_empty() {
            return Err("scoped package name is empty".to_string());
        }
        if base.contains('/') {
            return Err("scoped names may contain only one '/'".to_string());
        }
    } else if name.contains('/') {
        return Err("unscoped names cannot contain '/'".to_string());
    }
    if name.starts_with('.') || name.contains("..") {
        return Err("package names cannot start with '.' or contain '..'".to_string());
    }
    Ok(())
}

fn invalid(target: &str, reason: impl Into<String>) -> TrellisError {
    TrellisError::InvalidTarget {
        target: target.to_string(),
        reason: reason.into(),
    }
}

/// A package requirement: registry, name and version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTarget {
    /// Registry the package is resolved against
    pub registry: String,
    /// Package name, possibly scoped
    pub name: String,
    /// Accepted versions
    pub range: PackageRange,
}

impl PackageTarget {
    /// Parse `registry:name@range`. The registry is required.
    pub fn parse(input: &str) -> Result<Self, TrellisError> {
        let trimmed = input.trim();
        match split_registry(trimmed) {
            (Some(registry), rest) => Self::parse_parts(trimmed, registry, rest),
            (None, _) => Err(invalid(trimmed, "missing registry prefix (e.g. 'npm:')")),
        }
    }

    /// Parse `[registry:]name[@range]`, falling back to `default_registry`.
    pub fn parse_with_default(input: &str, default_registry: &str) -> Result<Self, TrellisError> {
        let trimmed = input.trim();
        let (registry, rest) = split_registry(trimmed);
        Self::parse_parts(trimmed, registry.unwrap_or(default_registry), rest)
    }

    fn parse_parts(raw: &str, registry: &str, rest: &str) -> Result<Self, TrellisError> {
        let (name, range) = split_version(rest);
        validate_name(name).map_err(|reason| invalid(raw, reason))?;
        let range = match range {
            Some(r) => PackageRange::parse(r)?,
            None => PackageRange::any(),
        };
        Ok(Self {
            registry: registry.to_string(),
            name: name.to_string(),
            range,
        })
    }

    /// Build a target from its parts.
    pub fn new(registry: impl Into<String>, name: impl Into<String>, range: PackageRange) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            range,
        }
    }

    /// `registry:name`, without the range.
    #[must_use]
    pub fn package_id(&self) -> String {
        format!("{}:{}", self.registry, self.name)
    }

    /// True when `exact` is the same registry package and its version is in range.
    #[must_use]
    pub fn has(&self, exact: &ExactPackage, edge: bool) -> bool {
        self.same_package(exact) && self.range.has(&exact.version, edge)
    }

    /// True when `exact` names the same registry and package, ignoring versions.
    #[must_use]
    pub fn same_package(&self, exact: &ExactPackage) -> bool {
        self.registry == exact.registry && self.name == exact.name
    }

    /// Intersect with another target for the same package.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.registry != other.registry || self.name != other.name {
            return None;
        }
        self.range.intersect(&other.range).map(|range| Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            range,
        })
    }

    /// Re-anchor the range on `version`, keeping its operator style.
    #[must_use]
    pub fn rebase(&self, version: &PackageVersion) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            range: self.range.rebase(version),
        }
    }

    /// The exact package this target resolves to at `version`.
    #[must_use]
    pub fn at(&self, version: PackageVersion) -> ExactPackage {
        ExactPackage {
            registry: self.registry.clone(),
            name: self.name.clone(),
            version,
        }
    }
}

impl fmt::Display for PackageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range.as_str().is_empty() {
            write!(f, "{}:{}", self.registry, self.name)
        } else {
            write!(f, "{}:{}@{}", self.registry, self.name, self.range)
        }
    }
}

/// A fully resolved package, serialized `registry:name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExactPackage {
    /// Registry the package was resolved from
    pub registry: String,
    /// Package name, possibly scoped
    pub name: String,
    /// Concrete version
    pub version: PackageVersion,
}

impl ExactPackage {
    /// Build an exact package from its parts.
    pub fn new(registry: impl Into<String>, name: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            version,
        }
    }

    /// `registry:name`, without the version.
    #[must_use]
    pub fn package_id(&self) -> String {
        format!("{}:{}", self.registry, self.name)
    }

    /// Install location relative to the packages directory: `<registry>/<name>@<version>`.
    #[must_use]
    pub fn install_path(&self) -> PathBuf {
        PathBuf::from(&self.registry).join(format!("{}@{}", self.name, self.version))
    }
}

impl FromStr for ExactPackage {
    type Err = TrellisError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (Some(registry), rest) = split_registry(trimmed) else {
            return Err(invalid(trimmed, "missing registry prefix"));
        };
        let (name, version) = split_version(rest);
        validate_name(name).map_err(|reason| invalid(trimmed, reason))?;
        let version = version
            .and_then(crate::version::range::parse_exact_version)
            .ok_or_else(|| invalid(trimmed, "an exact version is required"))?;
        Ok(Self {
            registry: registry.to_string(),
            name: name.to_string(),
            version,
        })
    }
}

impl TryFrom<String> for ExactPackage {
    type Error = TrellisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExactPackage> for String {
    fn from(value: ExactPackage) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ExactPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.registry, self.name, self.version)
    }
}

/// What a dependency declaration points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyTarget {
    /// A package resolved through a registry
    Package(PackageTarget),
    /// A literal source (git, tarball URL, local path)
    Resource(SourceLocator),
}

impl DependencyTarget {
    /// Interpret the value of a `name = "value"` dependency declaration.
    ///
    /// Locator strings become resources, `registry:other@range` is an alias, anything
    /// else is a range for `name` on `default_registry`.
    pub fn parse(name: &str, value: &str, default_registry: &str) -> Result<Self, TrellisError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TrellisError::MissingRange {
                name: name.to_string(),
            });
        }
        if SourceLocator::looks_like(value) {
            return SourceLocator::parse(value).map(Self::Resource);
        }
        if let (Some(_), _) = split_registry(value) {
            return PackageTarget::parse(value).map(Self::Package);
        }
        validate_name(name).map_err(|reason| invalid(name, reason))?;
        Ok(Self::Package(PackageTarget {
            registry: default_registry.to_string(),
            name: name.to_string(),
            range: PackageRange::parse(value)?,
        }))
    }
}

impl fmt::Display for DependencyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package(target) => write!(f, "{target}"),
            Self::Resource(source) => write!(f, "{source}"),
        }
    }
}
