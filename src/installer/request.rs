//! Install requests: one unit of intent, consumed once by an install pass.

use serde_json::Value;
use std::sync::Arc;

use crate::core::TrellisError;
use crate::package::{DeclaredDependency, DependencyKind, DependencyTarget, ExactPackage, PackageTarget};
use crate::source::SourceLocator;

/// Role a request plays in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Declared by the project
    Primary,
    /// Declared by the project as a development dependency
    Dev,
    /// Deduplicated against the project's own resolution
    Peer,
    /// Failure is reported and skipped
    Optional,
    /// Required by another package
    Secondary,
}

impl RequestType {
    /// Role of a dependency declared by a package (`top_level == false`) or by the
    /// project itself.
    #[must_use]
    pub const fn from_declared(kind: DependencyKind, top_level: bool) -> Self {
        match (kind, top_level) {
            (DependencyKind::Peer, _) => Self::Peer,
            (DependencyKind::Optional, _) => Self::Optional,
            (DependencyKind::Dev, true) => Self::Dev,
            (_, true) => Self::Primary,
            (_, false) => Self::Secondary,
        }
    }

    /// Manifest section a top-level request is saved in.
    #[must_use]
    pub const fn manifest_kind(self) -> DependencyKind {
        match self {
            Self::Dev => DependencyKind::Dev,
            Self::Peer => DependencyKind::Peer,
            Self::Optional => DependencyKind::Optional,
            Self::Primary | Self::Secondary => DependencyKind::Normal,
        }
    }
}

/// Exact packages above a request, root first.
///
/// Shared between siblings; extending it copies.
#[derive(Debug, Clone, Default)]
pub struct Ancestry(Arc<Vec<ExactPackage>>);

impl Ancestry {
    #[must_use]
    pub fn contains(&self, exact: &ExactPackage) -> bool {
        self.0.contains(exact)
    }

    #[must_use]
    pub fn child(&self, exact: &ExactPackage) -> Self {
        let mut chain = Vec::with_capacity(self.0.len() + 1);
        chain.extend(self.0.iter().cloned());
        chain.push(exact.clone());
        Self(Arc::new(chain))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Something to install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Name the dependency is recorded under. Resource installs may leave it unset and
    /// use the name from the fetched manifest.
    pub name: Option<String>,
    /// `None` for top-level requests
    pub parent: Option<ExactPackage>,
    pub target: DependencyTarget,
    pub kind: RequestType,
    /// Manifest override to apply to the installed package
    pub override_value: Option<Value>,
    pub ancestry: Ancestry,
}

impl InstallRequest {
    /// A primary request for a registry package.
    #[must_use]
    pub fn package(target: PackageTarget) -> Self {
        Self {
            name: Some(target.name.clone()),
            parent: None,
            target: DependencyTarget::Package(target),
            kind: RequestType::Primary,
            override_value: None,
            ancestry: Ancestry::default(),
        }
    }

    /// A primary request for a literal source.
    #[must_use]
    pub fn resource(name: Option<String>, source: SourceLocator) -> Self {
        Self {
            name,
            parent: None,
            target: DependencyTarget::Resource(source),
            kind: RequestType::Primary,
            override_value: None,
            ancestry: Ancestry::default(),
        }
    }

    /// Parse a primary request: a locator, or `[registry:]name[@range]`.
    pub fn parse(input: &str, default_registry: &str) -> Result<Self, TrellisError> {
        if SourceLocator::looks_like(input) {
            return SourceLocator::parse(input).map(|source| Self::resource(None, source));
        }
        PackageTarget::parse_with_default(input, default_registry).map(Self::package)
    }

    /// A request for a dependency declared by `parent` (or the project when `None`).
    #[must_use]
    pub fn declared(dependency: DeclaredDependency, parent: Option<&ExactPackage>, ancestry: Ancestry) -> Self {
        Self {
            kind: RequestType::from_declared(dependency.kind, parent.is_none()),
            name: Some(dependency.name),
            parent: parent.cloned(),
            target: dependency.target,
            override_value: None,
            ancestry,
        }
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: RequestType) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_override(mut self, value: Value) -> Self {
        self.override_value = Some(value);
        self
    }

    /// Requests recorded at the top level of the tree.
    #[must_use]
    pub const fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Human readable description for logs and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.name, &self.target) {
            (Some(name), DependencyTarget::Package(target)) if *name != target.name => format!("{name} ({target})"),
            (Some(name), DependencyTarget::Resource(source)) => format!("{name} ({source})"),
            (_, target) => target.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let request = InstallRequest::parse("lodash@^4.0.0", "npm").unwrap();
        assert_eq!(request.name.as_deref(), Some("lodash"));
        assert_eq!(request.kind, RequestType::Primary);
        assert!(matches!(request.target, DependencyTarget::Package(ref t) if t.registry == "npm"));

        let resource = InstallRequest::parse("git+https://example.com/repo.git#main", "npm").unwrap();
        assert!(resource.name.is_none());
        assert!(matches!(resource.target, DependencyTarget::Resource(SourceLocator::Git { .. })));

        assert!(InstallRequest::parse("@scope", "npm").is_err());
    }

    #[test]
    fn test_declared_roles() {
        assert_eq!(RequestType::from_declared(DependencyKind::Normal, true), RequestType::Primary);
        assert_eq!(RequestType::from_declared(DependencyKind::Normal, false), RequestType::Secondary);
        assert_eq!(RequestType::from_declared(DependencyKind::Dev, true), RequestType::Dev);
        assert_eq!(RequestType::from_declared(DependencyKind::Peer, false), RequestType::Peer);
        assert_eq!(RequestType::from_declared(DependencyKind::Optional, true), RequestType::Optional);
        assert_eq!(RequestType::Dev.manifest_kind(), DependencyKind::Dev);
    }

    #[test]
    fn test_ancestry_is_copied_on_extend() {
        let root = Ancestry::default();
        let a: ExactPackage = "npm:a@1.0.0".parse().unwrap();
        let b: ExactPackage = "npm:b@1.0.0".parse().unwrap();
        let under_a = root.child(&a);
        let under_b = under_a.child(&b);
        assert!(root.is_empty());
        assert_eq!(under_a.len(), 1);
        assert!(under_b.contains(&a) && under_b.contains(&b));
        assert!(!under_a.contains(&b));
    }
}
