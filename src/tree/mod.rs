//! The install tree.
//!
//! [`ResolveTree`] records which exact package every dependency edge resolved to:
//!
//! - `resolve` - top-level (primary) name to [`ExactPackage`]
//! - `dependencies` - for every installed package, where its files came from and what
//!   each of its own dependencies resolved to
//!
//! Every value is an exact package, never a range. The tree is loaded at the start of an
//! install pass, mutated while the pass runs and written back (see [`io`]) only when the
//! whole pass succeeded.

pub mod io;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;

use crate::core::TrellisError;
use crate::package::{ExactPackage, PackageTarget};
use crate::source::SourceLocator;

/// Per-package record: where it came from and what its dependencies resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeEntry {
    pub source: Option<SourceLocator>,
    pub resolve: BTreeMap<String, ExactPackage>,
}

/// One edge of the tree, as handed out by [`ResolveTree::resolutions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Dependency name as declared by the parent
    pub name: String,
    /// `None` for top-level resolutions
    pub parent: Option<ExactPackage>,
    pub exact: ExactPackage,
}

/// A name/range query against installed packages: `[registry:]name[@range]`.
///
/// Without a registry prefix the selector matches packages from any registry.
#[derive(Debug, Clone)]
pub struct Selector {
    target: PackageTarget,
    any_registry: bool,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, TrellisError> {
        let target = PackageTarget::parse_with_default(input, "")?;
        Ok(Self {
            any_registry: target.registry.is_empty(),
            target,
        })
    }

    #[must_use]
    pub fn matches(&self, exact: &ExactPackage) -> bool {
        (self.any_registry || self.target.registry == exact.registry)
            && self.target.name == exact.name
            && self.target.range.has(&exact.version, true)
    }

    /// The package name the selector asks for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.target.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveTree {
    resolve: BTreeMap<String, ExactPackage>,
    dependencies: BTreeMap<ExactPackage, TreeEntry>,
}

impl ResolveTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolve.is_empty() && self.dependencies.is_empty()
    }

    /// What `name` resolved to, at the top level (`parent == None`) or under `parent`.
    #[must_use]
    pub fn get_resolution(&self, name: &str, parent: Option<&ExactPackage>) -> Option<&ExactPackage> {
        match parent {
            None => self.resolve.get(name),
            Some(parent) => self.dependencies.get(parent).and_then(|entry| entry.resolve.get(name)),
        }
    }

    /// Record that `name` resolves to `exact`. Returns whether anything changed.
    ///
    /// The resolved package gets an entry of its own so it is visible to traversal
    /// before its source is known.
    pub fn set_resolution(&mut self, name: &str, exact: ExactPackage, parent: Option<&ExactPackage>) -> bool {
        self.dependencies.entry(exact.clone()).or_default();
        let map = match parent {
            None => &mut self.resolve,
            Some(parent) => &mut self.dependencies.entry(parent.clone()).or_default().resolve,
        };
        match map.get(name) {
            Some(existing) if *existing == exact => false,
            _ => {
                map.insert(name.to_string(), exact);
                true
            }
        }
    }

    /// Drop the resolution of `name`, returning what it pointed at.
    pub fn remove_resolution(&mut self, name: &str, parent: Option<&ExactPackage>) -> Option<ExactPackage> {
        match parent {
            None => self.resolve.remove(name),
            Some(parent) => self.dependencies.get_mut(parent).and_then(|entry| entry.resolve.remove(name)),
        }
    }

    #[must_use]
    pub fn get_source(&self, exact: &ExactPackage) -> Option<&SourceLocator> {
        self.dependencies.get(exact).and_then(|entry| entry.source.as_ref())
    }

    /// Record the source of `exact`. Returns whether anything changed.
    ///
    /// A resolved package has exactly one source: recording a different one is an
    /// internal error. Use [`ResolveTree::replace_source`] when the source legitimately
    /// changes (linking, checkout).
    pub fn set_source(&mut self, exact: &ExactPackage, source: SourceLocator) -> Result<bool, TrellisError> {
        let entry = self.dependencies.entry(exact.clone()).or_default();
        match &entry.source {
            Some(existing) if *existing == source => Ok(false),
            Some(existing) => Err(TrellisError::internal(format!(
                "conflicting sources for {exact}: {existing} and {source}"
            ))),
            None => {
                entry.source = Some(source);
                Ok(true)
            }
        }
    }

    /// Record a new source for `exact`, discarding the old one.
    pub fn replace_source(&mut self, exact: &ExactPackage, source: SourceLocator) -> bool {
        let entry = self.dependencies.entry(exact.clone()).or_default();
        if entry.source.as_ref() == Some(&source) {
            return false;
        }
        entry.source = Some(source);
        true
    }

    #[must_use]
    pub fn entry(&self, exact: &ExactPackage) -> Option<&TreeEntry> {
        self.dependencies.get(exact)
    }

    /// Top-level resolutions in name order.
    pub fn primaries(&self) -> impl Iterator<Item = (&String, &ExactPackage)> {
        self.resolve.iter()
    }

    /// Every package with an entry, in key order.
    pub fn packages(&self) -> impl Iterator<Item = &ExactPackage> {
        self.dependencies.keys()
    }

    /// All edges, primaries first, then each parent's secondaries in key order.
    #[must_use]
    pub fn resolutions(&self) -> Vec<Resolution> {
        let mut out = Vec::new();
        self.visit(|name, exact, parent| {
            out.push(Resolution {
                name: name.to_string(),
                parent: parent.cloned(),
                exact: exact.clone(),
            });
            false
        });
        out
    }

    /// Highest version of `target`'s package already present anywhere in the tree
    /// that the target's range accepts.
    #[must_use]
    pub fn get_best_match(&self, target: &PackageTarget, edge: bool) -> Option<ExactPackage> {
        let installed: BTreeSet<&ExactPackage> = self
            .dependencies
            .keys()
            .chain(self.resolve.values())
            .filter(|exact| target.same_package(exact))
            .collect();
        target
            .range
            .best_match(installed.iter().map(|exact| &exact.version), edge)
            .map(|version| target.at(version))
    }

    /// Every installed package matching `selector`, deduplicated and sorted.
    pub fn select_all(&self, selector: &str) -> Result<Vec<ExactPackage>, TrellisError> {
        let selector = Selector::parse(selector)?;
        let matches: BTreeSet<ExactPackage> = self
            .dependencies
            .keys()
            .chain(self.resolve.values())
            .filter(|exact| selector.matches(exact))
            .cloned()
            .collect();
        Ok(matches.into_iter().collect())
    }

    /// The single installed package matching `selector`.
    ///
    /// Fails with [`TrellisError::NotInstalled`] when nothing matches and with
    /// [`TrellisError::AmbiguousSelector`] when more than one package does.
    pub fn select(&self, selector: &str) -> Result<ExactPackage, TrellisError> {
        let mut matches = self.select_all(selector)?;
        match matches.len() {
            0 => Err(TrellisError::NotInstalled {
                selector: selector.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(TrellisError::AmbiguousSelector {
                selector: selector.to_string(),
                matches: matches.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            }),
        }
    }

    /// Call `visitor(name, exact, parent)` for every edge: primary entries first, then
    /// every parent's secondary entries. Stops as soon as the visitor returns `true`,
    /// and reports whether it did.
    pub fn visit<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&str, &ExactPackage, Option<&ExactPackage>) -> bool,
    {
        for (name, exact) in &self.resolve {
            if visitor(name, exact, None) {
                return true;
            }
        }
        for (parent, entry) in &self.dependencies {
            for (name, exact) in &entry.resolve {
                if visitor(name, exact, Some(parent)) {
                    return true;
                }
            }
        }
        false
    }

    /// Async form of [`ResolveTree::visit`]. The visitor gets owned copies of each edge
    /// taken from a snapshot, so it may hold them across awaits.
    pub async fn visit_async<F, Fut>(&self, mut visitor: F) -> anyhow::Result<bool>
    where
        F: FnMut(Resolution) -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        for resolution in self.resolutions() {
            if visitor(resolution).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Packages reachable from the top-level resolutions.
    #[must_use]
    pub fn reachable(&self) -> BTreeSet<ExactPackage> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&ExactPackage> = self.resolve.values().collect();
        while let Some(exact) = queue.pop_front() {
            if !seen.insert(exact.clone()) {
                continue;
            }
            if let Some(entry) = self.dependencies.get(exact) {
                queue.extend(entry.resolve.values());
            }
        }
        seen
    }

    /// Delete entries no top-level resolution reaches. Returns the removed packages.
    pub fn remove_unreachable(&mut self) -> Vec<ExactPackage> {
        let reachable = self.reachable();
        let unreachable: Vec<ExactPackage> =
            self.dependencies.keys().filter(|exact| !reachable.contains(*exact)).cloned().collect();
        for exact in &unreachable {
            self.dependencies.remove(exact);
        }
        if !unreachable.is_empty() {
            tracing::debug!(target: "installer", "Dropped {} unreachable tree entries", unreachable.len());
        }
        unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(s: &str) -> ExactPackage {
        s.parse().unwrap()
    }

    fn sample() -> ResolveTree {
        let mut tree = ResolveTree::new();
        let a = exact("npm:a@1.0.0");
        let b = exact("npm:b@2.0.0");
        tree.set_resolution("a", a.clone(), None);
        tree.set_resolution("b", b.clone(), Some(&a));
        tree.set_resolution("c", exact("npm:c@1.1.0"), Some(&b));
        tree.set_resolution("c", exact("npm:c@1.0.0"), Some(&a));
        tree
    }

    #[test]
    fn test_resolutions_and_sources() {
        let mut tree = sample();
        let a = exact("npm:a@1.0.0");
        assert_eq!(tree.get_resolution("a", None), Some(&a));
        assert_eq!(tree.get_resolution("b", Some(&a)), Some(&exact("npm:b@2.0.0")));
        assert_eq!(tree.get_resolution("b", None), None);
        assert!(!tree.set_resolution("a", a.clone(), None));

        let source = SourceLocator::parse("https://r.example/a-1.0.0.tgz").unwrap();
        assert!(tree.set_source(&a, source.clone()).unwrap());
        assert!(!tree.set_source(&a, source).unwrap());
        let other = SourceLocator::parse("https://r.example/other.tgz").unwrap();
        assert!(tree.set_source(&a, other.clone()).is_err());
        assert!(tree.replace_source(&a, other.clone()));
        assert_eq!(tree.get_source(&a), Some(&other));
    }

    #[test]
    fn test_best_match_across_tree() {
        let tree = sample();
        let target = PackageTarget::parse("npm:c@^1.0.0").unwrap();
        assert_eq!(tree.get_best_match(&target, false), Some(exact("npm:c@1.1.0")));

        let narrow = PackageTarget::parse("npm:c@~1.0.0").unwrap();
        assert_eq!(tree.get_best_match(&narrow, false), Some(exact("npm:c@1.0.0")));

        let none = PackageTarget::parse("npm:c@^2.0.0").unwrap();
        assert_eq!(tree.get_best_match(&none, false), None);
    }

    #[test]
    fn test_select() {
        let tree = sample();
        assert_eq!(tree.select("a").unwrap(), exact("npm:a@1.0.0"));
        assert_eq!(tree.select("npm:c@~1.1.0").unwrap(), exact("npm:c@1.1.0"));
        assert!(matches!(tree.select("c"), Err(TrellisError::AmbiguousSelector { .. })));
        assert!(matches!(tree.select("missing"), Err(TrellisError::NotInstalled { .. })));
        assert!(tree.select("other:a").is_err());
    }

    #[test]
    fn test_visit_order_and_early_exit() {
        let tree = sample();
        let mut seen = Vec::new();
        let stopped = tree.visit(|name, _, parent| {
            seen.push((name.to_string(), parent.is_some()));
            false
        });
        assert!(!stopped);
        assert_eq!(seen[0], ("a".to_string(), false));
        assert_eq!(seen.len(), 4);

        let mut count = 0;
        assert!(tree.visit(|_, _, _| {
            count += 1;
            count == 2
        }));
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_visit_async() {
        let tree = sample();
        let found = tree
            .visit_async(|resolution| async move { Ok(resolution.exact.name == "c") })
            .await
            .unwrap();
        assert!(found);
    }

    #[test]
    fn test_remove_unreachable() {
        let mut tree = sample();
        let a = exact("npm:a@1.0.0");
        tree.remove_resolution("b", Some(&a));
        let removed = tree.remove_unreachable();
        assert_eq!(removed, vec![exact("npm:b@2.0.0"), exact("npm:c@1.1.0")]);
        assert!(tree.reachable().contains(&exact("npm:c@1.0.0")));

        tree.remove_resolution("a", None);
        tree.remove_unreachable();
        assert!(tree.is_empty());
    }
}
