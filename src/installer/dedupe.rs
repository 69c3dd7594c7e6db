//! Converging duplicate installs of one package.
//!
//! When a pass resolves a fresh version of a package, every existing edge to an older
//! version of the same package is upgraded, as long as the range that edge's parent
//! declares still accepts the new version. The older version then usually becomes
//! unreachable and is collected at the end of the pass.

use crate::package::ExactPackage;
use crate::tree::{Resolution, ResolveTree};
use crate::version::PackageRange;

/// Edges pointing at a lower version of `new`'s package.
#[must_use]
pub fn candidates(tree: &ResolveTree, new: &ExactPackage) -> Vec<Resolution> {
    tree.resolutions()
        .into_iter()
        .filter(|edge| {
            edge.exact.registry == new.registry
                && edge.exact.name == new.name
                && edge.exact.version.as_semver().is_some()
                && edge.exact.version < new.version
                // A package never depends on another version of itself through dedupe
                && edge.parent.as_ref() != Some(new)
        })
        .collect()
}

/// Rewrite every candidate whose declared range accepts `new` to point at it.
///
/// `declared` pairs each candidate edge with the range its parent declares. Edges that
/// changed since the candidates were collected are skipped. Returns the edges that were
/// upgraded.
pub fn upgrade(
    tree: &mut ResolveTree,
    new: &ExactPackage,
    declared: &[(Resolution, PackageRange)],
    edge: bool,
) -> Vec<Resolution> {
    let mut upgraded = Vec::new();
    for (resolution, range) in declared {
        if !range.has(&new.version, edge) {
            continue;
        }
        let current = tree.get_resolution(&resolution.name, resolution.parent.as_ref());
        if current != Some(&resolution.exact) {
            continue;
        }
        tracing::debug!(
            target: "installer",
            "Upgrading {} -> {} under {}",
            resolution.exact,
            new,
            resolution.parent.as_ref().map_or_else(|| "the project".to_string(), ToString::to_string)
        );
        tree.set_resolution(&resolution.name, new.clone(), resolution.parent.as_ref());
        upgraded.push(resolution.clone());
    }
    upgraded
}
