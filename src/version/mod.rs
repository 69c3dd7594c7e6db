//! Version parsing, comparison, and range matching for package resolution.
//!
//! Registries publish versions that are usually semantic versions but may also be
//! plain labels (git branches, tags such as `master`). This module models both:
//!
//! - [`PackageVersion`] - a single concrete version, either [`PackageVersion::Semver`]
//!   or [`PackageVersion::Tag`]
//! - [`range::PackageRange`] - an npm-style range (`^1.2.0`, `~0.3`, `1.x || >=2.1.0 <3`,
//!   `1.0.0 - 1.4.0`), a wildcard, or a tag that only matches itself
//!
//! # Ordering
//!
//! Semantic versions order by semver precedence. Tags order after nothing in
//! particular: every semver version sorts above every tag, tags sort
//! lexicographically among themselves. Best-match selection only ever compares
//! versions the range actually accepts, so this total order exists purely to make
//! `max()` well defined.
//!
//! # Examples
//!
//! ```rust
//! use trellis::version::{PackageVersion, range::PackageRange};
//!
//! let range = PackageRange::parse("^1.0.0").unwrap();
//! let versions: Vec<PackageVersion> =
//!     ["1.0.0", "1.2.0", "1.2.0-beta"].iter().map(|v| PackageVersion::parse(v)).collect();
//!
//! let best = range.best_match(versions.iter(), false).unwrap();
//! assert_eq!(best.to_string(), "1.2.0");
//! ```

pub mod range;

use semver::Version;
use std::cmp::Ordering;
use std::fmt;

pub use range::PackageRange;

/// A single concrete package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageVersion {
    /// A semantic version (`1.2.3`, `2.0.0-rc.1`)
    Semver(Version),
    /// Any other label, such as a git branch or tag name
    Tag(String),
}

impl PackageVersion {
    /// Parse a version string.
    ///
    /// A leading `v` or `=` is accepted in front of semantic versions. Anything that
    /// does not parse as semver becomes a [`PackageVersion::Tag`].
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match parse_loose_semver(trimmed) {
            Some(version) => Self::Semver(version),
            None => Self::Tag(trimmed.to_string()),
        }
    }

    /// Returns the semantic version, if this is one.
    #[must_use]
    pub const fn as_semver(&self) -> Option<&Version> {
        match self {
            Self::Semver(v) => Some(v),
            Self::Tag(_) => None,
        }
    }

    /// True for semantic versions with a prerelease component.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.as_semver().is_some_and(|v| !v.pre.is_empty())
    }

    /// True for semantic versions without a prerelease component.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.as_semver().is_some_and(|v| v.pre.is_empty())
    }
}

/// Parse `1.2.3`, `v1.2.3` and `=1.2.3`. Build metadata is kept.
pub(crate) fn parse_loose_semver(input: &str) -> Option<Version> {
    let stripped = input.strip_prefix('=').unwrap_or(input).trim_start();
    let stripped = match stripped.strip_prefix(['v', 'V']) {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => stripped,
    };
    Version::parse(stripped).ok()
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semver(v) => write!(f, "{v}"),
            Self::Tag(t) => f.write_str(t),
        }
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Semver(a), Self::Semver(b)) => a.cmp_precedence(b).then_with(|| a.cmp(b)),
            (Self::Semver(_), Self::Tag(_)) => Ordering::Greater,
            (Self::Tag(_), Self::Semver(_)) => Ordering::Less,
            (Self::Tag(a), Self::Tag(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Version> for PackageVersion {
    fn from(v: Version) -> Self {
        Self::Semver(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_semver_and_tags() {
        assert!(matches!(PackageVersion::parse("1.2.3"), PackageVersion::Semver(_)));
        assert!(matches!(PackageVersion::parse("v1.2.3"), PackageVersion::Semver(_)));
        assert!(matches!(PackageVersion::parse("=1.2.3-beta.1"), PackageVersion::Semver(_)));
        assert_eq!(PackageVersion::parse("master"), PackageVersion::Tag("master".to_string()));
        assert_eq!(PackageVersion::parse("1.2"), PackageVersion::Tag("1.2".to_string()));
    }

    #[test]
    fn test_ordering() {
        let mut versions: Vec<PackageVersion> = ["1.2.0", "master", "1.2.0-beta", "1.10.0", "0.9.0"]
            .iter()
            .map(|v| PackageVersion::parse(v))
            .collect();
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(sorted, vec!["master", "0.9.0", "1.2.0-beta", "1.2.0", "1.10.0"]);
    }

    #[test]
    fn test_stability() {
        assert!(PackageVersion::parse("1.0.0").is_stable());
        assert!(PackageVersion::parse("1.0.0-rc.1").is_prerelease());
        assert!(!PackageVersion::parse("main").is_stable());
        assert!(!PackageVersion::parse("main").is_prerelease());
    }
}
