//! npm-style version ranges.
//!
//! A [`PackageRange`] is parsed once into a disjunction of half-open version intervals.
//! Every operator (`^`, `~`, x-ranges, hyphen ranges, comparison operators) is
//! desugared into lower/upper bounds the same way npm does, so `^0.2.3` becomes
//! `>=0.2.3 <0.3.0-0` and `1.x` becomes `>=1.0.0 <2.0.0-0`.
//!
//! Prerelease versions follow the npm rule: `1.3.0-beta` only satisfies a comparator
//! set when one of the set's user-written comparators carries a prerelease on the
//! same `major.minor.patch`. The `edge` flag relaxes that rule so any prerelease
//! inside the numeric bounds matches.

use semver::{Prerelease, Version};
use std::cmp::Ordering;
use std::fmt;

use super::{PackageVersion, parse_loose_semver};
use crate::core::TrellisError;

/// How the range was written, used to rebase it onto a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeStyle {
    Caret,
    Tilde,
    Exact,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// One comparator set, i.e. one side of an `||`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Interval {
    lower: Option<Bound>,
    upper: Option<Bound>,
    /// `(major, minor, patch)` of user-written comparators carrying a prerelease
    anchors: Vec<(u64, u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RangeKind {
    /// `*`, `x`, `latest` or empty
    Any,
    /// A label that only matches the identical [`PackageVersion::Tag`]
    Tag(String),
    /// Union of comparator sets
    Sets(Vec<Interval>),
}

/// A parsed version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRange {
    raw: String,
    kind: RangeKind,
    style: RangeStyle,
}

impl PackageRange {
    /// Parse a range string.
    ///
    /// Strings that are not valid semver ranges but form a single token
    /// (`master`, `feature/login`) become tag ranges. Malformed multi-token input
    /// is rejected.
    pub fn parse(input: &str) -> Result<Self, TrellisError> {
        let raw = input.trim();
        if raw.is_empty() || raw == "*" || raw == "latest" || raw.eq_ignore_ascii_case("x") {
            return Ok(Self::any_with_raw(raw));
        }

        let mut sets = Vec::new();
        let mut style = RangeStyle::Other;
        let set_count = raw.split("||").count();
        for set in raw.split("||") {
            match parse_set(set.trim()) {
                Ok((interval, set_style)) => {
                    if set_count == 1 {
                        style = set_style;
                    }
                    sets.push(interval);
                }
                Err(SetError::Overflow) => {
                    return Err(TrellisError::InvalidTarget {
                        target: raw.to_string(),
                        reason: format!("'{}' has a version component out of range", set.trim()),
                    });
                }
                Err(SetError::Malformed) => {
                    let single_token = set_count == 1 && !raw.contains(char::is_whitespace);
                    if single_token {
                        return Ok(Self {
                            raw: raw.to_string(),
                            kind: RangeKind::Tag(raw.to_string()),
                            style: RangeStyle::Exact,
                        });
                    }
                    return Err(TrellisError::InvalidTarget {
                        target: raw.to_string(),
                        reason: format!("'{}' is not a valid version range", set.trim()),
                    });
                }
            }
        }

        if sets.iter().any(|s| s.lower.is_none() && s.upper.is_none()) {
            return Ok(Self::any_with_raw(raw));
        }

        Ok(Self {
            raw: raw.to_string(),
            kind: RangeKind::Sets(sets),
            style,
        })
    }

    /// The wildcard range, matching every stable version.
    #[must_use]
    pub fn any() -> Self {
        Self::any_with_raw("")
    }

    fn any_with_raw(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            kind: RangeKind::Any,
            style: RangeStyle::Other,
        }
    }

    /// The range matching exactly one version.
    #[must_use]
    pub fn exact(version: &PackageVersion) -> Self {
        match version {
            PackageVersion::Semver(v) => Self {
                raw: v.to_string(),
                kind: RangeKind::Sets(vec![Interval::exact(v.clone())]),
                style: RangeStyle::Exact,
            },
            PackageVersion::Tag(t) => Self {
                raw: t.clone(),
                kind: RangeKind::Tag(t.clone()),
                style: RangeStyle::Exact,
            },
        }
    }

    /// `^version` for semantic versions, the tag itself otherwise.
    #[must_use]
    pub fn caret(version: &PackageVersion) -> Self {
        match version {
            PackageVersion::Semver(v) => match desugar(Op::Caret, &Partial::full(v)) {
                Ok((interval, _)) => Self {
                    raw: format!("^{v}"),
                    kind: RangeKind::Sets(vec![interval]),
                    style: RangeStyle::Caret,
                },
                Err(_) => Self::exact(version),
            },
            PackageVersion::Tag(_) => Self::exact(version),
        }
    }

    /// True for `*`, `latest` and the empty range.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self.kind, RangeKind::Any)
    }

    /// True when the range names a non-semver tag.
    #[must_use]
    pub const fn is_tag(&self) -> bool {
        matches!(self.kind, RangeKind::Tag(_))
    }

    /// The range as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `version` satisfies this range.
    ///
    /// With `edge` set, prereleases inside the numeric bounds match even without a
    /// prerelease comparator on the same version tuple.
    #[must_use]
    pub fn has(&self, version: &PackageVersion, edge: bool) -> bool {
        match (&self.kind, version) {
            (RangeKind::Any, PackageVersion::Semver(v)) => edge || v.pre.is_empty(),
            (RangeKind::Any, PackageVersion::Tag(_)) => true,
            (RangeKind::Tag(tag), PackageVersion::Tag(t)) => tag == t,
            (RangeKind::Tag(_), PackageVersion::Semver(_)) => false,
            (RangeKind::Sets(sets), PackageVersion::Semver(v)) => {
                sets.iter().any(|s| s.contains(v, edge))
            }
            (RangeKind::Sets(_), PackageVersion::Tag(_)) => false,
        }
    }

    /// Pick the best version for this range.
    ///
    /// The highest satisfying stable version wins. When `edge` is set, or when no
    /// stable version satisfies the range, prereleases are considered too.
    pub fn best_match<'a, I>(&self, versions: I, edge: bool) -> Option<PackageVersion>
    where
        I: IntoIterator<Item = &'a PackageVersion>,
    {
        let candidates: Vec<&PackageVersion> = versions.into_iter().collect();

        if let RangeKind::Tag(tag) = &self.kind {
            return candidates
                .into_iter()
                .find(|v| matches!(v, PackageVersion::Tag(t) if t == tag))
                .cloned();
        }

        let semver_candidates = || candidates.iter().copied().filter(|v| v.as_semver().is_some());

        if !edge {
            let stable =
                semver_candidates().filter(|v| v.is_stable() && self.has(v, false)).max().cloned();
            if stable.is_some() {
                return stable;
            }
        }

        semver_candidates().filter(|v| self.has(v, edge)).max().cloned()
    }

    /// Intersect two ranges. Returns `None` when no version can satisfy both.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (&self.kind, &other.kind) {
            (RangeKind::Any, _) => Some(other.clone()),
            (_, RangeKind::Any) => Some(self.clone()),
            (RangeKind::Tag(a), RangeKind::Tag(b)) => (a == b).then(|| self.clone()),
            (RangeKind::Tag(_), RangeKind::Sets(_)) | (RangeKind::Sets(_), RangeKind::Tag(_)) => {
                None
            }
            (RangeKind::Sets(left), RangeKind::Sets(right)) => {
                if self == other {
                    return Some(self.clone());
                }
                let sets: Vec<Interval> = left
                    .iter()
                    .flat_map(|l| right.iter().filter_map(move |r| l.intersect(r)))
                    .collect();
                if sets.is_empty() {
                    return None;
                }
                let raw = sets.iter().map(Interval::render).collect::<Vec<_>>().join(" || ");
                Some(Self {
                    raw,
                    kind: RangeKind::Sets(sets),
                    style: RangeStyle::Other,
                })
            }
        }
    }

    /// Re-anchor this range on `version`, keeping the operator style.
    ///
    /// `^1.0.0` rebased on `1.4.2` is `^1.4.2`, `~1.0` becomes `~1.4.2`, an exact
    /// range becomes the exact new version. Wildcards and complex ranges become a
    /// caret range.
    #[must_use]
    pub fn rebase(&self, version: &PackageVersion) -> Self {
        let PackageVersion::Semver(v) = version else {
            return Self::exact(version);
        };
        match self.style {
            RangeStyle::Exact => Self::exact(version),
            RangeStyle::Tilde => match desugar(Op::Tilde, &Partial::full(v)) {
                Ok((interval, _)) => Self {
                    raw: format!("~{v}"),
                    kind: RangeKind::Sets(vec![interval]),
                    style: RangeStyle::Tilde,
                },
                Err(_) => Self::exact(version),
            },
            RangeStyle::Caret | RangeStyle::Other => Self::caret(version),
        }
    }
}

impl fmt::Display for PackageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Interval {
    fn exact(version: Version) -> Self {
        let anchors = if version.pre.is_empty() {
            Vec::new()
        } else {
            vec![(version.major, version.minor, version.patch)]
        };
        Self {
            lower: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            upper: Some(Bound {
                version,
                inclusive: true,
            }),
            anchors,
        }
    }

    /// An interval nothing satisfies (`<0.0.0-0`).
    fn nothing() -> Self {
        Self {
            lower: None,
            upper: Some(Bound {
                version: with_zero_pre(0, 0, 0),
                inclusive: false,
            }),
            anchors: Vec::new(),
        }
    }

    fn within_bounds(&self, v: &Version) -> bool {
        if let Some(lower) = &self.lower {
            match v.cmp_precedence(&lower.version) {
                Ordering::Less => return false,
                Ordering::Equal if !lower.inclusive => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match v.cmp_precedence(&upper.version) {
                Ordering::Greater => return false,
                Ordering::Equal if !upper.inclusive => return false,
                _ => {}
            }
        }
        true
    }

    fn contains(&self, v: &Version, edge: bool) -> bool {
        if !self.within_bounds(v) {
            return false;
        }
        if v.pre.is_empty() || edge {
            return true;
        }
        self.anchors.contains(&(v.major, v.minor, v.patch))
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        let lower = tighter(&self.lower, &other.lower, Ordering::Greater);
        let upper = tighter(&self.upper, &other.upper, Ordering::Less);

        if let (Some(l), Some(u)) = (&lower, &upper) {
            match l.version.cmp_precedence(&u.version) {
                Ordering::Greater => return None,
                Ordering::Equal if !(l.inclusive && u.inclusive) => return None,
                _ => {}
            }
        }

        let mut anchors = self.anchors.clone();
        for anchor in &other.anchors {
            if !anchors.contains(anchor) {
                anchors.push(*anchor);
            }
        }
        Some(Self {
            lower,
            upper,
            anchors,
        })
    }

    fn render(&self) -> String {
        match (&self.lower, &self.upper) {
            (None, None) => "*".to_string(),
            (Some(l), Some(u))
                if l.inclusive && u.inclusive && l.version.cmp_precedence(&u.version).is_eq() =>
            {
                l.version.to_string()
            }
            (lower, upper) => {
                let mut parts = Vec::new();
                if let Some(l) = lower {
                    parts.push(format!("{}{}", if l.inclusive { ">=" } else { ">" }, l.version));
                }
                if let Some(u) = upper {
                    parts.push(format!("{}{}", if u.inclusive { "<=" } else { "<" }, u.version));
                }
                parts.join(" ")
            }
        }
    }
}

/// Pick the more restrictive of two bounds. `prefer` is the ordering that wins
/// (`Greater` for lower bounds, `Less` for upper bounds).
fn tighter(a: &Option<Bound>, b: &Option<Bound>, prefer: Ordering) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => match x.version.cmp_precedence(&y.version) {
            Ordering::Equal => Some(Bound {
                version: x.version.clone(),
                inclusive: x.inclusive && y.inclusive,
            }),
            ord if ord == prefer => Some(x.clone()),
            _ => Some(y.clone()),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Caret,
    Tilde,
}

/// A possibly partial version: `1`, `1.2`, `1.x`, `1.2.3-beta`.
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn full(v: &Version) -> Self {
        Self {
            major: Some(v.major),
            minor: Some(v.minor),
            patch: Some(v.patch),
            pre: v.pre.clone(),
        }
    }

    fn parse(input: &str) -> Option<Self> {
        let input = input.strip_prefix('=').unwrap_or(input);
        let input = match input.strip_prefix(['v', 'V']) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
            _ => input,
        };
        if input.is_empty() {
            return None;
        }
        let without_build = input.split('+').next().unwrap_or(input);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (without_build, None),
        };

        let mut parts = [None, None, None];
        let mut wildcard_seen = false;
        let pieces: Vec<&str> = core.split('.').collect();
        if pieces.len() > 3 {
            return None;
        }
        for (slot, piece) in parts.iter_mut().zip(pieces) {
            match piece {
                "x" | "X" | "*" => wildcard_seen = true,
                digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                    if !wildcard_seen {
                        *slot = Some(digits.parse().ok()?);
                    }
                }
                _ => return None,
            }
        }

        let pre = match pre {
            Some(p) => {
                if parts.iter().any(Option::is_none) {
                    return None;
                }
                Prerelease::new(p).ok()?
            }
            None => Prerelease::EMPTY,
        };

        Some(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            pre,
        })
    }

    /// Fill missing components with zero.
    fn floor(&self) -> Version {
        let mut v = Version::new(
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        );
        v.pre = self.pre.clone();
        v
    }

    fn is_full(&self) -> bool {
        self.major.is_some() && self.minor.is_some() && self.patch.is_some()
    }
}

fn with_zero_pre(major: u64, minor: u64, patch: u64) -> Version {
    let mut v = Version::new(major, minor, patch);
    v.pre = Prerelease::new("0").unwrap_or(Prerelease::EMPTY);
    v
}

fn inclusive(version: Version) -> Option<Bound> {
    Some(Bound {
        version,
        inclusive: true,
    })
}

fn exclusive(version: Version) -> Option<Bound> {
    Some(Bound {
        version,
        inclusive: false,
    })
}

/// Why a comparator set could not be turned into an interval.
#[derive(Debug, PartialEq, Eq)]
enum SetError {
    Malformed,
    /// Bumping a component for an upper bound would overflow `u64`.
    Overflow,
}

fn bump(component: u64) -> Result<u64, SetError> {
    component.checked_add(1).ok_or(SetError::Overflow)
}

/// The exclusive upper bound reached by bumping the last specified component.
fn bump_upper(p: &Partial) -> Result<Option<Bound>, SetError> {
    Ok(match (p.major, p.minor) {
        (Some(major), None) => exclusive(with_zero_pre(bump(major)?, 0, 0)),
        (Some(major), Some(minor)) => exclusive(with_zero_pre(major, bump(minor)?, 0)),
        (None, _) => None,
    })
}

/// Turn one comparator into bounds, following npm's desugaring rules.
fn desugar(op: Op, p: &Partial) -> Result<(Interval, RangeStyle), SetError> {
    let mut interval = Interval::default();
    if p.is_full() && !p.pre.is_empty() {
        interval.anchors.push((p.major.unwrap_or(0), p.minor.unwrap_or(0), p.patch.unwrap_or(0)));
    }

    let Some(major) = p.major else {
        // `*` under any operator: wildcards match everything except for `<*` / `>*`
        return Ok(match op {
            Op::Gt | Op::Lt => (Interval::nothing(), RangeStyle::Other),
            _ => (interval, RangeStyle::Other),
        });
    };

    let style = match op {
        Op::Eq => {
            if p.is_full() {
                return Ok((Interval::exact(p.floor()), RangeStyle::Exact));
            }
            interval.lower = inclusive(p.floor());
            interval.upper = bump_upper(p)?;
            RangeStyle::Other
        }
        Op::Caret => {
            interval.lower = inclusive(p.floor());
            interval.upper = match (p.minor, p.patch) {
                (None, _) => exclusive(with_zero_pre(bump(major)?, 0, 0)),
                (Some(minor), None) if major == 0 => exclusive(with_zero_pre(0, bump(minor)?, 0)),
                (Some(_), None) => exclusive(with_zero_pre(bump(major)?, 0, 0)),
                (Some(minor), Some(patch)) => {
                    if major > 0 {
                        exclusive(with_zero_pre(bump(major)?, 0, 0))
                    } else if minor > 0 {
                        exclusive(with_zero_pre(0, bump(minor)?, 0))
                    } else {
                        exclusive(with_zero_pre(0, 0, bump(patch)?))
                    }
                }
            };
            RangeStyle::Caret
        }
        Op::Tilde => {
            interval.lower = inclusive(p.floor());
            interval.upper = match p.minor {
                None => exclusive(with_zero_pre(bump(major)?, 0, 0)),
                Some(minor) => exclusive(with_zero_pre(major, bump(minor)?, 0)),
            };
            RangeStyle::Tilde
        }
        Op::Gt => {
            if p.is_full() {
                interval.lower = exclusive(p.floor());
            } else {
                interval.lower = bump_upper(p)?.map(|b| Bound {
                    version: Version::new(b.version.major, b.version.minor, b.version.patch),
                    inclusive: true,
                });
            }
            RangeStyle::Other
        }
        Op::Gte => {
            interval.lower = inclusive(p.floor());
            RangeStyle::Other
        }
        Op::Lt => {
            interval.upper = if p.is_full() {
                exclusive(p.floor())
            } else {
                exclusive(with_zero_pre(major, p.minor.unwrap_or(0), 0))
            };
            RangeStyle::Other
        }
        Op::Lte => {
            interval.upper = if p.is_full() { inclusive(p.floor()) } else { bump_upper(p)? };
            RangeStyle::Other
        }
    };
    Ok((interval, style))
}

fn split_op(token: &str) -> (Op, &str) {
    const OPS: [(&str, Op); 8] = [
        ("~>", Op::Tilde),
        (">=", Op::Gte),
        ("<=", Op::Lte),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
        ("^", Op::Caret),
        ("~", Op::Tilde),
    ];
    for (prefix, op) in OPS {
        if let Some(rest) = token.strip_prefix(prefix) {
            return (op, rest.trim());
        }
    }
    (Op::Eq, token)
}

/// Parse one comparator set (the text between `||`).
fn parse_set(set: &str) -> Result<(Interval, RangeStyle), SetError> {
    if set.is_empty() || set == "*" || set.eq_ignore_ascii_case("x") {
        return Ok((Interval::default(), RangeStyle::Other));
    }

    // Glue dangling operators to their operand: `>= 1.2.3` -> `>=1.2.3`
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in set.split_whitespace() {
        if matches!(token, ">=" | "<=" | ">" | "<" | "=" | "^" | "~" | "~>") {
            pending_op.push_str(token);
            continue;
        }
        tokens.push(format!("{pending_op}{token}"));
        pending_op.clear();
    }
    if !pending_op.is_empty() {
        return Err(SetError::Malformed);
    }

    // Hyphen range: `1.2.3 - 2.3.4`
    if tokens.len() == 3 && tokens[1] == "-" {
        let from = Partial::parse(&tokens[0]).ok_or(SetError::Malformed)?;
        let to = Partial::parse(&tokens[2]).ok_or(SetError::Malformed)?;
        let mut interval = Interval {
            lower: from.major.map(|_| Bound {
                version: from.floor(),
                inclusive: true,
            }),
            upper: if to.is_full() {
                inclusive(to.floor())
            } else {
                bump_upper(&to)?
            },
            anchors: Vec::new(),
        };
        for p in [&from, &to] {
            if p.is_full() && !p.pre.is_empty() {
                interval.anchors.push((
                    p.major.unwrap_or(0),
                    p.minor.unwrap_or(0),
                    p.patch.unwrap_or(0),
                ));
            }
        }
        return Ok((interval, RangeStyle::Other));
    }

    let mut result: Option<Interval> = None;
    let mut style = RangeStyle::Other;
    let single = tokens.len() == 1;
    for token in &tokens {
        let (op, operand) = split_op(token);
        let partial = Partial::parse(operand).ok_or(SetError::Malformed)?;
        let (interval, token_style) = desugar(op, &partial)?;
        if single {
            style = token_style;
        }
        result = Some(match result {
            None => interval,
            // Conjunction of comparators: an empty intersection matches nothing
            Some(acc) => acc.intersect(&interval).unwrap_or_else(Interval::nothing),
        });
    }
    result.map(|interval| (interval, style)).ok_or(SetError::Malformed)
}

/// Parse a version that must be exact (no range operators).
pub(crate) fn parse_exact_version(input: &str) -> Option<PackageVersion> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }
    Some(match parse_loose_semver(trimmed) {
        Some(v) => PackageVersion::Semver(v),
        None => PackageVersion::Tag(trimmed.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s)
    }

    fn satisfies(range: &str, version: &str) -> bool {
        PackageRange::parse(range).unwrap().has(&v(version), false)
    }

    #[test]
    fn test_caret_ranges() {
        assert!(satisfies("^1.2.3", "1.2.3"));
        assert!(satisfies("^1.2.3", "1.9.0"));
        assert!(!satisfies("^1.2.3", "2.0.0"));
        assert!(!satisfies("^1.2.3", "1.2.2"));

        assert!(satisfies("^0.2.3", "0.2.9"));
        assert!(!satisfies("^0.2.3", "0.3.0"));
        assert!(satisfies("^0.0.3", "0.0.3"));
        assert!(!satisfies("^0.0.3", "0.0.4"));

        assert!(satisfies("^0.x", "0.9.9"));
        assert!(!satisfies("^0.x", "1.0.0"));
        assert!(satisfies("^0.0.x", "0.0.7"));
        assert!(!satisfies("^0.0.x", "0.1.0"));
        assert!(satisfies("^1.2", "1.5.0"));
        assert!(!satisfies("^0.2", "0.3.0"));
    }

    #[test]
    fn test_tilde_ranges() {
        assert!(satisfies("~1.2.3", "1.2.9"));
        assert!(!satisfies("~1.2.3", "1.3.0"));
        assert!(satisfies("~1.2", "1.2.0"));
        assert!(!satisfies("~1.2", "1.3.0"));
        assert!(satisfies("~1", "1.9.0"));
        assert!(!satisfies("~1", "2.0.0"));
        assert!(satisfies("~0.2.1", "0.2.5"));
        assert!(!satisfies("~0.2.1", "0.3.0"));
    }

    #[test]
    fn test_x_ranges_and_partials() {
        assert!(satisfies("1.x", "1.4.0"));
        assert!(!satisfies("1.x", "2.0.0"));
        assert!(satisfies("1.2.x", "1.2.7"));
        assert!(!satisfies("1.2.x", "1.3.0"));
        assert!(satisfies("1", "1.0.0"));
        assert!(satisfies("*", "3.0.0"));
        assert!(satisfies("", "0.0.1"));
        assert!(!satisfies("*", "3.0.0-beta"));
    }

    #[test]
    fn test_exact_and_comparators() {
        assert!(satisfies("1.2.3", "1.2.3"));
        assert!(!satisfies("1.2.3", "1.2.4"));
        assert!(satisfies("=1.2.3", "1.2.3"));
        assert!(satisfies(">=1.2.3", "5.0.0"));
        assert!(!satisfies(">1.2.3", "1.2.3"));
        assert!(satisfies(">1.2", "1.3.0"));
        assert!(!satisfies(">1.2", "1.2.9"));
        assert!(satisfies("<1.2", "1.1.9"));
        assert!(!satisfies("<1.2", "1.2.0"));
        assert!(satisfies("<=1.2", "1.2.9"));
        assert!(!satisfies("<=1.2", "1.3.0"));
        assert!(satisfies(">= 1.0.0 < 2", "1.5.0"));
        assert!(!satisfies(">=1.0.0 <2", "2.0.0"));
    }

    #[test]
    fn test_hyphen_and_or_ranges() {
        assert!(satisfies("1.2.3 - 2.3.4", "2.3.4"));
        assert!(!satisfies("1.2.3 - 2.3.4", "2.3.5"));
        assert!(satisfies("1.2.3 - 2.3", "2.3.9"));
        assert!(!satisfies("1.2.3 - 2.3", "2.4.0"));
        assert!(satisfies("^1.0.0 || ^3.0.0", "3.1.0"));
        assert!(!satisfies("^1.0.0 || ^3.0.0", "2.1.0"));
    }

    #[test]
    fn test_prerelease_rule() {
        assert!(!satisfies("^1.0.0", "1.2.0-beta"));
        assert!(satisfies("^1.2.0-beta", "1.2.0-beta.2"));
        assert!(!satisfies("^1.2.0-beta", "1.3.0-beta"));
        assert!(satisfies("^1.2.0-beta", "1.3.0"));

        let range = PackageRange::parse("^1.0.0").unwrap();
        assert!(range.has(&v("1.2.0-beta"), true));
        assert!(!range.has(&v("2.0.0-beta"), true));
    }

    #[test]
    fn test_tag_ranges() {
        let range = PackageRange::parse("master").unwrap();
        assert!(range.is_tag());
        assert!(range.has(&v("master"), false));
        assert!(!range.has(&v("1.0.0"), false));

        assert!(PackageRange::parse(">=1.0.0 foo").is_err());
    }

    #[test]
    fn test_best_match() {
        let versions = vec![v("1.0.0"), v("1.2.0"), v("1.2.0-beta")];
        let range = PackageRange::parse("^1.0.0").unwrap();
        assert_eq!(range.best_match(&versions, false), Some(v("1.2.0")));
        assert_eq!(range.best_match(&versions, true), Some(v("1.2.0")));

        let only_pre = vec![v("1.2.0-beta"), v("2.0.0")];
        assert_eq!(range.best_match(&only_pre, false), None);
        assert_eq!(range.best_match(&only_pre, true), Some(v("1.2.0-beta")));

        let tagged = vec![v("master"), v("1.0.0")];
        let tag = PackageRange::parse("master").unwrap();
        assert_eq!(tag.best_match(&tagged, false), Some(v("master")));
    }

    #[test]
    fn test_intersect() {
        let a = PackageRange::parse("^1.0.0").unwrap();
        let b = PackageRange::parse(">=1.4.0").unwrap();
        let both = a.intersect(&b).unwrap();
        assert!(both.has(&v("1.5.0"), false));
        assert!(!both.has(&v("1.3.0"), false));
        assert!(!both.has(&v("2.0.0"), false));

        let c = PackageRange::parse("^2.0.0").unwrap();
        assert!(a.intersect(&c).is_none());

        let any = PackageRange::any();
        assert_eq!(any.intersect(&a), Some(a.clone()));
    }

    #[test]
    fn test_rebase() {
        let caret = PackageRange::parse("^1.0.0").unwrap();
        assert_eq!(caret.rebase(&v("1.4.2")).to_string(), "^1.4.2");

        let tilde = PackageRange::parse("~1.0").unwrap();
        let rebased = tilde.rebase(&v("1.4.2"));
        assert_eq!(rebased.to_string(), "~1.4.2");
        assert!(!rebased.has(&v("1.5.0"), false));

        let exact = PackageRange::parse("1.0.0").unwrap();
        assert_eq!(exact.rebase(&v("1.4.2")).to_string(), "1.4.2");

        assert_eq!(PackageRange::any().rebase(&v("3.0.0")).to_string(), "^3.0.0");
    }

    #[test]
    fn test_overflowing_components_are_rejected() {
        for input in ["^18446744073709551615.0.0", "~1.18446744073709551615.0", "<=18446744073709551615"] {
            let err = PackageRange::parse(input).unwrap_err();
            assert!(matches!(err, TrellisError::InvalidTarget { .. }), "{input}: {err:?}");
        }
        assert!(PackageRange::parse("^18446744073709551614.0.0").is_ok());

        let max = v("18446744073709551615.0.0");
        assert_eq!(PackageRange::caret(&max).to_string(), "18446744073709551615.0.0");
    }
}
