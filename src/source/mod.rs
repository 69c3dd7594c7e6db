//! Source protocol layer.
//!
//! A [`SourceLocator`] names where the bytes of a package come from. Locators are
//! plain strings in manifests and in the install tree:
//!
//! | Form | Meaning |
//! |---|---|
//! | `git+https://host/repo.git#ref` | clone and check out `ref` (also `git+ssh`, `git+file`, `git://`) |
//! | `https://host/pkg.tgz#sha512-...` | download, verify and extract a tarball (`http://` too) |
//! | `file:../path` | use a local directory in place |
//!
//! Git and `file:` locators are *checkout sources*: they point at live, user-editable
//! trees. Overrides never apply to them.

pub mod file;
pub mod git;
pub mod integrity;
pub mod tarball;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::core::TrellisError;
use crate::fetch::FetchClient;
pub use integrity::{HashAlgorithm, Integrity};

/// Where a package's files come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceLocator {
    /// A git remote plus optional ref
    Git {
        /// Locator scheme as written (`git+https`, `git+ssh`, `git+file`, `git`)
        scheme: String,
        /// URL passed to `git clone`
        remote: String,
        reference: Option<String>,
    },
    /// A tarball URL plus optional expected digest
    Tarball {
        url: String,
        integrity: Option<Integrity>,
    },
    /// A local directory
    File { path: PathBuf },
}

impl SourceLocator {
    /// Whether `value` uses one of the locator schemes.
    #[must_use]
    pub fn looks_like(value: &str) -> bool {
        let value = value.trim();
        ["git+", "git://", "http://", "https://", "file:"].iter().any(|p| value.starts_with(p))
    }

    /// Parse a locator string.
    pub fn parse(input: &str) -> Result<Self, TrellisError> {
        let raw = input.trim();
        let invalid = |reason: &str| TrellisError::InvalidLocator {
            locator: raw.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = raw.strip_prefix("file:") {
            if path.starts_with("//") {
                return Err(invalid("use 'git+file://' for repositories or 'file:<path>' for directories"));
            }
            if path.is_empty() {
                return Err(invalid("empty path"));
            }
            return Ok(Self::File {
                path: PathBuf::from(path),
            });
        }

        let (base, fragment) = match raw.split_once('#') {
            Some((base, fragment)) if !fragment.is_empty() => (base, Some(fragment)),
            Some((base, _)) => (base, None),
            None => (raw, None),
        };

        if let Some(rest) = base.strip_prefix("git+") {
            let (scheme, _) = rest.split_once("://").ok_or_else(|| invalid("missing '://'"))?;
            if !matches!(scheme, "https" | "http" | "ssh" | "file") {
                return Err(invalid("unsupported git transport"));
            }
            return Ok(Self::Git {
                scheme: format!("git+{scheme}"),
                remote: rest.to_string(),
                reference: fragment.map(str::to_string),
            });
        }
        if base.starts_with("git://") {
            return Ok(Self::Git {
                scheme: "git".to_string(),
                remote: base.to_string(),
                reference: fragment.map(str::to_string),
            });
        }
        if base.starts_with("https://") || base.starts_with("http://") {
            url::Url::parse(base).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::Tarball {
                url: base.to_string(),
                integrity: fragment.map(Integrity::parse).transpose()?,
            });
        }
        Err(invalid("unknown scheme"))
    }

    /// Git and `file:` sources are live trees the user may edit.
    #[must_use]
    pub const fn is_checkout(&self) -> bool {
        matches!(self, Self::Git { .. } | Self::File { .. })
    }

    /// Resolve a relative `file:` path against `base`. Other locators are unchanged.
    #[must_use]
    pub fn with_base(&self, base: &Path) -> Self {
        match self {
            Self::File {
                path,
            } if path.is_relative() => Self::File {
                path: base.join(path),
            },
            other => other.clone(),
        }
    }

    /// Hex sha256 of the canonical locator string, naming the cache directory.
    #[must_use]
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }

    /// Download into `out_dir`, which must not exist yet.
    ///
    /// `file:` sources are used in place and are never downloaded.
    pub async fn download(&self, out_dir: &Path, fetch: &FetchClient, timeout: Duration) -> Result<()> {
        tracing::debug!(target: "source", "Downloading {} into {}", self, out_dir.display());
        match self {
            Self::Git {
                remote,
                reference,
                ..
            } => git::download(remote, reference.as_deref(), out_dir, timeout).await,
            Self::Tarball {
                url,
                integrity,
            } => tarball::download(fetch, url, integrity.as_ref(), out_dir, timeout).await,
            Self::File {
                path,
            } => Err(TrellisError::internal(format!(
                "file source {} is used in place and cannot be downloaded",
                path.display()
            ))
            .into()),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git {
                scheme,
                remote,
                reference,
            } => {
                if scheme == "git" {
                    f.write_str(remote)?;
                } else {
                    write!(f, "git+{remote}")?;
                }
                if let Some(reference) = reference {
                    write!(f, "#{reference}")?;
                }
                Ok(())
            }
            Self::Tarball {
                url,
                integrity,
            } => match integrity {
                Some(integrity) => write!(f, "{url}#{integrity}"),
                None => f.write_str(url),
            },
            Self::File {
                path,
            } => write!(f, "file:{}", path.display()),
        }
    }
}

impl FromStr for SourceLocator {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SourceLocator {
    type Error = TrellisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceLocator> for String {
    fn from(value: SourceLocator) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_git_locators() {
        let git = SourceLocator::parse("git+https://example.com/repo.git#v1.0.0").unwrap();
        assert!(matches!(
            &git,
            SourceLocator::Git { remote, reference: Some(r), .. }
                if remote == "https://example.com/repo.git" && r == "v1.0.0"
        ));
        assert_eq!(git.to_string(), "git+https://example.com/repo.git#v1.0.0");
        assert!(git.is_checkout());

        let plain = SourceLocator::parse("git://example.com/repo.git").unwrap();
        assert_eq!(plain.to_string(), "git://example.com/repo.git");

        assert!(SourceLocator::parse("git+ftp://example.com/repo").is_err());
    }

    #[test]
    fn test_parse_tarball_locators() {
        let digest = Integrity::compute(HashAlgorithm::Sha512, b"x");
        let locator = format!("https://example.com/pkg-1.0.0.tgz#{digest}");
        let tarball = SourceLocator::parse(&locator).unwrap();
        assert!(matches!(&tarball, SourceLocator::Tarball { integrity: Some(i), .. } if *i == digest));
        assert_eq!(tarball.to_string(), locator);
        assert!(!tarball.is_checkout());

        let bare = SourceLocator::parse("http://example.com/pkg.tgz").unwrap();
        assert!(matches!(bare, SourceLocator::Tarball { integrity: None, .. }));

        let err = SourceLocator::parse("https://example.com/pkg.tgz#nothex").unwrap_err();
        assert!(matches!(err, TrellisError::InvalidLocator { .. }));
    }

    #[test]
    fn test_file_locators() {
        let local = SourceLocator::parse("file:../vendor/pkg").unwrap();
        assert!(local.is_checkout());
        let resolved = local.with_base(Path::new("/project"));
        assert_eq!(resolved.to_string(), "file:/project/../vendor/pkg");
        assert!(SourceLocator::parse("file:").is_err());
        assert!(SourceLocator::parse("svn://example.com").is_err());
    }

    #[test]
    fn test_hash_is_stable() {
        let a = SourceLocator::parse("https://example.com/a.tgz").unwrap();
        let b = SourceLocator::parse("https://example.com/a.tgz").unwrap();
        let c = SourceLocator::parse("https://example.com/c.tgz").unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
