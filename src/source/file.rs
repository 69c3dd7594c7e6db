//! Local directory sources.
//!
//! A `file:` dependency is used in place: the install tree links straight to the
//! directory, nothing is copied into the cache.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::core::TrellisError;

/// Canonicalize a `file:` path and make sure it is a directory.
pub fn resolve_dir(path: &Path) -> Result<PathBuf> {
    let canonical = path.canonicalize().map_err(|_| TrellisError::InvalidLocator {
        locator: format!("file:{}", path.display()),
        reason: "directory does not exist".to_string(),
    })?;
    if !canonical.is_dir() {
        return Err(TrellisError::InvalidLocator {
            locator: format!("file:{}", path.display()),
            reason: "not a directory".to_string(),
        }
        .into());
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_dir() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("pkg");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(temp.path().join("file.txt"), "x").unwrap();

        assert_eq!(resolve_dir(&pkg).unwrap(), pkg.canonicalize().unwrap());
        assert!(resolve_dir(&temp.path().join("file.txt")).is_err());
        assert!(resolve_dir(&temp.path().join("missing")).is_err());
    }
}
