//! Atomic file write operations using temp-and-rename strategy.

use crate::utils::fs::dirs::ensure_dir;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Safely writes a string to a file using atomic operations.
///
/// Convenience wrapper around [`atomic_write`].
pub fn safe_write(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// 1. Write content to a uniquely named temporary sibling
/// 2. Sync it to disk
/// 3. Rename it over the target path
///
/// Parent directories are created when missing. The temporary name carries a
/// random suffix so concurrent writers of the same path never share a temp file;
/// the last rename wins.
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::utils::fs::atomic_write;
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// atomic_write(Path::new("trellis.lock"), b"[resolve]\n")?;
/// # Ok(())
/// # }
/// ```
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("Cannot write to a path without a file name: {}", path.display()))?;
    let temp_path =
        path.with_file_name(format!(".{}.{}.tmp", file_name.to_string_lossy(), uuid::Uuid::new_v4().simple()));

    let written = (|| -> Result<()> {
        let mut file = fs::File::create(&temp_path).with_context(|| {
            let platform_help = if crate::utils::platform::is_windows() {
                "On Windows: Check file permissions, path length, and that directory exists"
            } else {
                "Check file permissions and that directory exists"
            };
            format!("Failed to create temp file: {}\n\n{}", temp_path.display(), platform_help)
        })?;
        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
        file.sync_all().with_context(|| "Failed to sync file to disk")?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename temp file to: {}", path.display()))
    })();

    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_parents_and_replaces() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested/dir/file.toml");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        safe_write(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        // No temp files are left behind
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_atomic_write_concurrent_writers() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("shared.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || atomic_write(&path, format!("{i}").as_bytes()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.parse::<u32>().unwrap() < 8);
    }
}
