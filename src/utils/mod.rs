//! Cross-platform utilities and helpers
//!
//! # Modules
//!
//! - [`fs`] - Atomic writes, directory helpers and install-tree links
//! - [`platform`] - Platform-specific helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use trellis::utils::{atomic_write, ensure_dir};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! ensure_dir(Path::new("trellis_packages/npm"))?;
//! atomic_write(Path::new("trellis.lock"), b"[resolve]\n")?;
//! # Ok(())
//! # }
//! ```

pub mod fs;
pub mod platform;

pub use fs::{atomic_write, copy_dir, ensure_dir, remove_dir_all};
pub use platform::{get_git_command, is_windows};
