//! File system utilities
//!
//! - **Atomic operations**: files are written to a unique temporary sibling and renamed
//!   into place, so readers see either the old or the new content
//! - **Links**: install-tree entries are directory symlinks (junction-style symlinks on
//!   Windows) pointing into the cache or at a local package directory

pub mod atomic;
pub mod dirs;

pub use atomic::{atomic_write, safe_write};
pub use dirs::{copy_dir, ensure_dir, ensure_parent_dir, is_link, link_dir, remove_dir_all, remove_path};
