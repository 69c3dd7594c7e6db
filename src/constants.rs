//! Global constants used throughout the Trellis codebase.
//!
//! Timeout durations, retry parameters, file names and other numeric
//! constants shared across modules live here so magic numbers stay
//! discoverable.

use std::time::Duration;

/// Default timeout for project lock acquisition (120 seconds).
///
/// A second process installing into the same project waits this long for
/// the first one to finish its pass before giving up.
pub fn default_lock_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Maximum backoff delay for exponential backoff (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting delay for exponential backoff (10ms).
///
/// Doubled on each retry attempt up to [`MAX_BACKOFF_DELAY_MS`].
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Default timeout for a single registry endpoint hook call (30 seconds).
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries for a registry endpoint hook.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Timeout for git clone/fetch operations performed by the source layer.
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for tarball downloads.
pub const TARBALL_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum number of parallel downloads regardless of CPU count.
pub const MIN_PARALLELISM: usize = 10;

/// Multiplier applied to CPU core count for default download parallelism.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Project manifest file name.
pub const PROJECT_MANIFEST: &str = "trellis.toml";

/// Persisted install tree file name.
pub const TREE_FILE: &str = "trellis.lock";

/// Directory inside the project holding materialized packages.
pub const PACKAGES_DIR: &str = "trellis_packages";

/// Directory (inside [`PACKAGES_DIR`]) where orphaned installs are moved.
pub const ORPHANED_DIR: &str = ".orphaned";

/// Package manifest file read from downloaded packages.
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Registry used when a target does not name one.
pub const DEFAULT_REGISTRY: &str = "npm";

/// Default download parallelism: `max(MIN_PARALLELISM, cores * PARALLELISM_CORE_MULTIPLIER)`.
pub fn default_max_parallel() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    std::cmp::max(MIN_PARALLELISM, cores * PARALLELISM_CORE_MULTIPLIER)
}
