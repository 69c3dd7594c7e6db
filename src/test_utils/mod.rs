//! Test utilities for Trellis
//!
//! Helpers shared by unit and integration tests:
//! - [`TestProject`] - a temporary project with a private cache and an in-memory registry
//! - [`PackageFixture`] - package manifests and files, as directories or tarballs
//! - [`TestServer`] - a local HTTP server with per-path request counters
//! - [`TestGit`] - small git repositories for `git+file://` sources
//!
//! # Example
//!
//! ```rust,no_run
//! use trellis::installer::{InstallOptions, InstallRequest};
//! use trellis::test_utils::{PackageFixture, TestProject};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let project = TestProject::new()?;
//! project.publish(&PackageFixture::new("left-pad", "1.3.0"))?;
//!
//! let installer = project.installer()?;
//! let request = InstallRequest::parse("left-pad@^1.0.0", "npm")?;
//! installer.install(vec![request], InstallOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod environment;
pub mod fixtures;
pub mod git_helper;
pub mod registry;
pub mod server;

pub use environment::TestProject;
pub use fixtures::{PackageFixture, sri};
pub use git_helper::TestGit;
pub use registry::MemoryRegistry;
pub use server::{Route, TestServer};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`. Without either, nothing is logged.
///
/// ```bash
/// RUST_LOG=installer=debug,registry=trace cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
