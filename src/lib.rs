//! Trellis - dependency resolution and package installation engine
//!
//! Trellis turns named package requirements with version ranges into a deduplicated,
//! concrete dependency graph, fetches the matching artifacts from registries, git
//! remotes, tarball URLs and local directories, caches them content-addressably and
//! links them into a project's install tree.
//!
//! # Architecture Overview
//!
//! Trellis follows a manifest/tree model:
//! - `trellis.toml` declares the project's dependencies and their ranges
//! - `trellis.lock` records the exact resolution of every edge of the graph
//! - `trellis_packages/<registry>/<name>@<version>` links into the global cache
//!
//! An install pass resolves each request through the [`registry`] layer, records it in
//! the [`tree`], materializes it through the [`source`] and [`cache`] layers and recurses
//! into its dependencies. The tree is written only when the whole pass succeeded.
//!
//! # Core Modules
//!
//! ## Values
//! - [`version`] - npm-style semver ranges and versions
//! - [`package`] - package targets, exact packages, manifests and overrides
//! - [`tree`] - the install tree and its persisted form
//!
//! ## Fetching
//! - [`source`] - source locators and the git, tarball and `file:` protocols
//! - [`git`] - git subprocess wrapper
//! - [`fetch`] - HTTP client with pluggable credentials
//! - [`cache`] - content-addressed package cache with verification
//! - [`registry`] - registry endpoints, lookups, retries and redirects
//!
//! ## Orchestration
//! - [`installer`] - install, update, uninstall, link, checkout and clean
//! - [`ui`] - injected logging and prompting capabilities
//!
//! ## Supporting Modules
//! - [`config`] - global configuration (`~/.trellis/config.toml`)
//! - [`core`] - error types and user-facing error rendering
//! - [`constants`] - timeouts, file names and limits
//! - [`utils`] - atomic writes, directory links and platform helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use trellis::config::GlobalConfig;
//! use trellis::installer::{InstallOptions, InstallRequest, Installer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?;
//! let options = InstallOptions::from_config(&config);
//! let installer = Installer::new(".", config)?;
//!
//! let request = InstallRequest::parse("left-pad@^1.3.0", "npm")?;
//! let changed = installer.install(vec![request], options).await?;
//! println!("install tree changed: {changed}");
//! # Ok(())
//! # }
//! ```
//!
//! # Manifest Format (trellis.toml)
//!
//! ```toml
//! registry = "npm"
//!
//! [dependencies]
//! left-pad = "^1.3.0"
//! lodash4 = "npm:lodash@^4.17.0"
//! local-lib = "file:../local-lib"
//! tool = "git+https://example.com/tool.git#v2.0.0"
//!
//! [devDependencies]
//! tap = "^16.0.0"
//!
//! [overrides."npm:left-pad@1.3.0"]
//! main = "lib/index.js"
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod core;
pub mod fetch;
pub mod git;
pub mod installer;
pub mod package;
pub mod registry;
pub mod source;
pub mod tree;
pub mod ui;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
