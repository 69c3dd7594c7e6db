//! Configuration management for Trellis
//!
//! Trellis reads two kinds of configuration:
//!
//! 1. **Global configuration** (`~/.trellis/config.toml`) - registries, credentials,
//!    network settings and engine limits. See [`GlobalConfig`].
//! 2. **Project manifest** (`trellis.toml`) - the project's own dependency
//!    declarations, modelled as a [`crate::package::PackageConfig`].
//!
//! The global file is never part of a project, so credentials stay out of version
//! control.

pub mod global;

pub use global::{GlobalConfig, HostAuth, RegistryConfig};
