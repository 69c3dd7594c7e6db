//! Integration test suite for Trellis
//!
//! End-to-end tests that drive the installer, cache and registry layers against
//! temporary projects. Nothing here touches the network: packages come from an
//! in-memory registry serving `file:` sources, from tarballs served by a local HTTP
//! server, or from local git repositories.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! RUST_LOG=installer=debug cargo test --test integration -- --nocapture
//! ```
//!
//! # Test Organization
//!
//! - **install**: resolution, idempotence, roles, cycles and failure semantics
//! - **dedupe**: converging duplicate installs onto a fresh resolution
//! - **cleanup**: uninstall, update and clean collecting unreachable packages
//! - **cache**: cache hits, full verification and integrity failures
//! - **registry**: the npm endpoint over HTTP, credentials and revalidation
//! - **git**: git sources, checkouts and unsaved changes

mod cache;
mod cleanup;
mod dedupe;
mod git;
mod install;
mod registry;
