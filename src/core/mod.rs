//! Core types for Trellis
//!
//! This module holds the error taxonomy shared by every layer of the engine:
//!
//! - [`TrellisError`] - Enumerated error types covering all failure modes of an
//!   install pass (user errors, registry/network errors, integrity errors and
//!   internal invariant violations)
//! - [`ErrorContext`] - User-friendly error wrapper with suggestions
//! - [`user_friendly_error`] - Convert any error to the user-friendly format
//!
//! Operations return [`anyhow::Result`] and attach context with
//! [`anyhow::Context`]; the typed error stays reachable through the cause chain
//! via [`find_trellis_error`].

pub mod error;

pub use error::{ErrorContext, TrellisError, find_trellis_error, user_friendly_error};
