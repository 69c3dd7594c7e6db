//! Error handling for Trellis
//!
//! This module provides the error taxonomy and user-friendly error reporting for the
//! resolver and installer. The error system is built around two types:
//! - [`TrellisError`] - Enumerated error types for every failure mode of an install pass
//! - [`ErrorContext`] - Wrapper that adds user-friendly details and suggestions
//!
//! # Error Categories
//!
//! - **User errors**: invalid target syntax, ambiguous selectors, disallowed override
//!   keys, missing ranges, unsaved local changes, offline lookups with nothing cached.
//!   These are actionable and displayed without a cause chain.
//! - **Registry / network errors**: surfaced only after the retry policy is exhausted,
//!   tagged with the registry, package and endpoint hook.
//! - **Integrity errors**: a downloaded artifact does not match its embedded hash.
//!   Never retried.
//! - **Internal errors**: invariant violations such as two different sources recorded
//!   for one resolved package.
//!
//! Use [`user_friendly_error`] to convert any [`anyhow::Error`] into an [`ErrorContext`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use trellis::core::{TrellisError, user_friendly_error};
//!
//! let error = anyhow::Error::from(TrellisError::InvalidTarget {
//!     target: "npm:@scope".to_string(),
//!     reason: "scoped names must contain a '/'".to_string(),
//! });
//! let ctx = user_friendly_error(error);
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for Trellis operations
///
/// Each variant names one failure mode of the resolve → fetch → materialize pipeline.
/// Variants carry plain strings so errors can be cloned and shared between the
/// concurrent tasks of a single install pass.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// A package target string could not be parsed
    #[error("Invalid package target '{target}': {reason}")]
    InvalidTarget {
        /// The offending target text
        target: String,
        /// Why it was rejected
        reason: String,
    },

    /// A source locator string could not be parsed
    #[error("Invalid source locator '{locator}': {reason}")]
    InvalidLocator {
        /// The offending locator text
        locator: String,
        /// Why it was rejected
        reason: String,
    },

    /// A selector matched more than one installed package
    #[error("Selector '{selector}' is ambiguous, it matches: {matches}")]
    AmbiguousSelector {
        /// The selector as given
        selector: String,
        /// Comma separated list of matching packages
        matches: String,
    },

    /// A package override uses a key outside the allow-list
    #[error("Override key '{key}' is not allowed")]
    DisallowedOverride {
        /// First disallowed key
        key: String,
    },

    /// An operation needed a version range and none was given
    #[error("No version range given for '{name}'")]
    MissingRange {
        /// Package name
        name: String,
    },

    /// A checked-out git working copy has local changes
    #[error("'{path}' has uncommitted local changes")]
    UnsavedChanges {
        /// Path of the working copy
        path: String,
    },

    /// Offline mode with nothing cached for the package
    #[error("Unable to resolve '{package}' offline, nothing is cached for it")]
    OfflineUnresolved {
        /// `registry:name` of the package
        package: String,
    },

    /// Registry has no version of the package satisfying the target
    #[error("No version of '{package}' matches '{range}'")]
    PackageNotFound {
        /// `registry:name` of the package
        package: String,
        /// Requested range
        range: String,
    },

    /// A selector or name did not match any installed package
    #[error("'{selector}' is not installed")]
    NotInstalled {
        /// The selector or name as given
        selector: String,
    },

    /// A second top-level call entered an installer already running a pass
    #[error("Another install operation is already running on this installer")]
    InstallInProgress,

    /// A registry endpoint hook failed after exhausting the retry policy
    #[error("Registry '{registry}' failed to {hook} '{package}': {reason}")]
    RegistryError {
        /// Registry name
        registry: String,
        /// Package name
        package: String,
        /// Endpoint hook (`lookup`, `resolve`, `auth`, ...)
        hook: String,
        /// Last failure message
        reason: String,
    },

    /// Registry redirects form a cycle
    #[error("Circular redirect resolving '{package}': {chain}")]
    CircularRedirect {
        /// Package being resolved
        package: String,
        /// Redirect chain
        chain: String,
    },

    /// No registry is configured under this name
    #[error("Registry '{name}' is not configured")]
    UnknownRegistry {
        /// Registry name
        name: String,
    },

    /// HTTP transport failure
    #[error("Network error: {operation}")]
    NetworkError {
        /// What was being done
        operation: String,
        /// Underlying reason
        reason: String,
    },

    /// A downloaded artifact does not match its embedded hash
    #[error("Integrity check failed for {source_url}: expected {expected}, got {actual}")]
    IntegrityError {
        /// Locator of the artifact
        source_url: String,
        /// Expected digest
        expected: String,
        /// Computed digest
        actual: String,
    },

    /// Git executable not found in PATH
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// Git remote or reference does not exist
    #[error("Git repository or reference not found: {url}")]
    GitNotFoundRemote {
        /// Remote URL (with ref)
        url: String,
    },

    /// Git authentication failed for repository access
    #[error("Git authentication failed for repository: {url}")]
    GitAuthenticationFailed {
        /// Remote URL
        url: String,
    },

    /// Any other failing git command
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git operation that failed (e.g., "clone", "fetch", "checkout")
        operation: String,
        /// The error output from the git command
        stderr: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },

    /// Invariant violation
    #[error("Internal error: {message}")]
    InternalError {
        /// Description of the violated invariant
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Semver parsing error
    #[error("Semver parsing error: {0}")]
    SemverError(#[from] semver::Error),

    /// Generic error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

impl TrellisError {
    /// Whether this error is actionable user input rather than an operational failure.
    ///
    /// User errors are displayed as a message only; everything else reports the full
    /// cause chain.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. }
                | Self::InvalidLocator { .. }
                | Self::AmbiguousSelector { .. }
                | Self::DisallowedOverride { .. }
                | Self::MissingRange { .. }
                | Self::UnsavedChanges { .. }
                | Self::OfflineUnresolved { .. }
                | Self::PackageNotFound { .. }
                | Self::NotInstalled { .. }
                | Self::InstallInProgress
                | Self::UnknownRegistry { .. }
        )
    }

    /// Whether this is an integrity failure. Integrity failures are never retried.
    #[must_use]
    pub const fn is_integrity_error(&self) -> bool {
        matches!(self, Self::IntegrityError { .. })
    }

    /// Shorthand for an [`TrellisError::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl Clone for TrellisError {
    fn clone(&self) -> Self {
        match self {
            Self::InvalidTarget {
                target,
                reason,
            } => Self::InvalidTarget {
                target: target.clone(),
                reason: reason.clone(),
            },
            Self::InvalidLocator {
                locator,
                reason,
            } => Self::InvalidLocator {
                locator: locator.clone(),
                reason: reason.clone(),
            },
            Self::AmbiguousSelector {
                selector,
                matches,
            } => Self::AmbiguousSelector {
                selector: selector.clone(),
                matches: matches.clone(),
            },
            Self::DisallowedOverride {
                key,
            } => Self::DisallowedOverride {
                key: key.clone(),
            },
            Self::MissingRange {
                name,
            } => Self::MissingRange {
                name: name.clone(),
            },
            Self::UnsavedChanges {
                path,
            } => Self::UnsavedChanges {
                path: path.clone(),
            },
            Self::OfflineUnresolved {
                package,
            } => Self::OfflineUnresolved {
                package: package.clone(),
            },
            Self::PackageNotFound {
                package,
                range,
            } => Self::PackageNotFound {
                package: package.clone(),
                range: range.clone(),
            },
            Self::NotInstalled {
                selector,
            } => Self::NotInstalled {
                selector: selector.clone(),
            },
            Self::InstallInProgress => Self::InstallInProgress,
            Self::RegistryError {
                registry,
                package,
                hook,
                reason,
            } => Self::RegistryError {
                registry: registry.clone(),
                package: package.clone(),
                hook: hook.clone(),
                reason: reason.clone(),
            },
            Self::CircularRedirect {
                package,
                chain,
            } => Self::CircularRedirect {
                package: package.clone(),
                chain: chain.clone(),
            },
            Self::UnknownRegistry {
                name,
            } => Self::UnknownRegistry {
                name: name.clone(),
            },
            Self::NetworkError {
                operation,
                reason,
            } => Self::NetworkError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::IntegrityError {
                source_url,
                expected,
                actual,
            } => Self::IntegrityError {
                source_url: source_url.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::GitNotFound => Self::GitNotFound,
            Self::GitNotFoundRemote {
                url,
            } => Self::GitNotFoundRemote {
                url: url.clone(),
            },
            Self::GitAuthenticationFailed {
                url,
            } => Self::GitAuthenticationFailed {
                url: url.clone(),
            },
            Self::GitCommandError {
                operation,
                stderr,
            } => Self::GitCommandError {
                operation: operation.clone(),
                stderr: stderr.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::InternalError {
                message,
            } => Self::InternalError {
                message: message.clone(),
            },
            // For errors that don't implement Clone, convert to Other
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::JsonError(e) => Self::Other {
                message: format!("JSON error: {e}"),
            },
            Self::SemverError(e) => Self::Other {
                message: format!("Semver parsing error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// `ErrorContext` wraps a [`TrellisError`] and adds optional suggestions for
/// resolution and additional details.
///
/// When displayed, errors show:
/// 1. **Error**: The main error message in red
/// 2. **Details**: Additional context about the error in yellow (optional)
/// 3. **Suggestion**: Actionable steps to resolve the issue in green (optional)
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: TrellisError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from a [`TrellisError`]
    #[must_use]
    pub const fn new(error: TrellisError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Find the first [`TrellisError`] anywhere in an error's cause chain.
#[must_use]
pub fn find_trellis_error(error: &anyhow::Error) -> Option<&TrellisError> {
    error.chain().find_map(|cause| cause.downcast_ref::<TrellisError>())
}

/// Convert any error into a user-friendly [`ErrorContext`]
///
/// User errors keep only their message and a tailored suggestion. All other errors
/// carry the full cause chain in their message so registry and internal failures can
/// be diagnosed.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(trellis_error) = find_trellis_error(&error) {
        if trellis_error.is_user_error() {
            return create_error_context(trellis_error.clone());
        }
        if error.chain().count() == 1 {
            return create_error_context(trellis_error.clone());
        }
    }

    // Generic error - include the full error chain for better diagnostics
    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    let ctx = ErrorContext::new(TrellisError::Other {
        message,
    });
    match find_trellis_error(&error) {
        Some(TrellisError::IntegrityError { .. }) => ctx
            .with_suggestion("The downloaded artifact was discarded. Retry, or check the source for tampering"),
        Some(TrellisError::RegistryError { .. } | TrellisError::NetworkError { .. }) => ctx
            .with_suggestion("Check your network connection and registry credentials, or retry with prefer-offline"),
        _ => ctx,
    }
}

/// Attach suggestions and details to specific error variants
fn create_error_context(error: TrellisError) -> ErrorContext {
    match &error {
        TrellisError::InvalidTarget { .. } => ErrorContext::new(error)
            .with_suggestion("Targets look like 'registry:name@range', e.g. 'npm:@scope/pkg@^1.2.0'"),

        TrellisError::AmbiguousSelector { .. } => ErrorContext::new(error)
            .with_suggestion("Add a registry or version range to the selector to narrow it down"),

        TrellisError::DisallowedOverride { .. } => ErrorContext::new(error)
            .with_details("Only main, map, files, ignore, bin and the dependency fields may be overridden"),

        TrellisError::UnsavedChanges { path } => {
            let suggestion = format!("Commit or stash the changes in {path} first");
            ErrorContext::new(error).with_suggestion(suggestion)
        }

        TrellisError::OfflineUnresolved { .. } => ErrorContext::new(error)
            .with_suggestion("Run once while online so the registry lookup is cached"),

        TrellisError::InstallInProgress => ErrorContext::new(error)
            .with_details("Installer operations on one instance cannot be interleaved"),

        TrellisError::GitNotFound => ErrorContext::new(error)
            .with_suggestion("Install git from https://git-scm.com/ or your package manager")
            .with_details("Git sources require git to be installed and available in your PATH"),

        TrellisError::GitAuthenticationFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Configure git credentials or SSH keys for this remote"),

        TrellisError::IntegrityError { .. } => ErrorContext::new(error)
            .with_suggestion("The downloaded artifact was discarded. Retry, or check the source for tampering"),

        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        let error = TrellisError::GitNotFound;
        assert_eq!(error.to_string(), "Git is not installed or not found in PATH");

        let error = TrellisError::DisallowedOverride {
            key: "name".to_string(),
        };
        assert_eq!(error.to_string(), "Override key 'name' is not allowed");

        let error = TrellisError::RegistryError {
            registry: "npm".to_string(),
            package: "lodash".to_string(),
            hook: "lookup".to_string(),
            reason: "timed out".to_string(),
        };
        assert_eq!(error.to_string(), "Registry 'npm' failed to lookup 'lodash': timed out");
    }

    #[test]
    fn test_user_error_classification() {
        assert!(TrellisError::InstallInProgress.is_user_error());
        assert!(
            TrellisError::MissingRange {
                name: "x".to_string()
            }
            .is_user_error()
        );
        assert!(!TrellisError::internal("boom").is_user_error());
        assert!(
            TrellisError::IntegrityError {
                source_url: "https://x/y.tgz".to_string(),
                expected: "a".to_string(),
                actual: "b".to_string(),
            }
            .is_integrity_error()
        );
    }

    #[test]
    fn test_user_error_shows_message_only() {
        let err = anyhow::Error::from(TrellisError::OfflineUnresolved {
            package: "npm:react".to_string(),
        })
        .context("Failed to install react");

        let ctx = user_friendly_error(err);
        assert!(matches!(ctx.error, TrellisError::OfflineUnresolved { .. }));
        assert!(ctx.suggestion.is_some());
    }

    #[test]
    fn test_internal_error_keeps_cause_chain() {
        let err = anyhow::Error::from(TrellisError::internal("two sources"))
            .context("install pass failed");

        let ctx = user_friendly_error(err);
        let message = ctx.error.to_string();
        assert!(message.contains("install pass failed"));
        assert!(message.contains("Caused by"));
        assert!(message.contains("two sources"));
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new(TrellisError::GitNotFound)
            .with_suggestion("Install git")
            .with_details("Git is required");
        let text = ctx.to_string();
        assert!(text.contains("Details: Git is required"));
        assert!(text.contains("Suggestion: Install git"));
    }
}
