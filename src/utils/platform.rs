//! Platform-specific helpers.

/// Whether the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Name of the git executable for the current platform.
///
/// The executable still has to be on `PATH`; a missing git surfaces as
/// [`crate::core::TrellisError::GitNotFound`] when a command is spawned.
#[must_use]
pub const fn get_git_command() -> &'static str {
    if is_windows() {
        "git.exe"
    } else {
        "git"
    }
}
