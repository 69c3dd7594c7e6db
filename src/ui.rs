//! User-facing capabilities injected into the installer.
//!
//! The engine never prints or reads a terminal directly. Progress messages go through a
//! [`Logger`] and questions through a [`Prompter`], both supplied by the embedding
//! application. [`TracingLogger`] and [`NonInteractive`] are the defaults.

use anyhow::Result;
use async_trait::async_trait;

/// Sink for progress messages meant for the user.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn debug(&self, message: &str);
    /// A step finished successfully
    fn ok(&self, message: &str);
}

/// Forwards messages to `tracing` under the `installer` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "installer", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "installer", "{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "installer", "{}", message);
    }

    fn ok(&self, message: &str) {
        tracing::info!(target: "installer", ok = true, "{}", message);
    }
}

/// Asks the user to decide something.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// A yes/no question. `default` is the answer when the user just presses enter.
    async fn confirm(&self, question: &str, default: bool) -> Result<bool>;

    /// A free-form question. `None` means the user gave no answer.
    async fn input(&self, question: &str, default: Option<&str>) -> Result<Option<String>>;
}

/// Answers every question without asking anyone.
///
/// Confirmations get `answer` when set, else the question's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive {
    pub answer: Option<bool>,
}

impl NonInteractive {
    /// Confirm everything.
    #[must_use]
    pub const fn yes() -> Self {
        Self {
            answer: Some(true),
        }
    }

    /// Decline everything.
    #[must_use]
    pub const fn no() -> Self {
        Self {
            answer: Some(false),
        }
    }
}

#[async_trait]
impl Prompter for NonInteractive {
    async fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let answer = self.answer.unwrap_or(default);
        tracing::debug!(target: "installer", "{} -> {}", question, if answer { "yes" } else { "no" });
        Ok(answer)
    }

    async fn input(&self, _question: &str, default: Option<&str>) -> Result<Option<String>> {
        Ok(default.map(str::to_string))
    }
}
