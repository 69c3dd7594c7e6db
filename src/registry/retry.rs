//! Retry policy for endpoint hooks.
//!
//! Every hook call gets a timeout. Timeouts and [`HookError::Retriable`] failures are
//! retried up to `max_retries` times with exponential backoff. A
//! [`HookError::Credentials`] failure runs the endpoint's `configure` hook once and
//! tries again. When the policy gives up, only the package being worked on fails, with
//! a [`TrellisError::RegistryError`] naming the registry, package and hook.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

use super::endpoint::{HookError, RegistryEndpoint};
use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use crate::core::{TrellisError, find_trellis_error};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Which hook is being called, for error reporting.
#[derive(Debug, Clone, Copy)]
pub struct HookCall<'a> {
    pub registry: &'a str,
    pub package: &'a str,
    pub hook: &'a str,
}

impl HookCall<'_> {
    fn failed(&self, reason: String) -> anyhow::Error {
        TrellisError::RegistryError {
            registry: self.registry.to_string(),
            package: self.package.to_string(),
            hook: self.hook.to_string(),
            reason,
        }
        .into()
    }
}

impl RetryPolicy {
    /// Run `op` under the policy.
    pub async fn call<T, F, Fut>(&self, endpoint: &dyn RegistryEndpoint, call: HookCall<'_>, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HookError>>,
    {
        // 10ms, 20ms, 40ms... capped at 500ms
        let mut delays = ExponentialBackoff::from_millis(2)
            .factor(STARTING_BACKOFF_DELAY_MS / 2)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
            .take(self.max_retries as usize);
        let mut reconfigured = false;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(HookError::Retriable(format!("timed out after {}s", self.timeout.as_secs_f32()))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(HookError::Credentials(reason)) if !reconfigured => {
                    reconfigured = true;
                    tracing::warn!(
                        target: "registry",
                        "{} rejected credentials for {} ({}), reconfiguring",
                        call.registry,
                        call.package,
                        reason
                    );
                    let configure = HookCall {
                        hook: "configure",
                        ..call
                    };
                    match tokio::time::timeout(self.timeout, endpoint.configure()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(configure.failed(e.to_string())),
                        Err(_) => return Err(configure.failed("timed out".to_string())),
                    }
                }
                Err(HookError::Credentials(reason)) => return Err(call.failed(reason)),
                Err(HookError::Retriable(reason)) => match delays.next() {
                    Some(delay) => {
                        tracing::debug!(
                            target: "registry",
                            "{} {} for {} failed ({}), retrying in {:?}",
                            call.registry,
                            call.hook,
                            call.package,
                            reason,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(call.failed(reason)),
                },
                Err(HookError::Fatal(error)) => {
                    // Typed user and integrity failures keep their identity
                    let passthrough = find_trellis_error(&error)
                        .is_some_and(|e| e.is_user_error() || e.is_integrity_error());
                    if passthrough {
                        return Err(error);
                    }
                    return Err(call.failed(format!("{error:#}")));
                }
            }
        }
    }
}
