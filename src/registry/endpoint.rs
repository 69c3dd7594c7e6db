//! The registry endpoint protocol.
//!
//! An endpoint knows how to talk to one kind of registry. The manager drives it
//! through four hooks, every call wrapped in the retry policy from
//! [`super::retry`]:
//!
//! - `lookup` - list the available versions of a package
//! - `resolve` - turn one version into a source locator (and optionally a manifest)
//! - `auth` - adjust the credentials of an outgoing request
//! - `configure` - re-establish credentials after an authorization failure
//!
//! `publish` exists on the trait for completeness; endpoints that cannot publish keep
//! the default, which fails.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

use crate::core::TrellisError;
use crate::fetch::Credentials;
use crate::package::PackageConfig;
use crate::source::SourceLocator;
use crate::version::PackageRange;

/// What `resolve` produced for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub source: SourceLocator,
    /// Manifest, when the registry serves it without a download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PackageConfig>,
    /// Registry-supplied override for the downloaded manifest
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_value: Option<Value>,
}

/// One published version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Endpoint-specific data needed to resolve the version later
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
    /// Cached output of the `resolve` hook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedPackage>,
}

/// Everything a lookup learned about a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupRecord {
    /// Version string to entry
    #[serde(default)]
    pub versions: BTreeMap<String, VersionEntry>,
    /// Named tags (`latest`, `next`, ...) to version strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// The package moved: `[registry:]name` to resolve instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    /// Endpoint-specific data such as an ETag
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

/// Result of the `lookup` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// The registry does not know the package
    NotFound,
    /// The cached record passed to the hook is still current
    Unchanged,
    /// A fresh record
    Found(LookupRecord),
}

/// Failure of an endpoint hook, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Worth trying again (timeouts, 5xx, dropped connections)
    #[error("{0}")]
    Retriable(String),
    /// The registry rejected our credentials
    #[error("{0}")]
    Credentials(String),
    /// Anything else
    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl HookError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(anyhow::anyhow!(message.into()))
    }
}

impl From<anyhow::Error> for HookError {
    fn from(error: anyhow::Error) -> Self {
        match crate::core::find_trellis_error(&error) {
            Some(TrellisError::NetworkError {
                ..
            }) => Self::Retriable(format!("{error:#}")),
            _ => Self::Fatal(error),
        }
    }
}

/// A registry implementation.
#[async_trait]
pub trait RegistryEndpoint: Send + Sync {
    /// List the versions of `name`. `cached` is the previous record, if any, for
    /// conditional requests.
    async fn lookup(
        &self,
        name: &str,
        range: &PackageRange,
        cached: Option<&LookupRecord>,
    ) -> Result<LookupOutcome, HookError>;

    /// Turn `version` of `name` into a source.
    async fn resolve(
        &self,
        name: &str,
        version: &str,
        lookup: &LookupRecord,
    ) -> Result<Option<ResolvedPackage>, HookError>;

    async fn auth(&self, _url: &Url, _method: &Method, credentials: Credentials) -> Result<Credentials, HookError> {
        Ok(credentials)
    }

    async fn configure(&self) -> Result<(), HookError> {
        Ok(())
    }

    async fn publish(&self, _dir: &Path, config: &PackageConfig) -> Result<(), HookError> {
        Err(HookError::fatal(format!(
            "this registry does not support publishing {}",
            config.name.as_deref().unwrap_or("packages")
        )))
    }
}
