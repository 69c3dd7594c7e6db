//! Built-in endpoint for npm-compatible registries.
//!
//! Speaks the registry document protocol: `GET <url>/<name>` returns every published
//! version with its `dist` block. Lookups are revalidated with `If-None-Match` when a
//! previous record carries an ETag. A version resolves to its `dist.tarball` URL with
//! `dist.integrity` (or the legacy `dist.shasum`) as the embedded hash.

use async_trait::async_trait;
use reqwest::header::ETAG;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

use super::EndpointContext;
use super::endpoint::{HookError, LookupOutcome, LookupRecord, RegistryEndpoint, ResolvedPackage, VersionEntry};
use crate::fetch::{FetchClient, FetchOptions};
use crate::source::SourceLocator;
use crate::version::PackageRange;

pub const DEFAULT_NPM_URL: &str = "https://registry.npmjs.org";

/// Abbreviated metadata is enough for resolution and much smaller.
const ACCEPT: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

#[derive(Debug, Deserialize)]
struct Packument {
    #[serde(default)]
    versions: BTreeMap<String, PackumentVersion>,
    #[serde(default, rename = "dist-tags")]
    dist_tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PackumentVersion {
    dist: Option<Dist>,
}

#[derive(Debug, Deserialize)]
struct Dist {
    tarball: String,
    integrity: Option<String>,
    shasum: Option<String>,
}

pub struct NpmEndpoint {
    url: String,
    fetch: Arc<FetchClient>,
}

impl NpmEndpoint {
    pub fn new(url: &str, fetch: Arc<FetchClient>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            fetch,
        }
    }

    /// Constructor registered under the `npm` handler name.
    pub fn construct(context: &EndpointContext) -> anyhow::Result<Arc<dyn RegistryEndpoint>> {
        let url = context.config.url.as_deref().unwrap_or(DEFAULT_NPM_URL);
        Url::parse(url).map_err(|e| crate::core::TrellisError::ConfigError {
            message: format!("registry '{}' has an invalid url '{}': {}", context.name, url, e),
        })?;
        Ok(Arc::new(Self::new(url, context.fetch.clone())))
    }

    /// `@scope/name` is requested as `@scope%2fname`.
    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.url, name.replace('/', "%2f"))
    }
}

#[async_trait]
impl RegistryEndpoint for NpmEndpoint {
    async fn lookup(
        &self,
        name: &str,
        _range: &PackageRange,
        cached: Option<&LookupRecord>,
    ) -> Result<LookupOutcome, HookError> {
        let url = self.package_url(name);
        let parsed = Url::parse(&url).map_err(|e| HookError::fatal(format!("invalid package url {url}: {e}")))?;
        let credentials = self.fetch.credentials(&parsed, &Method::GET, false).await?;
        let credentials = self.auth(&parsed, &Method::GET, credentials).await?;

        let mut options = FetchOptions {
            credentials: Some(credentials),
            ..FetchOptions::default()
        }
        .with_header("accept", ACCEPT);
        let etag = cached.and_then(|record| record.meta.get("etag")).and_then(Value::as_str);
        if let Some(etag) = etag {
            options = options.with_header("if-none-match", etag);
        }

        let response = self.fetch.fetch(&url, &options).await?;
        let status = response.status();
        match status {
            StatusCode::NOT_MODIFIED if cached.is_some() => return Ok(LookupOutcome::Unchanged),
            StatusCode::NOT_FOUND => return Ok(LookupOutcome::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(HookError::Credentials(format!("{url} responded with {status}")));
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                return Err(HookError::Retriable(format!("{url} responded with {status}")));
            }
            s if !s.is_success() => return Err(HookError::fatal(format!("{url} responded with {status}"))),
            _ => {}
        }

        let etag = response.headers().get(ETAG).and_then(|v| v.to_str().ok()).map(str::to_string);
        let packument: Packument = response
            .json()
            .await
            .map_err(|e| HookError::Retriable(format!("invalid registry document from {url}: {e}")))?;

        let versions = packument
            .versions
            .into_iter()
            .filter_map(|(version, info)| {
                let dist = info.dist?;
                let meta = json!({
                    "tarball": dist.tarball,
                    "integrity": dist.integrity.or(dist.shasum),
                });
                Some((
                    version,
                    VersionEntry {
                        meta,
                        resolved: None,
                    },
                ))
            })
            .collect();

        tracing::debug!(target: "registry", "Fetched npm document for {}", name);
        Ok(LookupOutcome::Found(LookupRecord {
            versions,
            tags: packument.dist_tags,
            redirect: None,
            meta: etag.map_or(Value::Null, |etag| json!({ "etag": etag })),
        }))
    }

    async fn resolve(
        &self,
        name: &str,
        version: &str,
        lookup: &LookupRecord,
    ) -> Result<Option<ResolvedPackage>, HookError> {
        let Some(entry) = lookup.versions.get(version) else {
            return Ok(None);
        };
        let tarball = entry
            .meta
            .get("tarball")
            .and_then(Value::as_str)
            .ok_or_else(|| HookError::fatal(format!("{name}@{version} has no tarball")))?;
        let locator = match entry.meta.get("integrity").and_then(Value::as_str) {
            Some(integrity) => format!("{tarball}#{integrity}"),
            None => tarball.to_string(),
        };
        let source = SourceLocator::parse(&locator).map_err(|e| HookError::Fatal(e.into()))?;
        Ok(Some(ResolvedPackage {
            source,
            config: None,
            override_value: None,
        }))
    }
}
