//! HTTP fetching with pluggable credentials.
//!
//! [`FetchClient`] is the only component that talks HTTP. Registry endpoints and the
//! tarball source both go through it so proxy, TLS and authentication handling is
//! shared. Credentials come from a [`CredentialProvider`]; a `401`/`403` response
//! triggers exactly one retry with freshly requested credentials.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method, Response, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::GlobalConfig;
use crate::core::TrellisError;

/// Credentials and transport settings for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// `(username, password)`
    pub basic_auth: Option<(String, String)>,
    /// Bearer token
    pub token: Option<String>,
    pub proxy: Option<String>,
    /// PEM file with an extra trusted root
    pub ca: Option<PathBuf>,
    pub strict_ssl: bool,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            basic_auth: None,
            token: None,
            proxy: None,
            ca: None,
            strict_ssl: true,
        }
    }
}

/// Supplies credentials for outgoing requests.
///
/// `fresh` is set on the retry after an authorization failure; providers backed by
/// expiring tokens should refresh them instead of serving a cached value.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, url: &Url, method: &Method, fresh: bool) -> Result<Credentials>;
}

/// Credentials from the `[auth]` table of the global configuration.
pub struct ConfigCredentials {
    config: Arc<GlobalConfig>,
}

impl ConfigCredentials {
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
        }
    }
}

#[async_trait]
impl CredentialProvider for ConfigCredentials {
    async fn credentials(&self, url: &Url, _method: &Method, _fresh: bool) -> Result<Credentials> {
        let mut credentials = Credentials {
            proxy: self.config.proxy.clone(),
            ca: self.config.ca.clone(),
            strict_ssl: self.config.strict_ssl,
            ..Credentials::default()
        };
        if let Some(auth) = url.host_str().and_then(|host| self.config.auth_for_host(host)) {
            credentials.token = auth.token.clone();
            if let Some(username) = &auth.username {
                credentials.basic_auth =
                    Some((username.clone(), auth.password.clone().unwrap_or_default()));
            }
        }
        Ok(credentials)
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Use these instead of asking the provider for the first attempt
    pub credentials: Option<Credentials>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            timeout: None,
            credentials: None,
        }
    }
}

impl FetchOptions {
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Clients differ only in transport settings, so they are cached by those.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<String>,
    ca: Option<PathBuf>,
    strict_ssl: bool,
}

/// Shared HTTP client.
pub struct FetchClient {
    credentials: Arc<dyn CredentialProvider>,
    clients: DashMap<ClientKey, Client>,
}

impl FetchClient {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            clients: DashMap::new(),
        }
    }

    /// A client using the global configuration's credentials.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        Self::new(Arc::new(ConfigCredentials::new(config)))
    }

    /// Ask the provider for credentials.
    pub async fn credentials(&self, url: &Url, method: &Method, fresh: bool) -> Result<Credentials> {
        self.credentials.credentials(url, method, fresh).await
    }

    /// Send a request. Transport failures become [`TrellisError::NetworkError`];
    /// HTTP error statuses are returned to the caller as responses.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Response> {
        let parsed = Url::parse(url).map_err(|e| TrellisError::NetworkError {
            operation: format!("parse URL {url}"),
            reason: e.to_string(),
        })?;

        let credentials = match &options.credentials {
            Some(credentials) => credentials.clone(),
            None => self.credentials(&parsed, &options.method, false).await?,
        };
        let response = self.send(&parsed, options, &credentials).await?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            tracing::debug!(
                target: "fetch",
                "{} returned {}, retrying with fresh credentials",
                crate::git::strip_auth_from_url(url),
                response.status()
            );
            let fresh = self.credentials(&parsed, &options.method, true).await?;
            return self.send(&parsed, options, &fresh).await;
        }
        Ok(response)
    }

    async fn send(&self, url: &Url, options: &FetchOptions, credentials: &Credentials) -> Result<Response> {
        let client = self.client_for(credentials)?;
        let mut request = client.request(options.method.clone(), url.clone());
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        if let Some(token) = &credentials.token {
            request = request.bearer_auth(token);
        } else if let Some((username, password)) = &credentials.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        request.send().await.map_err(|e| {
            TrellisError::NetworkError {
                operation: format!("{} {}", options.method, crate::git::strip_auth_from_url(url.as_str())),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn client_for(&self, credentials: &Credentials) -> Result<Client> {
        let key = ClientKey {
            proxy: credentials.proxy.clone(),
            ca: credentials.ca.clone(),
            strict_ssl: credentials.strict_ssl,
        };
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("trellis/{}", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!key.strict_ssl);
        if let Some(proxy) = &key.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("Invalid proxy URL")?);
        }
        if let Some(ca) = &key.ca {
            let pem = std::fs::read(ca)
                .with_context(|| format!("Failed to read CA file {}", ca.display()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .with_context(|| format!("Invalid CA certificate {}", ca.display()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}
