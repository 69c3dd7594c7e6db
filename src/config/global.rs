//! Global configuration management for Trellis.
//!
//! The user-wide configuration file (`~/.trellis/config.toml`) holds everything that
//! must not live in a project manifest: registry endpoints, per-host credentials,
//! proxy and TLS settings, and the tuning knobs of the install engine.
//!
//! # File Format
//!
//! ```toml
//! cache_dir = "/var/cache/trellis"
//! default_registry = "npm"
//! proxy = "http://proxy.internal:3128"
//! strict_ssl = true
//! hook_timeout_secs = 30
//! max_retries = 3
//!
//! [registries.npm]
//! handler = "npm"
//! url = "https://registry.npmjs.org"
//!
//! [registries.internal]
//! handler = "npm"
//! url = "https://npm.company.com"
//!
//! [auth."npm.company.com"]
//! token = "s3cr3t"
//! ```
//!
//! # Environment Overrides
//!
//! - `TRELLIS_CACHE_DIR` replaces `cache_dir`
//! - `TRELLIS_CONFIG_PATH` replaces the configuration file location

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{DEFAULT_HOOK_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_REGISTRY};

/// A configured registry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Name of the endpoint constructor (`npm` is built in)
    pub handler: String,
    /// Base URL handed to the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Credentials for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_registry_name() -> String {
    DEFAULT_REGISTRY.to_string()
}

const fn default_strict_ssl() -> bool {
    true
}

const fn default_hook_timeout_secs() -> u64 {
    DEFAULT_HOOK_TIMEOUT.as_secs()
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// User-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Root of the package cache. Defaults to `~/.trellis/cache`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Registry used for targets without a `registry:` prefix
    #[serde(default = "default_registry_name")]
    pub default_registry: String,

    /// Registry name to endpoint configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registries: BTreeMap<String, RegistryConfig>,

    /// Host name to credentials
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auth: BTreeMap<String, HostAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// PEM file with an extra trusted root certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,

    #[serde(default = "default_strict_ssl")]
    pub strict_ssl: bool,

    /// Per-call timeout for registry endpoint hooks
    #[serde(default = "default_hook_timeout_secs")]
    pub hook_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Concurrent downloads. Defaults to `max(10, 2 * cores)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Never touch the network
    #[serde(default)]
    pub offline: bool,

    /// Serve cached registry lookups without revalidation
    #[serde(default)]
    pub prefer_offline: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            default_registry: default_registry_name(),
            registries: BTreeMap::new(),
            auth: BTreeMap::new(),
            proxy: None,
            ca: None,
            strict_ssl: default_strict_ssl(),
            hook_timeout_secs: default_hook_timeout_secs(),
            max_retries: default_max_retries(),
            max_parallel: None,
            offline: false,
            prefer_offline: false,
        }
    }
}

impl GlobalConfig {
    /// Load from the default location. A missing file yields the defaults.
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    /// Save to a specific file. Credentials may be present, so on Unix the file is
    /// restricted to its owner.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize global config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write global config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut perms = fs::metadata(path)
                .await
                .with_context(|| format!("Failed to read permissions for {}", path.display()))?
                .permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms).await.with_context(|| {
                format!("Failed to set secure permissions on {}", path.display())
            })?;
        }

        Ok(())
    }

    /// `~/.trellis/config.toml`, or `TRELLIS_CONFIG_PATH`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("TRELLIS_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }
        Ok(trellis_home()?.join("config.toml"))
    }

    /// Resolved cache root: `TRELLIS_CACHE_DIR`, then `cache_dir`, then `~/.trellis/cache`.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TRELLIS_CACHE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(trellis_home()?.join("cache")),
        }
    }

    /// Endpoint configuration for `name`.
    ///
    /// The default registry is always available through the built-in `npm` handler
    /// even when it is not listed.
    #[must_use]
    pub fn registry(&self, name: &str) -> Option<RegistryConfig> {
        self.registries.get(name).cloned().or_else(|| {
            (name == DEFAULT_REGISTRY).then(|| RegistryConfig {
                handler: DEFAULT_REGISTRY.to_string(),
                url: None,
            })
        })
    }

    /// Credentials configured for `host`.
    #[must_use]
    pub fn auth_for_host(&self, host: &str) -> Option<&HostAuth> {
        self.auth.get(host)
    }

    #[must_use]
    pub const fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel.unwrap_or_else(crate::constants::default_max_parallel).max(1)
    }
}

fn trellis_home() -> Result<PathBuf> {
    let home = if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
            .join("trellis")
    } else {
        dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".trellis")
    };
    Ok(home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert_eq!(config.default_registry, "npm");
        assert!(config.strict_ssl);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.hook_timeout(), Duration::from_secs(30));
        assert!(config.max_parallel() >= 10);
        assert_eq!(config.registry("npm").unwrap().handler, "npm");
        assert!(config.registry("private").is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = GlobalConfig::default();
        config.registries.insert(
            "internal".to_string(),
            RegistryConfig {
                handler: "npm".to_string(),
                url: Some("https://npm.company.com".to_string()),
            },
        );
        config.auth.insert(
            "npm.company.com".to_string(),
            HostAuth {
                token: Some("secret".to_string()),
                ..HostAuth::default()
            },
        );
        config.max_parallel = Some(4);
        config.save_to(&path).await.unwrap();

        let loaded = GlobalConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.auth_for_host("npm.company.com").unwrap().token.as_deref(), Some("secret"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "offline = true\n").unwrap();

        let loaded = GlobalConfig::load_from(&path).await.unwrap();
        assert!(loaded.offline);
        assert_eq!(loaded.max_retries, 3);
        assert_eq!(loaded.default_registry, "npm");
    }

    #[test]
    #[serial_test::serial]
    fn test_cache_root_env_override() {
        let temp = TempDir::new().unwrap();
        let config = GlobalConfig {
            cache_dir: Some(temp.path().join("configured")),
            ..GlobalConfig::default()
        };
        assert_eq!(config.cache_root().unwrap(), temp.path().join("configured"));

        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var("TRELLIS_CACHE_DIR", temp.path().join("from-env")) };
        let root = config.cache_root();
        unsafe { std::env::remove_var("TRELLIS_CACHE_DIR") };
        assert_eq!(root.unwrap(), temp.path().join("from-env"));
    }
}
