// Integration tests for the npm endpoint and registry-backed installs
//
// A local HTTP server plays the registry: it serves registry documents, tarballs,
// ETags and bearer-token protected routes.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use trellis::config::{GlobalConfig, RegistryConfig};
use trellis::core::{TrellisError, find_trellis_error};
use trellis::fetch::{CredentialProvider, Credentials, FetchClient};
use trellis::installer::{InstallOptions, InstallRequest, Installer};
use trellis::registry::npm::NpmEndpoint;
use trellis::registry::{LookupOutcome, RegistryEndpoint};
use trellis::test_utils::{PackageFixture, Route, TestProject, TestServer, sri};
use trellis::ui::NonInteractive;
use trellis::utils::fs::is_link;
use trellis::version::PackageRange;

/// Hands out a token only when asked for fresh credentials.
#[derive(Default)]
struct ExpiringToken {
    requests: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for ExpiringToken {
    async fn credentials(&self, _url: &Url, _method: &Method, fresh: bool) -> Result<Credentials> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials {
            token: fresh.then(|| "s3cret".to_string()),
            ..Credentials::default()
        })
    }
}

fn packument(server: &TestServer, name: &str, versions: &[(&str, &[u8])]) -> serde_json::Value {
    let mut entries = serde_json::Map::new();
    for (version, tarball) in versions {
        entries.insert(
            (*version).to_string(),
            json!({
                "name": name,
                "version": version,
                "dist": {
                    "tarball": server.url(&format!("/tarballs/{name}-{version}.tgz")),
                    "integrity": sri(tarball),
                }
            }),
        );
    }
    let latest = versions.last().map(|(version, _)| *version).unwrap_or_default();
    json!({ "name": name, "versions": entries, "dist-tags": { "latest": latest } })
}

/// Serve `name` at each version from `server`, registry document and tarballs.
fn publish(server: &TestServer, name: &str, versions: &[&str]) -> Result<()> {
    let mut tarballs = Vec::new();
    for version in versions {
        let tarball = PackageFixture::new(name, version).tarball()?;
        server.route(&format!("/tarballs/{name}-{version}.tgz"), Route::bytes(tarball.clone()));
        tarballs.push((*version, tarball));
    }
    let borrowed: Vec<(&str, &[u8])> = tarballs.iter().map(|(v, t)| (*v, t.as_slice())).collect();
    server.route(&format!("/{name}"), Route::json(&packument(server, name, &borrowed)).with_etag("\"v1\""));
    Ok(())
}

fn npm_config(project: &TestProject, server: &TestServer) -> GlobalConfig {
    let mut config = project.config();
    config.registries.insert(
        "npm".to_string(),
        RegistryConfig {
            handler: "npm".to_string(),
            url: Some(server.url("")),
        },
    );
    config
}

#[tokio::test]
async fn test_lookup_retries_with_fresh_credentials() -> Result<()> {
    let server = TestServer::start().await?;
    let body = packument(&server, "private-pkg", &[("1.0.0", b"x")]);
    server.route("/private-pkg", Route::json(&body).with_token("s3cret"));

    let provider = Arc::new(ExpiringToken::default());
    let fetch = Arc::new(FetchClient::new(provider.clone()));
    let npm = NpmEndpoint::new(&server.url(""), fetch);

    let outcome = npm.lookup("private-pkg", &PackageRange::parse("^1.0.0")?, None).await?;
    let LookupOutcome::Found(record) = outcome else {
        panic!("expected a fresh record, got {outcome:?}");
    };
    assert!(record.versions.contains_key("1.0.0"));
    assert_eq!(server.hits("/private-pkg"), 2);
    assert_eq!(provider.requests.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_lookup_revalidates_with_etag() -> Result<()> {
    let server = TestServer::start().await?;
    publish(&server, "pkg", &["1.0.0"])?;

    let fetch = Arc::new(FetchClient::from_config(Arc::new(GlobalConfig::default())));
    let npm = NpmEndpoint::new(&server.url(""), fetch);
    let range = PackageRange::parse("^1.0.0")?;

    let LookupOutcome::Found(record) = npm.lookup("pkg", &range, None).await? else {
        panic!("expected a fresh record");
    };
    assert_eq!(record.meta["etag"], "\"v1\"");
    assert_eq!(record.tags.get("latest").map(String::as_str), Some("1.0.0"));

    assert_eq!(npm.lookup("pkg", &range, Some(&record)).await?, LookupOutcome::Unchanged);
    assert_eq!(npm.lookup("missing", &range, None).await?, LookupOutcome::NotFound);

    let resolved = npm.resolve("pkg", "1.0.0", &record).await?.expect("1.0.0 is published");
    assert!(resolved.source.to_string().starts_with(&server.url("/tarballs/pkg-1.0.0.tgz#sha512-")));
    Ok(())
}

#[tokio::test]
async fn test_install_from_npm_registry() -> Result<()> {
    let project = TestProject::new()?;
    let server = TestServer::start().await?;
    publish(&server, "left-pad", &["1.0.0", "1.3.0"])?;

    let installer = Installer::new(&project.project_dir, npm_config(&project, &server))?;
    assert!(installer.install(vec![InstallRequest::parse("left-pad@^1.0.0", "npm")?], InstallOptions::default()).await?);

    let installed = project.installed("npm:left-pad@1.3.0")?;
    assert!(is_link(&installed));
    assert!(installed.join("index.js").exists());
    assert_eq!(server.hits("/left-pad"), 1);
    assert_eq!(server.hits("/tarballs/left-pad-1.3.0.tgz"), 1);
    assert_eq!(server.hits("/tarballs/left-pad-1.0.0.tgz"), 0);

    // A new installer revalidates the stored lookup and reuses the cached tarball
    let again = Installer::new(&project.project_dir, npm_config(&project, &server))?;
    let update = InstallOptions {
        latest: true,
        ..InstallOptions::default()
    };
    assert!(!again.update(&[], update).await?);
    assert_eq!(server.hits("/left-pad"), 2);
    assert_eq!(server.hits("/tarballs/left-pad-1.3.0.tgz"), 1);
    Ok(())
}

#[tokio::test]
async fn test_checkout_and_prompted_removal() -> Result<()> {
    let project = TestProject::new()?;
    let server = TestServer::start().await?;
    publish(&server, "pkg", &["1.0.0"])?;

    let installer = Installer::new(&project.project_dir, npm_config(&project, &server))?;
    installer.install(vec![InstallRequest::parse("pkg@^1.0.0", "npm")?], InstallOptions::default()).await?;
    let installed = project.installed("npm:pkg@1.0.0")?;
    assert!(is_link(&installed));

    assert!(!installer.checkout(&["pkg"]).await?);
    assert!(!is_link(&installed));
    assert!(installed.join("index.js").is_file());

    // Declining keeps the checked out directory
    let declining = Installer::new(&project.project_dir, npm_config(&project, &server))?
        .with_prompter(Arc::new(NonInteractive::no()));
    assert!(declining.uninstall(&["pkg"]).await?);
    assert!(project.tree().await?.get_resolution("pkg", None).is_none());
    assert!(installed.is_dir());

    let confirming = Installer::new(&project.project_dir, npm_config(&project, &server))?
        .with_prompter(Arc::new(NonInteractive::yes()));
    confirming.clean(true).await?;
    assert!(!installed.exists());
    Ok(())
}

#[tokio::test]
async fn test_offline_install_uses_stored_lookups() -> Result<()> {
    let project = TestProject::new()?;
    let server = TestServer::start().await?;
    publish(&server, "pkg", &["1.0.0"])?;
    publish(&server, "unseen", &["1.0.0"])?;

    let installer = Installer::new(&project.project_dir, npm_config(&project, &server))?;
    installer.install(vec![InstallRequest::parse("pkg@^1.0.0", "npm")?], InstallOptions::default()).await?;
    assert_eq!(server.hits("/pkg"), 1);
    assert_eq!(server.hits("/tarballs/pkg-1.0.0.tgz"), 1);

    // The project forgets the package; the global cache still has both the lookup and the files
    installer.uninstall(&["pkg"]).await?;
    assert!(!project.installed("npm:pkg@1.0.0")?.exists());

    let offline = InstallOptions {
        offline: true,
        ..InstallOptions::default()
    };
    let again = Installer::new(&project.project_dir, npm_config(&project, &server))?;
    assert!(again.install(vec![InstallRequest::parse("pkg@^1.0.0", "npm")?], offline).await?);
    assert!(project.installed("npm:pkg@1.0.0")?.exists());
    assert_eq!(server.hits("/pkg"), 1);
    assert_eq!(server.hits("/tarballs/pkg-1.0.0.tgz"), 1);

    let err = again
        .install(vec![InstallRequest::parse("unseen@^1.0.0", "npm")?], offline)
        .await
        .unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::OfflineUnresolved { .. })));
    assert_eq!(server.hits("/unseen"), 0);
    Ok(())
}
