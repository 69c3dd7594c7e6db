// Integration tests for the global package cache
//
// Tarballs are served by a local HTTP server so every download is observable
// through the server's hit counter.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use trellis::cache::{CacheOptions, GlobalCache, Verification};
use trellis::config::GlobalConfig;
use trellis::core::{TrellisError, find_trellis_error};
use trellis::fetch::FetchClient;
use trellis::source::SourceLocator;
use trellis::test_utils::{PackageFixture, Route, TestServer, sri};

fn cache(root: &std::path::Path) -> GlobalCache {
    let fetch = Arc::new(FetchClient::from_config(Arc::new(GlobalConfig::default())));
    GlobalCache::new(root, fetch, 4)
}

#[tokio::test]
async fn test_second_install_is_a_cache_hit() -> Result<()> {
    let temp = TempDir::new()?;
    let server = TestServer::start().await?;
    let tarball = PackageFixture::new("pkg", "1.0.0").file("lib/util.js", "exports.x = 1;").tarball()?;
    server.route("/pkg-1.0.0.tgz", Route::bytes(tarball.clone()));

    let cache = cache(&temp.path().join("cache"));
    let source = SourceLocator::parse(&format!("{}#{}", server.url("/pkg-1.0.0.tgz"), sri(&tarball)))?;

    let first = cache.ensure_global_install(&source, None, CacheOptions::default()).await?;
    assert!(first.changed);
    assert_eq!(first.config.name.as_deref(), Some("pkg"));
    assert!(first.path.join("index.js").exists());
    assert!(first.path.join("lib/util.js").exists());
    assert_eq!(first.path, cache.package_dir(&source.hash()));

    let second = cache.ensure_global_install(&source, None, CacheOptions::default()).await?;
    assert!(!second.changed);
    assert_eq!(second.path, first.path);
    assert_eq!(server.hits("/pkg-1.0.0.tgz"), 1);

    let forced = CacheOptions {
        force: true,
        ..CacheOptions::default()
    };
    assert!(cache.ensure_global_install(&source, None, forced).await?.changed);
    assert_eq!(server.hits("/pkg-1.0.0.tgz"), 2);
    Ok(())
}

#[tokio::test]
async fn test_full_verification_redownloads_modified_entry() -> Result<()> {
    let temp = TempDir::new()?;
    let server = TestServer::start().await?;
    let tarball = PackageFixture::new("pkg", "1.0.0").tarball()?;
    server.route("/pkg.tgz", Route::bytes(tarball.clone()));

    let cache = cache(&temp.path().join("cache"));
    let source = SourceLocator::parse(&format!("{}#{}", server.url("/pkg.tgz"), sri(&tarball)))?;
    let install = cache.ensure_global_install(&source, None, CacheOptions::default()).await?;

    let later = SystemTime::now() + Duration::from_secs(3600);
    std::fs::File::options().write(true).open(install.path.join("index.js"))?.set_modified(later)?;
    assert_eq!(cache.verify(&install.hash, true).await?.0, Verification::Invalid);

    // A plain lookup trusts the record
    assert!(!cache.ensure_global_install(&source, None, CacheOptions::default()).await?.changed);
    assert_eq!(server.hits("/pkg.tgz"), 1);

    let full = CacheOptions {
        full_verification: true,
        ..CacheOptions::default()
    };
    assert!(cache.ensure_global_install(&source, None, full).await?.changed);
    assert_eq!(server.hits("/pkg.tgz"), 2);
    assert_eq!(cache.verify(&install.hash, true).await?.0, Verification::VerifiedValid);
    Ok(())
}

#[tokio::test]
async fn test_integrity_mismatch_promotes_nothing() -> Result<()> {
    let temp = TempDir::new()?;
    let server = TestServer::start().await?;
    let tarball = PackageFixture::new("pkg", "1.0.0").tarball()?;
    server.route("/pkg.tgz", Route::bytes(tarball));

    let cache = cache(&temp.path().join("cache"));
    let wrong = sri(b"something else entirely");
    let source = SourceLocator::parse(&format!("{}#{}", server.url("/pkg.tgz"), wrong))?;

    let err = cache.ensure_global_install(&source, None, CacheOptions::default()).await.unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::IntegrityError { .. })));
    assert!(!cache.package_dir(&source.hash()).exists());
    assert_eq!(cache.verify(&source.hash(), false).await?.0, Verification::NotInstalled);
    Ok(())
}

#[tokio::test]
async fn test_overrides_materialize_separately() -> Result<()> {
    let temp = TempDir::new()?;
    let server = TestServer::start().await?;
    let tarball = PackageFixture::new("pkg", "1.0.0").tarball()?;
    server.route("/pkg.tgz", Route::bytes(tarball));

    let cache = cache(&temp.path().join("cache"));
    let source = SourceLocator::parse(&server.url("/pkg.tgz"))?;
    let plain = cache.ensure_global_install(&source, None, CacheOptions::default()).await?;
    let overridden = cache
        .ensure_global_install(&source, Some(&serde_json::json!({ "main": "lib/main.js" })), CacheOptions::default())
        .await?;

    assert_ne!(plain.hash, overridden.hash);
    assert_eq!(plain.config.main.as_deref(), Some("index.js"));
    assert_eq!(overridden.config.main.as_deref(), Some("lib/main.js"));
    assert!(overridden.override_delta.is_some());
    Ok(())
}
