// Integration tests for package installs
//
// Covers version selection, lock-mode idempotence, dependency cycles, peer and
// optional roles, resource installs and the all-or-nothing persistence of a pass.

use anyhow::Result;
use std::fs;

use trellis::core::{TrellisError, find_trellis_error};
use trellis::installer::{InstallOptions, InstallRequest};
use trellis::package::ExactPackage;
use trellis::source::SourceLocator;
use trellis::test_utils::{PackageFixture, TestProject};
use trellis::utils::fs::is_link;

fn exact(s: &str) -> ExactPackage {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_resolves_highest_stable_version() -> Result<()> {
    let project = TestProject::new()?;
    for version in ["1.0.0", "1.2.0", "1.2.0-beta"] {
        project.publish(&PackageFixture::new("pkg", version))?;
    }

    let installer = project.installer()?;
    let request = InstallRequest::parse("pkg@^1.0.0", "npm")?;
    assert!(installer.install(vec![request], InstallOptions::default()).await?);

    let tree = project.tree().await?;
    assert_eq!(tree.get_resolution("pkg", None), Some(&exact("npm:pkg@1.2.0")));
    let installed = project.installed("npm:pkg@1.2.0")?;
    assert!(is_link(&installed));
    assert!(installed.join("index.js").exists());
    assert_eq!(project.manifest()?.dependencies.get("pkg").map(String::as_str), Some("^1.0.0"));
    Ok(())
}

#[tokio::test]
async fn test_edge_selects_prerelease_when_nothing_stable_matches() -> Result<()> {
    let project = TestProject::new()?;
    for version in ["1.2.0-beta", "2.0.0"] {
        project.publish(&PackageFixture::new("pkg", version))?;
    }
    let installer = project.installer()?;

    let err = installer
        .install(vec![InstallRequest::parse("pkg@^1.0.0", "npm")?], InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::PackageNotFound { .. })));
    assert!(!project.tree_file().exists(), "a failed pass persists nothing");

    let edge = InstallOptions {
        edge: true,
        ..InstallOptions::default()
    };
    installer.install(vec![InstallRequest::parse("pkg@^1.0.0", "npm")?], edge).await?;
    let tree = project.tree().await?;
    assert_eq!(tree.get_resolution("pkg", None), Some(&exact("npm:pkg@1.2.0-beta")));
    Ok(())
}

#[tokio::test]
async fn test_wildcard_request_saves_caret_range() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("pkg", "1.4.2"))?;

    let installer = project.installer()?;
    installer.install(vec![InstallRequest::parse("pkg", "npm")?], InstallOptions::default()).await?;
    assert_eq!(project.manifest()?.dependencies.get("pkg").map(String::as_str), Some("^1.4.2"));

    // Nothing saved without `save`
    project.publish(&PackageFixture::new("other", "1.0.0"))?;
    let no_save = InstallOptions {
        save: false,
        ..InstallOptions::default()
    };
    project.installer()?.install(vec![InstallRequest::parse("other@1.0.0", "npm")?], no_save).await?;
    assert!(project.manifest()?.dependencies.get("other").is_none());
    assert!(project.tree().await?.get_resolution("other", None).is_some());
    Ok(())
}

#[tokio::test]
async fn test_lock_install_is_idempotent() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("a", "1.0.0").dependency("b", "^1.0.0"))?;
    project.publish(&PackageFixture::new("b", "1.0.0"))?;
    project.write_manifest("[dependencies]\na = \"^1.0.0\"\n")?;

    assert!(project.installer()?.install(Vec::new(), InstallOptions::default()).await?);
    let before = fs::read_to_string(project.tree_file())?;
    let lookups = project.registry.lookups();

    let lock = InstallOptions {
        lock: true,
        ..InstallOptions::default()
    };
    assert!(!project.installer()?.install(Vec::new(), lock).await?);
    assert_eq!(fs::read_to_string(project.tree_file())?, before);
    assert_eq!(project.registry.lookups(), lookups, "lock mode never looks packages up");
    Ok(())
}

#[tokio::test]
async fn test_circular_dependencies_terminate() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("a", "1.0.0").dependency("b", "^1.0.0"))?;
    project.publish(&PackageFixture::new("b", "1.0.0").dependency("a", "^1.0.0"))?;

    let installer = project.installer()?;
    installer.install(vec![InstallRequest::parse("a@^1.0.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    let a = exact("npm:a@1.0.0");
    let b = exact("npm:b@1.0.0");
    assert_eq!(tree.packages().count(), 2);
    assert_eq!(tree.get_resolution("b", Some(&a)), Some(&b));
    assert_eq!(tree.get_resolution("a", Some(&b)), Some(&a));
    assert!(project.installed("npm:a@1.0.0")?.exists());
    assert!(project.installed("npm:b@1.0.0")?.exists());
    Ok(())
}

#[tokio::test]
async fn test_peer_reuses_project_resolution() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("host", "1.0.0"))?;
    project.publish(&PackageFixture::new("host", "1.5.0"))?;
    project.publish(&PackageFixture::new("plugin", "1.0.0").peer_dependency("host", "^1.0.0"))?;

    project.installer()?.install(vec![InstallRequest::parse("host@~1.0.0", "npm")?], InstallOptions::default()).await?;
    project.installer()?.install(vec![InstallRequest::parse("plugin@^1.0.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    let host = exact("npm:host@1.0.0");
    assert_eq!(tree.get_resolution("host", None), Some(&host));
    assert_eq!(tree.get_resolution("host", Some(&exact("npm:plugin@1.0.0"))), Some(&host));
    assert!(!project.installed("npm:host@1.5.0")?.exists());
    Ok(())
}

#[tokio::test]
async fn test_peer_out_of_range_installs_separately() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("host", "1.0.0"))?;
    project.publish(&PackageFixture::new("host", "2.0.0"))?;
    project.publish(&PackageFixture::new("plugin", "1.0.0").peer_dependency("host", "^2.0.0"))?;

    project.installer()?.install(vec![InstallRequest::parse("host@^1.0.0", "npm")?], InstallOptions::default()).await?;
    project.installer()?.install(vec![InstallRequest::parse("plugin@^1.0.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    assert_eq!(tree.get_resolution("host", None), Some(&exact("npm:host@1.0.0")));
    assert_eq!(tree.get_resolution("host", Some(&exact("npm:plugin@1.0.0"))), Some(&exact("npm:host@2.0.0")));
    Ok(())
}

#[tokio::test]
async fn test_optional_failure_is_skipped() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("app", "1.0.0").optional_dependency("missing", "^1.0.0"))?;

    let installer = project.installer()?;
    installer.install(vec![InstallRequest::parse("app@^1.0.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    let app = exact("npm:app@1.0.0");
    assert_eq!(tree.get_resolution("app", None), Some(&app));
    assert!(tree.get_resolution("missing", Some(&app)).is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_dependency_aborts_the_pass() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("app", "1.0.0").dependency("missing", "^1.0.0"))?;

    let installer = project.installer()?;
    let err = installer
        .install(vec![InstallRequest::parse("app@^1.0.0", "npm")?], InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::PackageNotFound { .. })));
    assert!(!project.tree_file().exists());
    assert!(project.manifest()?.dependencies.is_empty());

    // The installer is usable again after a failure
    project.publish(&PackageFixture::new("missing", "1.0.0"))?;
    project.installer()?.install(vec![InstallRequest::parse("app@^1.0.0", "npm")?], InstallOptions::default()).await?;
    assert!(project.tree_file().exists());
    Ok(())
}

#[tokio::test]
async fn test_link_local_directory() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("dep", "1.0.0"))?;
    let local = PackageFixture::new("local-lib", "0.1.0")
        .dependency("dep", "^1.0.0")
        .write_to(&project.path().join("work/local-lib"))?;

    let installer = project.installer()?;
    let source = SourceLocator::parse(&format!("file:{}", local.display()))?;
    assert!(installer.link("local-lib", source.clone(), InstallOptions::default()).await?);

    let tree = project.tree().await?;
    let linked = exact("file:local-lib@0.1.0");
    assert_eq!(tree.get_resolution("local-lib", None), Some(&linked));
    assert_eq!(tree.get_source(&linked), Some(&source));
    assert_eq!(tree.get_resolution("dep", Some(&linked)), Some(&exact("npm:dep@1.0.0")));

    let installed = project.installed("file:local-lib@0.1.0")?;
    assert!(is_link(&installed));
    fs::write(local.join("edited.js"), "live")?;
    assert!(installed.join("edited.js").exists(), "file: installs are live");

    let manifest = project.manifest()?;
    assert_eq!(manifest.dependencies.get("local-lib"), Some(&source.to_string()));
    Ok(())
}

#[tokio::test]
async fn test_resource_without_name_fails() -> Result<()> {
    let project = TestProject::new()?;
    let dir = project.path().join("work/anonymous");
    fs::create_dir_all(&dir)?;

    let request = InstallRequest::resource(None, SourceLocator::parse(&format!("file:{}", dir.display()))?);
    let err = project.installer()?.install(vec![request], InstallOptions::default()).await.unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::InvalidTarget { .. })));
    Ok(())
}
