// Integration tests for git sources
//
// Repositories are created on the fly and installed through `git+file://` locators,
// so these tests need a `git` binary but no network.

use anyhow::Result;
use std::fs;
use std::sync::Arc;

use trellis::core::{TrellisError, find_trellis_error};
use trellis::installer::InstallOptions;
use trellis::package::ExactPackage;
use trellis::source::SourceLocator;
use trellis::test_utils::{PackageFixture, TestGit, TestProject};
use trellis::ui::NonInteractive;
use trellis::utils::fs::is_link;
use trellis::version::PackageVersion;

fn exact(s: &str) -> ExactPackage {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_link_git_source() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("dep", "1.0.0"))?;
    let fixture = PackageFixture::new("tool", "1.0.0").dependency("dep", "^1.0.0");
    let repo = TestGit::package_repo(&project.path().join("repos/tool"), &fixture)?;

    let source = SourceLocator::parse(&repo.locator("main"))?;
    let installer = project.installer()?;
    assert!(installer.link("tool", source.clone(), InstallOptions::default()).await?);

    let tree = project.tree().await?;
    let tool = exact("git:tool@1.0.0");
    assert_eq!(tree.get_resolution("tool", None), Some(&tool));
    assert_eq!(tree.get_source(&tool), Some(&source));
    assert_eq!(tree.get_resolution("dep", Some(&tool)), Some(&exact("npm:dep@1.0.0")));

    let installed = project.installed("git:tool@1.0.0")?;
    assert!(is_link(&installed));
    assert!(installed.join("index.js").exists());
    assert_eq!(project.manifest()?.dependencies.get("tool"), Some(&repo.locator("main")));
    Ok(())
}

#[tokio::test]
async fn test_unversioned_git_source_uses_reference() -> Result<()> {
    let project = TestProject::new()?;
    let mut fixture = PackageFixture::new("tool", "0.0.0");
    fixture.config.version = None;
    let repo = TestGit::package_repo(&project.path().join("repos/tool"), &fixture)?;
    repo.tag("v2")?;

    let installer = project.installer()?;
    installer.link("tool", SourceLocator::parse(&repo.locator("v2"))?, InstallOptions::default()).await?;

    let tree = project.tree().await?;
    let resolved = tree.get_resolution("tool", None).cloned().expect("tool is installed");
    assert_eq!(resolved.registry, "git");
    assert_eq!(resolved.version, PackageVersion::Tag("v2".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_checkout_refuses_to_drop_unsaved_changes() -> Result<()> {
    let project = TestProject::new()?;
    let repo = TestGit::package_repo(&project.path().join("repos/tool"), &PackageFixture::new("tool", "1.0.0"))?;
    project.installer()?.link("tool", SourceLocator::parse(&repo.locator("main"))?, InstallOptions::default()).await?;

    let installed = project.installed("git:tool@1.0.0")?;
    project.installer()?.checkout(&["tool"]).await?;
    assert!(!is_link(&installed));
    assert!(installed.join(".git").exists());

    fs::write(installed.join("scratch.js"), "work in progress")?;
    let confirming = project.installer()?.with_prompter(Arc::new(NonInteractive::yes()));
    let err = confirming.uninstall(&["tool"]).await.unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::UnsavedChanges { .. })));
    assert!(installed.join("scratch.js").exists());
    assert!(project.tree().await?.get_resolution("tool", None).is_some(), "a failed pass persists nothing");

    fs::remove_file(installed.join("scratch.js"))?;
    assert!(confirming.uninstall(&["tool"]).await?);
    assert!(!installed.exists());
    Ok(())
}
