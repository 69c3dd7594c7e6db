// Integration tests for uninstall, update and clean
//
// Each operation rewrites the tree and then collects whatever became unreachable,
// both in the tree file and in the packages directory.

use anyhow::Result;
use std::fs;

use trellis::core::{TrellisError, find_trellis_error};
use trellis::installer::{InstallOptions, InstallRequest};
use trellis::package::ExactPackage;
use trellis::test_utils::{PackageFixture, TestProject};

fn exact(s: &str) -> ExactPackage {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_uninstall_collects_transitive_packages() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("a", "1.0.0").dependency("t", "^1.0.0"))?;
    project.publish(&PackageFixture::new("t", "1.0.0"))?;
    project.publish(&PackageFixture::new("keep", "1.0.0"))?;

    let installer = project.installer()?;
    installer
        .install(
            vec![InstallRequest::parse("a@^1.0.0", "npm")?, InstallRequest::parse("keep@^1.0.0", "npm")?],
            InstallOptions::default(),
        )
        .await?;
    assert!(project.installed("npm:t@1.0.0")?.exists());

    assert!(installer.uninstall(&["a"]).await?);

    let tree = project.tree().await?;
    let remaining: Vec<_> = tree.packages().cloned().collect();
    assert_eq!(remaining, vec![exact("npm:keep@1.0.0")]);
    assert!(!project.installed("npm:a@1.0.0")?.exists());
    assert!(!project.installed("npm:t@1.0.0")?.exists());
    assert!(project.installed("npm:keep@1.0.0")?.exists());

    let manifest = project.manifest()?;
    assert!(!manifest.dependencies.contains_key("a"));
    assert!(manifest.dependencies.contains_key("keep"));
    Ok(())
}

#[tokio::test]
async fn test_uninstall_unknown_name_is_an_error() -> Result<()> {
    let project = TestProject::new()?;
    let err = project.installer()?.uninstall(&["ghost"]).await.unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::NotInstalled { .. })));
    Ok(())
}

#[tokio::test]
async fn test_update_reresolves_selected_packages() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("pkg", "1.0.0"))?;
    project.publish(&PackageFixture::new("other", "1.0.0"))?;
    project.installer()?.install(
        vec![InstallRequest::parse("pkg@^1.0.0", "npm")?, InstallRequest::parse("other@^1.0.0", "npm")?],
        InstallOptions::default(),
    )
    .await?;

    project.publish(&PackageFixture::new("pkg", "1.1.0"))?;
    project.publish(&PackageFixture::new("other", "1.1.0"))?;
    let installer = project.installer()?;
    assert!(installer.update(&["pkg"], InstallOptions::default()).await?);

    let tree = project.tree().await?;
    assert_eq!(tree.get_resolution("pkg", None), Some(&exact("npm:pkg@1.1.0")));
    assert_eq!(tree.get_resolution("other", None), Some(&exact("npm:other@1.0.0")), "unselected packages keep their lock");
    assert!(!project.installed("npm:pkg@1.0.0")?.exists());

    let err = installer.update(&["nope"], InstallOptions::default()).await.unwrap_err();
    assert!(matches!(find_trellis_error(&err), Some(TrellisError::NotInstalled { .. })));
    Ok(())
}

#[tokio::test]
async fn test_clean_drops_undeclared_dependencies() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("a", "1.0.0"))?;
    project.publish(&PackageFixture::new("b", "1.0.0").dependency("c", "^1.0.0"))?;
    project.publish(&PackageFixture::new("c", "1.0.0"))?;
    project.write_manifest("[dependencies]\na = \"^1.0.0\"\nb = \"^1.0.0\"\n")?;
    project.installer()?.install(Vec::new(), InstallOptions::default()).await?;

    // The user removes `b` by hand
    project.write_manifest("[dependencies]\na = \"^1.0.0\"\n")?;
    assert!(project.installer()?.clean(true).await?);

    let tree = project.tree().await?;
    let remaining: Vec<_> = tree.packages().cloned().collect();
    assert_eq!(remaining, vec![exact("npm:a@1.0.0")]);
    assert!(!project.installed("npm:b@1.0.0")?.exists());
    assert!(!project.installed("npm:c@1.0.0")?.exists());

    // Nothing left to do
    assert!(!project.installer()?.clean(true).await?);
    Ok(())
}

#[tokio::test]
async fn test_clean_without_save_keeps_tree_file() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("a", "1.0.0"))?;
    project.publish(&PackageFixture::new("b", "1.0.0"))?;
    project.write_manifest("[dependencies]\na = \"^1.0.0\"\nb = \"^1.0.0\"\n")?;
    project.installer()?.install(Vec::new(), InstallOptions::default()).await?;
    let before = fs::read_to_string(project.tree_file())?;

    project.write_manifest("[dependencies]\na = \"^1.0.0\"\n")?;
    assert!(project.installer()?.clean(false).await?);

    assert_eq!(fs::read_to_string(project.tree_file())?, before);
    assert!(!project.installed("npm:b@1.0.0")?.exists());
    assert!(project.installed("npm:a@1.0.0")?.exists());
    Ok(())
}
