// Integration tests for deduplication
//
// Builds a project holding several versions of one package over multiple passes,
// then checks that a fresh resolution pulls every compatible edge onto it.

use anyhow::Result;

use trellis::installer::{InstallOptions, InstallRequest};
use trellis::package::ExactPackage;
use trellis::test_utils::{PackageFixture, TestProject};

fn exact(s: &str) -> ExactPackage {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_fresh_resolution_converges_compatible_edges() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("pkg", "1.0.0"))?;
    project.publish(&PackageFixture::new("a", "1.0.0").dependency("pkg", "^1.0.0"))?;
    project.publish(&PackageFixture::new("b", "1.0.0").dependency("pkg", "^1.0.0"))?;
    project.publish(&PackageFixture::new("c", "1.0.0").dependency("pkg", "^2.0.0"))?;

    let (a, b, c) = (exact("npm:a@1.0.0"), exact("npm:b@1.0.0"), exact("npm:c@1.0.0"));

    project.installer()?.install(vec![InstallRequest::parse("a@^1.0.0", "npm")?], InstallOptions::default()).await?;

    // b gets a newer pkg while a keeps the old one
    project.publish(&PackageFixture::new("pkg", "1.1.0"))?;
    let no_dedupe = InstallOptions {
        latest: true,
        dedupe: false,
        ..InstallOptions::default()
    };
    project.installer()?.install(vec![InstallRequest::parse("b@^1.0.0", "npm")?], no_dedupe).await?;

    project.publish(&PackageFixture::new("pkg", "2.0.0"))?;
    project.installer()?.install(vec![InstallRequest::parse("c@^1.0.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    assert_eq!(tree.get_resolution("pkg", Some(&a)), Some(&exact("npm:pkg@1.0.0")));
    assert_eq!(tree.get_resolution("pkg", Some(&b)), Some(&exact("npm:pkg@1.1.0")));
    assert_eq!(tree.get_resolution("pkg", Some(&c)), Some(&exact("npm:pkg@2.0.0")));

    project.publish(&PackageFixture::new("pkg", "1.2.0"))?;
    project.installer()?.install(vec![InstallRequest::parse("pkg@^1.2.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    let converged = exact("npm:pkg@1.2.0");
    assert_eq!(tree.get_resolution("pkg", None), Some(&converged));
    assert_eq!(tree.get_resolution("pkg", Some(&a)), Some(&converged));
    assert_eq!(tree.get_resolution("pkg", Some(&b)), Some(&converged));
    assert_eq!(tree.get_resolution("pkg", Some(&c)), Some(&exact("npm:pkg@2.0.0")));

    assert!(!project.installed("npm:pkg@1.0.0")?.exists());
    assert!(!project.installed("npm:pkg@1.1.0")?.exists());
    assert!(project.installed("npm:pkg@1.2.0")?.exists());
    assert!(project.installed("npm:pkg@2.0.0")?.exists());
    Ok(())
}

#[tokio::test]
async fn test_secondary_reuses_installed_version() -> Result<()> {
    let project = TestProject::new()?;
    project.publish(&PackageFixture::new("pkg", "1.0.0"))?;
    project.publish(&PackageFixture::new("a", "1.0.0").dependency("pkg", "^1.0.0"))?;

    project.installer()?.install(vec![InstallRequest::parse("pkg@^1.0.0", "npm")?], InstallOptions::default()).await?;

    // A newer compatible version exists, but the installed one satisfies the range
    project.publish(&PackageFixture::new("pkg", "1.5.0"))?;
    project.installer()?.install(vec![InstallRequest::parse("a@^1.0.0", "npm")?], InstallOptions::default()).await?;

    let tree = project.tree().await?;
    assert_eq!(tree.get_resolution("pkg", Some(&exact("npm:a@1.0.0"))), Some(&exact("npm:pkg@1.0.0")));
    assert!(!project.installed("npm:pkg@1.5.0")?.exists());
    Ok(())
}
