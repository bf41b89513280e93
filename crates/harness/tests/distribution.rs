//! Distribution expansion and reuse

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use disttest_harness::{Distribution, LocalArtifact, Supervisor};
use tempfile::TempDir;
use walkdir::WalkDir;

use common::{config, tar_gz_distribution, zip_distribution, DIST_NAME};

const SCRIPT: &str = "#!/bin/sh\necho up\n";

fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    files.sort();
    files
}

fn distribution(dir: &TempDir, archive: &Path) -> Distribution {
    Distribution::new(dir.path().join("dist"), "kc.sh", Arc::new(LocalArtifact::new(archive)))
}

#[test]
fn existing_installation_is_reused_unless_recreated() {
    let dir = TempDir::new().unwrap();
    let archive = zip_distribution(dir.path(), SCRIPT);
    let dist = distribution(&dir, &archive);

    let install = dist.prepare(false).unwrap();
    let marker = install.join("marker.txt");
    fs::write(&marker, "left by a previous run").unwrap();

    let reused = dist.prepare(false).unwrap();
    assert_eq!(reused, install);
    assert!(marker.exists());

    let recreated = dist.prepare(true).unwrap();
    assert_eq!(recreated, install);
    assert!(!marker.exists());
    assert_eq!(files_under(&install), ["bin/kc.sh", "conf/server.conf"]);
}

#[cfg(unix)]
#[test]
fn tar_gz_distribution_is_expanded() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let archive = tar_gz_distribution(dir.path(), SCRIPT);

    let install = distribution(&dir, &archive).prepare(false).unwrap();

    assert_eq!(install, dir.path().join("dist").join(DIST_NAME));
    let mode = fs::metadata(install.join("bin/kc.sh")).unwrap().permissions().mode();
    assert_eq!(mode & 0o755, 0o755);
    assert_eq!(fs::read_to_string(install.join("bin/kc.sh")).unwrap(), SCRIPT);
}

#[tokio::test]
async fn supervisor_prepares_once() {
    let dir = TempDir::new().unwrap();
    let archive = zip_distribution(dir.path(), SCRIPT);
    let mut supervisor = Supervisor::new(config(dir.path(), &archive));

    let install = supervisor.prepare().await.unwrap();
    fs::write(install.join("marker.txt"), "kept").unwrap();

    assert_eq!(supervisor.prepare().await.unwrap(), install);
    assert!(install.join("marker.txt").exists());
}

#[tokio::test]
async fn enabling_recreate_after_prepare_expands_again() {
    let dir = TempDir::new().unwrap();
    let archive = zip_distribution(dir.path(), SCRIPT);
    let mut supervisor = Supervisor::new(config(dir.path(), &archive));

    let install = supervisor.prepare().await.unwrap();
    fs::write(install.join("marker.txt"), "stale").unwrap();

    supervisor.set_recreate(true);
    assert_eq!(supervisor.prepare().await.unwrap(), install);
    assert!(!install.join("marker.txt").exists());

    // Expanded once more, then cached again
    fs::write(install.join("marker.txt"), "fresh").unwrap();
    supervisor.prepare().await.unwrap();
    assert!(install.join("marker.txt").exists());
}

#[tokio::test]
async fn recreate_applies_to_a_fresh_supervisor() {
    let dir = TempDir::new().unwrap();
    let archive = zip_distribution(dir.path(), SCRIPT);

    let install = Supervisor::new(config(dir.path(), &archive))
        .prepare()
        .await
        .unwrap();
    fs::write(install.join("marker.txt"), "stale").unwrap();

    let mut recreate = config(dir.path(), &archive);
    recreate.recreate = true;
    let mut supervisor = Supervisor::new(recreate);

    assert_eq!(supervisor.prepare().await.unwrap(), install);
    assert!(!install.join("marker.txt").exists());
    assert!(install.join("bin/kc.sh").is_file());
}
