//! End-to-end update lifecycle through the command builder.

use std::sync::Arc;
use std::time::Duration;

use botfleet_env::{CommandBuilder, EnvironmentLayout, EnvironmentStore, UpdateOutcome};
use tempfile::tempdir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A build that fails whenever the spec mentions `broken`.
fn shell_builder() -> CommandBuilder {
    let sh = |script: &str| vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    CommandBuilder::new(vec![
        sh("mkdir -p {target}/bin"),
        sh("if grep -q broken {spec}; then echo 'resolver error' >&2; exit 1; fi"),
        sh("cp {spec} {target}/installed.txt"),
        sh("printf '#!/bin/sh\\necho ok\\n' > {target}/bin/nanobot && chmod +x {target}/bin/nanobot"),
    ])
}

fn store_in(root: &std::path::Path) -> EnvironmentStore {
    EnvironmentStore::new(EnvironmentLayout::under(root), Arc::new(shell_builder()))
        .with_build_timeout(Some(Duration::from_secs(60)))
        .with_snapshot_timeout(Some(Duration::from_secs(60)))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn build_then_noop_then_drift() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "httpx==0.27\n").unwrap();
    let store = store_in(dir.path());

    assert_eq!(store.update().await.unwrap().label(), "updated");
    assert_eq!(store.update().await.unwrap().label(), "no-op");

    std::fs::write(dir.path().join("requirements.txt"), "httpx==0.28\n").unwrap();
    assert_eq!(store.update().await.unwrap().label(), "updated");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("env/installed.txt")).unwrap(),
        "httpx==0.28\n"
    );
}

#[tokio::test]
async fn failing_resolver_restores_previous_tree() {
    let dir = tempdir().unwrap();
    let spec = dir.path().join("requirements.txt");
    std::fs::write(&spec, "httpx==0.27\n").unwrap();
    let store = store_in(dir.path());
    store.update().await.unwrap();
    let fingerprint = std::fs::read_to_string(dir.path().join("env.fingerprint")).unwrap();

    std::fs::write(&spec, "broken-package\n").unwrap();
    let outcome = store.update().await.unwrap();

    match outcome {
        UpdateOutcome::FailedRolledBack { error, backup } => {
            assert!(error.to_string().contains("resolver error"));
            assert!(backup.unwrap().join("bin/nanobot").exists());
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    assert!(store.has_artifact());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("env/installed.txt")).unwrap(),
        "httpx==0.27\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("env.fingerprint")).unwrap(),
        fingerprint
    );
    assert!(store.needs_update().unwrap(), "drift is still pending");
}
