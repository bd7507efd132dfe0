//! Shared runtime environment with transactional update
//!
//! The live artifact lives at one fixed location. `update()` rebuilds it
//! only when the dependency specification drifted from the stored
//! fingerprint, snapshots the previous tree first, and restores that
//! snapshot and the previous metadata files if the build or the metadata
//! write fails. The stored fingerprint is written last and only after a
//! verified build, so it always describes the live artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::atomic::write_atomic;
use crate::builder::ArtifactBuilder;
use crate::copy::copy_tree;
use crate::error::EnvError;
use crate::fingerprint::{fingerprint_file, Fingerprint};
use crate::lock::LockGuard;
use crate::Result;

const BACKUP_PREFIX: &str = "env-";

/// Where the environment and its metadata live on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentLayout {
    /// Dependency specification (read only)
    pub spec_path: PathBuf,
    /// Live artifact directory
    pub artifact_dir: PathBuf,
    /// Parent directory of timestamped snapshots
    pub backups_dir: PathBuf,
    /// Stored fingerprint of the current version
    pub fingerprint_path: PathBuf,
    /// Provenance metadata of the current version
    pub version_path: PathBuf,
    /// Lock file held for the duration of `update()`
    pub lock_path: PathBuf,
    /// Entry point, relative to `artifact_dir`
    pub entry_point: PathBuf,
}

impl EnvironmentLayout {
    /// Default layout under a fleet root
    pub fn under(root: &Path) -> Self {
        EnvironmentLayout {
            spec_path: root.join("requirements.txt"),
            artifact_dir: root.join("env"),
            backups_dir: root.join("backups"),
            fingerprint_path: root.join("env.fingerprint"),
            version_path: root.join("env.version.json"),
            lock_path: root.join(".locks").join("environment.lock"),
            entry_point: PathBuf::from("bin/nanobot"),
        }
    }

    /// Absolute path of the entry point inside the live artifact
    pub fn entry_point_path(&self) -> PathBuf {
        self.artifact_dir.join(&self.entry_point)
    }
}

/// A realized environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVersion {
    pub fingerprint: Fingerprint,
    pub artifact_location: PathBuf,
    pub built_at: DateTime<Utc>,
    pub build_host: String,
}

/// Result of [`EnvironmentStore::update`]
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Stored fingerprint matches the dependency spec
    NoOp { fingerprint: Fingerprint },
    /// A new version is current; the snapshot is kept for the operator
    Updated {
        version: EnvironmentVersion,
        backup: Option<PathBuf>,
    },
    /// The build failed and the previous artifact was restored (or, on a
    /// first run, the partial artifact was removed)
    FailedRolledBack {
        error: EnvError,
        backup: Option<PathBuf>,
    },
}

impl UpdateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UpdateOutcome::NoOp { .. } => "no-op",
            UpdateOutcome::Updated { .. } => "updated",
            UpdateOutcome::FailedRolledBack { .. } => "failed-rolled-back",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, UpdateOutcome::FailedRolledBack { .. })
    }
}

/// Owner of the shared runtime environment
pub struct EnvironmentStore {
    layout: EnvironmentLayout,
    builder: Arc<dyn ArtifactBuilder>,
    build_timeout: Option<Duration>,
    snapshot_timeout: Option<Duration>,
}

impl std::fmt::Debug for EnvironmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentStore")
            .field("layout", &self.layout)
            .field("build_timeout", &self.build_timeout)
            .field("snapshot_timeout", &self.snapshot_timeout)
            .finish_non_exhaustive()
    }
}

impl EnvironmentStore {
    pub fn new(layout: EnvironmentLayout, builder: Arc<dyn ArtifactBuilder>) -> Self {
        EnvironmentStore {
            layout,
            builder,
            build_timeout: None,
            snapshot_timeout: None,
        }
    }

    /// Treat a build running longer than `timeout` as failed
    pub fn with_build_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Abort the update if the snapshot copy runs longer than `timeout`
    pub fn with_snapshot_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn layout(&self) -> &EnvironmentLayout {
        &self.layout
    }

    /// Fingerprint of the dependency spec as it is on disk now
    pub fn current_fingerprint(&self) -> Result<Fingerprint> {
        fingerprint_file(&self.layout.spec_path)
    }

    /// Fingerprint recorded by the last successful build, if any
    pub fn stored_fingerprint(&self) -> Result<Option<Fingerprint>> {
        match std::fs::read_to_string(&self.layout.fingerprint_path) {
            Ok(content) => {
                let parsed = Fingerprint::parse(&content);
                if parsed.is_none() {
                    warn!(
                        "Ignoring malformed fingerprint file {:?}",
                        self.layout.fingerprint_path
                    );
                }
                Ok(parsed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// False only when a stored fingerprint exists and equals the spec's.
    pub fn needs_update(&self) -> Result<bool> {
        let current = self.current_fingerprint()?;
        let stored = self.stored_fingerprint()?;
        debug!(
            current = current.short(),
            stored = stored.as_ref().map(|s| s.short()).unwrap_or("-"),
            "comparing fingerprints"
        );
        Ok(stored.as_ref() != Some(&current))
    }

    /// Provenance of the current version
    pub fn current_version(&self) -> Result<Option<EnvironmentVersion>> {
        match std::fs::read(&self.layout.version_path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a usable artifact (executable entry point) is present
    pub fn has_artifact(&self) -> bool {
        is_executable(&self.layout.entry_point_path())
    }

    /// Take a shared lock on the environment, for readers that must not
    /// observe an update in progress.
    pub fn lock_shared(&self) -> Result<LockGuard> {
        LockGuard::shared(&self.layout.lock_path)
    }

    /// Rebuild the environment unconditionally.
    ///
    /// Runs the same locked transaction as [`Self::update`] without the
    /// fingerprint check. On failure the previous artifact and metadata are
    /// restored and the error is returned.
    pub async fn build(&self) -> Result<EnvironmentVersion> {
        let _lock = LockGuard::exclusive(&self.layout.lock_path)?;
        match self.rebuild().await? {
            UpdateOutcome::Updated { version, .. } => Ok(version),
            UpdateOutcome::FailedRolledBack { error, .. } => Err(error),
            UpdateOutcome::NoOp { fingerprint } => Err(EnvError::BuildFailed(format!(
                "no build was attempted for {}",
                fingerprint.short()
            ))),
        }
    }

    /// Rebuild the environment if the dependency spec drifted.
    ///
    /// Recoverable build failures come back as
    /// [`UpdateOutcome::FailedRolledBack`]. `Err` is reserved for failures
    /// outside the rollback window (lock busy, spec missing, snapshot
    /// failed before anything was touched) and for a failed restore, which
    /// leaves the artifact inconsistent.
    pub async fn update(&self) -> Result<UpdateOutcome> {
        let _lock = LockGuard::exclusive(&self.layout.lock_path)?;

        let current = self.current_fingerprint()?;
        if !self.needs_update()? {
            info!("Environment {} is current", current.short());
            return Ok(UpdateOutcome::NoOp {
                fingerprint: current,
            });
        }

        self.rebuild().await
    }

    /// Snapshot, build, persist; roll back on any failure after the
    /// snapshot. The caller holds the exclusive lock.
    async fn rebuild(&self) -> Result<UpdateOutcome> {
        let recorded = RecordedMetadata::read(&self.layout)?;
        let backup = if self.layout.artifact_dir.exists() {
            Some(self.snapshot()?)
        } else {
            debug!("No previous artifact, skipping snapshot");
            None
        };

        let built = match self.build_in_place().await {
            Ok(version) => self.persist(&version).map(|_| version),
            Err(e) => Err(e),
        };

        match built {
            Ok(version) => {
                info!(
                    fingerprint = version.fingerprint.short(),
                    "Environment updated"
                );
                Ok(UpdateOutcome::Updated { version, backup })
            }
            Err(failure) => {
                warn!("Environment update failed: {}", failure);
                self.rollback(backup.as_deref(), &recorded, &failure)?;
                Ok(UpdateOutcome::FailedRolledBack {
                    error: failure,
                    backup,
                })
            }
        }
    }

    /// Build into the live location and verify the entry point. Destroys
    /// the current artifact, so only [`Self::rebuild`] calls it.
    async fn build_in_place(&self) -> Result<EnvironmentVersion> {
        let fingerprint = self.current_fingerprint()?;
        let target = &self.layout.artifact_dir;

        if target.exists() {
            std::fs::remove_dir_all(target)?;
        }

        info!("Building environment {} into {:?}", fingerprint.short(), target);
        let build = self.builder.build(&self.layout.spec_path, target);
        match self.build_timeout {
            Some(limit) => tokio::time::timeout(limit, build)
                .await
                .map_err(|_| EnvError::BuildTimeout {
                    secs: limit.as_secs(),
                })??,
            None => build.await?,
        }

        let entry = self.layout.entry_point_path();
        if !is_executable(&entry) {
            return Err(EnvError::VerificationFailed(entry));
        }

        Ok(EnvironmentVersion {
            fingerprint,
            artifact_location: target.clone(),
            built_at: Utc::now(),
            build_host: build_host(),
        })
    }

    /// Forget the stored fingerprint so the next `update()` rebuilds
    pub fn invalidate(&self) -> Result<()> {
        let _lock = LockGuard::exclusive(&self.layout.lock_path)?;
        match std::fs::remove_file(&self.layout.fingerprint_path) {
            Ok(()) => {
                info!("Stored environment fingerprint removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshots, oldest first
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.layout.backups_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .map(|n| n.to_string_lossy().starts_with(BACKUP_PREFIX))
                        .unwrap_or(false)
            })
            .collect();
        // timestamped names sort chronologically
        backups.sort();
        Ok(backups)
    }

    /// Delete all but the newest `keep` snapshots. Returns what was removed.
    pub fn prune_backups(&self, keep: usize) -> Result<Vec<PathBuf>> {
        let _lock = LockGuard::exclusive(&self.layout.lock_path)?;
        let backups = self.list_backups()?;
        let excess = backups.len().saturating_sub(keep);

        let mut removed = Vec::with_capacity(excess);
        for path in backups.into_iter().take(excess) {
            std::fs::remove_dir_all(&path)?;
            info!("Removed backup {:?}", path);
            removed.push(path);
        }
        Ok(removed)
    }

    fn snapshot(&self) -> Result<PathBuf> {
        let artifact = &self.layout.artifact_dir;
        let backup = self.next_backup_path();
        let deadline = self.snapshot_timeout.map(|t| Instant::now() + t);

        let fail = |reason: String| EnvError::SnapshotFailed {
            artifact: artifact.clone(),
            backup: backup.clone(),
            reason,
        };

        std::fs::create_dir_all(&self.layout.backups_dir).map_err(|e| fail(e.to_string()))?;
        if let Err(e) = copy_tree(artifact, &backup, deadline) {
            // an incomplete snapshot must never be mistaken for a good one
            let _ = std::fs::remove_dir_all(&backup);
            return Err(fail(e.to_string()));
        }

        info!("Snapshot of {:?} taken at {:?}", artifact, backup);
        Ok(backup)
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let mut candidate = self.layout.backups_dir.join(format!("{BACKUP_PREFIX}{stamp}"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self
                .layout
                .backups_dir
                .join(format!("{BACKUP_PREFIX}{stamp}-{n}"));
            n += 1;
        }
        candidate
    }

    fn persist(&self, version: &EnvironmentVersion) -> Result<()> {
        let json = serde_json::to_vec_pretty(version)?;
        write_atomic(&self.layout.version_path, &json)?;
        // fingerprint last: it is what marks the version as current
        write_atomic(
            &self.layout.fingerprint_path,
            format!("{}\n", version.fingerprint).as_bytes(),
        )?;
        Ok(())
    }

    fn rollback(
        &self,
        backup: Option<&Path>,
        recorded: &RecordedMetadata,
        failure: &EnvError,
    ) -> Result<()> {
        let artifact = &self.layout.artifact_dir;
        let restore_failed = |reason: String| {
            error!("Environment rollback failed: {}", reason);
            EnvError::RestoreFailed {
                artifact: artifact.clone(),
                backup: backup.map(Path::to_path_buf).unwrap_or_default(),
                build_error: failure.to_string(),
                reason,
            }
        };

        if artifact.exists() {
            std::fs::remove_dir_all(artifact).map_err(|e| restore_failed(e.to_string()))?;
        }
        if let Some(backup) = backup {
            copy_tree(backup, artifact, None).map_err(|e| restore_failed(e.to_string()))?;
            info!("Restored {:?} from {:?}", artifact, backup);
        }

        restore_file(&self.layout.version_path, recorded.version.as_deref())
            .map_err(|e| restore_failed(e.to_string()))?;
        restore_file(&self.layout.fingerprint_path, recorded.fingerprint.as_deref())
            .map_err(|e| restore_failed(e.to_string()))?;
        Ok(())
    }
}

/// Version and fingerprint files as they were before a rebuild
#[derive(Debug, Default)]
struct RecordedMetadata {
    version: Option<Vec<u8>>,
    fingerprint: Option<Vec<u8>>,
}

impl RecordedMetadata {
    fn read(layout: &EnvironmentLayout) -> Result<Self> {
        Ok(RecordedMetadata {
            version: read_optional(&layout.version_path)?,
            fingerprint: read_optional(&layout.fingerprint_path)?,
        })
    }
}

fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Put `path` back to `recorded`, touching it only if it changed
fn restore_file(path: &Path, recorded: Option<&[u8]>) -> Result<()> {
    let now = read_optional(path).ok().flatten();
    if now.as_deref() == recorded {
        return Ok(());
    }
    match recorded {
        Some(bytes) => write_atomic(path, bytes),
        None => match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn build_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeBehavior, FakeBuilder};
    use std::collections::BTreeMap;
    use tempfile::{tempdir, TempDir};

    fn make_store() -> (TempDir, Arc<FakeBuilder>, EnvironmentStore) {
        let dir = tempdir().unwrap();
        let layout = EnvironmentLayout::under(dir.path());
        std::fs::write(&layout.spec_path, "litellm>=1.0\n").unwrap();
        let builder = Arc::new(FakeBuilder::new(&layout.entry_point));
        let store = EnvironmentStore::new(layout, builder.clone());
        (dir, builder, store)
    }

    /// Relative path -> content for every file under `root`, skipping backups
    fn tree_state(root: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut out = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.unwrap();
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            if rel.starts_with("backups") || rel.starts_with(".locks") {
                continue;
            }
            if entry.file_type().is_file() {
                out.insert(
                    rel.to_string_lossy().to_string(),
                    std::fs::read(entry.path()).unwrap(),
                );
            }
        }
        out
    }

    #[tokio::test]
    async fn test_first_run_needs_update() {
        let (_dir, _builder, store) = make_store();
        assert!(store.needs_update().unwrap());
        assert!(!store.has_artifact());
        assert!(store.current_version().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_twice_second_is_noop() {
        let (_dir, builder, store) = make_store();

        let first = store.update().await.unwrap();
        assert_eq!(first.label(), "updated");
        assert!(store.has_artifact());
        assert!(!store.needs_update().unwrap());

        let second = store.update().await.unwrap();
        assert_eq!(second.label(), "no-op");
        assert_eq!(builder.builds(), 1);
    }

    #[tokio::test]
    async fn test_update_records_provenance() {
        let (_dir, _builder, store) = make_store();
        store.update().await.unwrap();

        let version = store.current_version().unwrap().unwrap();
        assert_eq!(version.fingerprint, store.current_fingerprint().unwrap());
        assert_eq!(version.artifact_location, store.layout().artifact_dir);
        assert!(!version.build_host.is_empty());
        assert_eq!(
            store.stored_fingerprint().unwrap(),
            Some(version.fingerprint)
        );
    }

    #[tokio::test]
    async fn test_drift_triggers_rebuild_and_keeps_backup() {
        let (_dir, builder, store) = make_store();
        store.update().await.unwrap();

        std::fs::write(&store.layout().spec_path, "litellm>=1.1\n").unwrap();
        assert!(store.needs_update().unwrap());

        match store.update().await.unwrap() {
            UpdateOutcome::Updated { backup, .. } => {
                let backup = backup.expect("previous artifact snapshotted");
                assert_eq!(
                    std::fs::read_to_string(backup.join("requirements.lock")).unwrap(),
                    "litellm>=1.0\n"
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(builder.builds(), 2);
        assert_eq!(store.list_backups().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_rolls_back_everything_but_backups() {
        let (dir, builder, store) = make_store();
        store.update().await.unwrap();
        let stored_before = store.stored_fingerprint().unwrap();

        std::fs::write(&store.layout().spec_path, "litellm>=2.0\n").unwrap();
        let before = tree_state(dir.path());

        builder.set_behavior(FakeBehavior::FailAfterPartialWrite);
        let outcome = store.update().await.unwrap();

        match &outcome {
            UpdateOutcome::FailedRolledBack { error, backup } => {
                assert!(error.is_build_error());
                assert!(backup.is_some());
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(store.has_artifact(), "entry point must still be executable");
        assert_eq!(store.stored_fingerprint().unwrap(), stored_before);
        assert_eq!(tree_state(dir.path()), before);
    }

    #[tokio::test]
    async fn test_verification_failure_rolls_back() {
        let (_dir, builder, store) = make_store();
        store.update().await.unwrap();
        std::fs::write(&store.layout().spec_path, "litellm>=3.0\n").unwrap();

        builder.set_behavior(FakeBehavior::SkipEntryPoint);
        match store.update().await.unwrap() {
            UpdateOutcome::FailedRolledBack { error, .. } => {
                assert!(matches!(error, EnvError::VerificationFailed(_)));
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(store.has_artifact());
    }

    #[tokio::test]
    async fn test_first_run_failure_leaves_no_artifact() {
        let (_dir, builder, store) = make_store();
        builder.set_behavior(FakeBehavior::FailAfterPartialWrite);

        match store.update().await.unwrap() {
            UpdateOutcome::FailedRolledBack { backup, .. } => assert!(backup.is_none()),
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(!store.layout().artifact_dir.exists());
        assert!(store.stored_fingerprint().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_build_timeout_takes_rollback_path() {
        let dir = tempdir().unwrap();
        let layout = EnvironmentLayout::under(dir.path());
        std::fs::write(&layout.spec_path, "a\n").unwrap();
        let builder = Arc::new(FakeBuilder::new(&layout.entry_point));
        let store = EnvironmentStore::new(layout, builder.clone())
            .with_build_timeout(Some(Duration::from_millis(50)));
        store.update().await.unwrap();

        std::fs::write(&store.layout().spec_path, "b\n").unwrap();
        builder.set_behavior(FakeBehavior::Hang(Duration::from_secs(30)));
        match store.update().await.unwrap() {
            UpdateOutcome::FailedRolledBack { error, .. } => {
                assert!(matches!(error, EnvError::BuildTimeout { .. }));
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(store.has_artifact());
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_before_destruction() {
        let (_dir, builder, store) = make_store();
        store.update().await.unwrap();

        // a file where the backups directory should be makes the snapshot fail
        std::fs::write(&store.layout().backups_dir, "not a dir").unwrap();
        std::fs::write(&store.layout().spec_path, "litellm>=9\n").unwrap();

        let err = store.update().await.unwrap_err();
        assert!(matches!(err, EnvError::SnapshotFailed { .. }));
        assert_eq!(builder.builds(), 1, "no build after failed snapshot");
        assert!(store.has_artifact());
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let (_dir, builder, store) = make_store();
        store.update().await.unwrap();

        store.invalidate().unwrap();
        assert!(store.needs_update().unwrap());
        assert_eq!(store.update().await.unwrap().label(), "updated");
        assert_eq!(builder.builds(), 2);
    }

    #[tokio::test]
    async fn test_update_refuses_when_locked() {
        let (_dir, _builder, store) = make_store();
        let _held = LockGuard::exclusive(&store.layout().lock_path).unwrap();

        assert!(matches!(
            store.update().await.unwrap_err(),
            EnvError::Locked(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_spec_is_an_error() {
        let (_dir, _builder, store) = make_store();
        std::fs::remove_file(&store.layout().spec_path).unwrap();

        assert!(matches!(
            store.needs_update().unwrap_err(),
            EnvError::DependencySpecMissing(_)
        ));
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let (_dir, _builder, store) = make_store();
        for i in 0..3 {
            std::fs::write(&store.layout().spec_path, format!("pkg=={i}\n")).unwrap();
            store.update().await.unwrap();
        }
        let backups = store.list_backups().unwrap();
        assert_eq!(backups.len(), 2);

        let removed = store.prune_backups(1).unwrap();
        assert_eq!(removed, vec![backups[0].clone()]);
        assert_eq!(store.list_backups().unwrap(), vec![backups[1].clone()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_persist_failure_restores_version_file() {
        let dir = tempdir().unwrap();
        let mut layout = EnvironmentLayout::under(dir.path());
        layout.fingerprint_path = dir.path().join("meta").join("env.fingerprint");
        std::fs::write(&layout.spec_path, "litellm>=1.0\n").unwrap();
        let builder = Arc::new(FakeBuilder::new(&layout.entry_point));
        let store = EnvironmentStore::new(layout, builder.clone());
        store.update().await.unwrap();
        let version_before = std::fs::read(&store.layout().version_path).unwrap();

        // a dangling symlink where the fingerprint directory should be
        // fails the fingerprint write after the version file was written
        std::fs::rename(dir.path().join("meta"), dir.path().join("meta.real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("meta")).unwrap();
        std::fs::write(&store.layout().spec_path, "litellm>=2.0\n").unwrap();

        match store.update().await.unwrap() {
            UpdateOutcome::FailedRolledBack { error, backup } => {
                assert!(matches!(error, EnvError::Io(_)));
                assert!(!error.is_build_error());
                assert!(backup.is_some());
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        assert_eq!(builder.builds(), 2);
        assert_eq!(
            std::fs::read(&store.layout().version_path).unwrap(),
            version_before
        );
        assert!(store.has_artifact());
        assert_eq!(
            std::fs::read_to_string(store.layout().artifact_dir.join("requirements.lock"))
                .unwrap(),
            "litellm>=1.0\n"
        );
    }

    #[tokio::test]
    async fn test_first_run_failure_leaves_no_version_file() {
        let (_dir, builder, store) = make_store();
        builder.set_behavior(FakeBehavior::SkipEntryPoint);

        assert!(!store.update().await.unwrap().is_success());
        assert!(!store.layout().version_path.exists());
        assert!(store.current_version().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_direct_build_keeps_live_artifact() {
        let (dir, builder, store) = make_store();
        store.update().await.unwrap();
        let before = tree_state(dir.path());

        builder.set_behavior(FakeBehavior::FailAfterPartialWrite);
        let err = store.build().await.unwrap_err();
        assert!(err.is_build_error());

        assert!(store.has_artifact());
        assert!(!store.needs_update().unwrap());
        assert_eq!(tree_state(dir.path()), before);
    }

    #[tokio::test]
    async fn test_direct_build_records_version() {
        let (_dir, builder, store) = make_store();
        store.update().await.unwrap();

        let version = store.build().await.unwrap();
        assert_eq!(builder.builds(), 2);
        assert_eq!(store.current_version().unwrap(), Some(version.clone()));
        assert_eq!(store.stored_fingerprint().unwrap(), Some(version.fingerprint));
        assert_eq!(store.list_backups().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_build_refuses_when_locked() {
        let (_dir, builder, store) = make_store();
        let _held = LockGuard::exclusive(&store.layout().lock_path).unwrap();

        assert!(matches!(store.build().await.unwrap_err(), EnvError::Locked(_)));
        assert_eq!(builder.builds(), 0);
    }
}
