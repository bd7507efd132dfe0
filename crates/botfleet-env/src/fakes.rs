//! In-process fake build collaborator (testing only)
//!
//! `FakeBuilder` satisfies the [`ArtifactBuilder`] contract without running
//! any external tools, and can be switched into failure modes to exercise
//! the rollback path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::builder::ArtifactBuilder;
use crate::error::EnvError;
use crate::Result;

/// What the next build does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Write an executable entry point plus a copy of the spec
    Succeed,
    /// Leave a half-written tree behind and report failure
    FailAfterPartialWrite,
    /// Report success without producing the entry point
    SkipEntryPoint,
    /// Sleep before succeeding
    Hang(Duration),
}

/// Fake builder producing a minimal runtime tree
#[derive(Debug)]
pub struct FakeBuilder {
    entry_point: PathBuf,
    behavior: Mutex<FakeBehavior>,
    builds: AtomicUsize,
}

impl FakeBuilder {
    pub fn new(entry_point: impl Into<PathBuf>) -> Self {
        FakeBuilder {
            entry_point: entry_point.into(),
            behavior: Mutex::new(FakeBehavior::Succeed),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Number of builds attempted so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn write_entry_point(&self, target: &Path) -> Result<()> {
        let entry = target.join(&self.entry_point);
        if let Some(parent) = entry.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&entry, "#!/bin/sh\nexec python3 -m nanobot \"$@\"\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactBuilder for FakeBuilder {
    async fn build(&self, spec: &Path, target: &Path) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();

        match behavior {
            FakeBehavior::Succeed => {
                std::fs::create_dir_all(target)?;
                std::fs::copy(spec, target.join("requirements.lock"))?;
                self.write_entry_point(target)
            }
            FakeBehavior::FailAfterPartialWrite => {
                std::fs::create_dir_all(target)?;
                std::fs::write(target.join("partial.whl"), b"truncated")?;
                Err(EnvError::BuildFailed(
                    "fake build failed after partial write".to_string(),
                ))
            }
            FakeBehavior::SkipEntryPoint => {
                std::fs::create_dir_all(target)?;
                Ok(())
            }
            FakeBehavior::Hang(delay) => {
                tokio::time::sleep(delay).await;
                std::fs::create_dir_all(target)?;
                self.write_entry_point(target)
            }
        }
    }
}
