//! Error types for botfleet-env

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while managing the shared environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// The dependency specification file does not exist
    #[error("Dependency specification not found: {0}")]
    DependencySpecMissing(PathBuf),

    /// No usable environment artifact is present
    #[error("Environment artifact missing or unusable at {0}; build the environment first")]
    ArtifactMissing(PathBuf),

    /// A build step exited unsuccessfully
    #[error("Environment build failed: {0}")]
    BuildFailed(String),

    /// The build did not finish within the configured timeout
    #[error("Environment build timed out after {secs}s")]
    BuildTimeout { secs: u64 },

    /// The built artifact has no executable entry point
    #[error("Environment verification failed: entry point {0} is missing or not executable")]
    VerificationFailed(PathBuf),

    /// Taking the pre-update snapshot failed; nothing was modified
    #[error("Snapshot of {artifact} into {backup} failed: {reason}")]
    SnapshotFailed {
        artifact: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    /// Restoring the snapshot after a failed build failed; the live
    /// artifact is in an unknown state
    #[error(
        "Rollback failed after `{build_error}`: could not restore {artifact} from {backup}: {reason}"
    )]
    RestoreFailed {
        artifact: PathBuf,
        backup: PathBuf,
        build_error: String,
        reason: String,
    },

    /// A deadline-bounded copy ran out of time
    #[error("Copy of {0} exceeded its deadline")]
    CopyTimeout(PathBuf),

    /// Another process holds the lock
    #[error("{0} is locked by another process")]
    Locked(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EnvError {
    /// Build and verification errors are recovered by rollback inside
    /// [`crate::EnvironmentStore::update`].
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            EnvError::BuildFailed(_) | EnvError::BuildTimeout { .. } | EnvError::VerificationFailed(_)
        )
    }

    /// The live artifact may be inconsistent and needs an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EnvError::RestoreFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_errors_are_classified() {
        assert!(EnvError::BuildFailed("pip exited 1".into()).is_build_error());
        assert!(EnvError::BuildTimeout { secs: 5 }.is_build_error());
        assert!(EnvError::VerificationFailed(PathBuf::from("env/bin/nanobot")).is_build_error());
        assert!(!EnvError::Locked(PathBuf::from(".locks/environment.lock")).is_build_error());
    }

    #[test]
    fn test_restore_failure_is_fatal() {
        let err = EnvError::RestoreFailed {
            artifact: PathBuf::from("env"),
            backup: PathBuf::from("backups/env-1"),
            build_error: "boom".into(),
            reason: "disk full".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Rollback failed"));
    }
}
