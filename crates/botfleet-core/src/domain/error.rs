//! Domain-level error taxonomy for botfleet.
//!
//! Every error can say what kind of failure it is, which entity it hit and
//! what state that entity was left in, so callers can report failures
//! without guessing.

use std::path::PathBuf;

use botfleet_env::EnvError;

/// Failure class, also the basis for CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Dependency,
    Build,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Build => "build",
            ErrorKind::Io => "io",
        }
    }

    /// Classification of an environment failure
    pub fn of_env(err: &EnvError) -> Self {
        match err {
            EnvError::DependencySpecMissing(_) | EnvError::ArtifactMissing(_) => {
                ErrorKind::Dependency
            }
            EnvError::Locked(_) => ErrorKind::Conflict,
            e if e.is_build_error() => ErrorKind::Build,
            _ => ErrorKind::Io,
        }
    }
}

/// The piece of fleet state an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Environment,
    Instance,
    Orchestration,
    Settings,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Environment => "environment",
            Entity::Instance => "instance",
            Entity::Orchestration => "orchestration",
            Entity::Settings => "settings",
        }
    }
}

/// What happened to the affected entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Untouched,
    RolledBack,
    PartiallyModified,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Untouched => "untouched",
            Disposition::RolledBack => "rolled-back",
            Disposition::PartiallyModified => "partially-modified",
        }
    }
}

/// botfleet domain errors.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("invalid instance name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid port {port}: {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("instance {0} already exists")]
    DuplicateInstance(String),

    #[error("port {port} is already assigned to instance {owner}")]
    PortInUse { port: u16, owner: String },

    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("environment is not built ({0} missing); run `botfleet env update` first")]
    EnvironmentMissing(PathBuf),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
        disposition: Disposition,
    },

    #[error("cannot merge into {path}: {reason}")]
    OrchestrationMerge {
        path: PathBuf,
        reason: String,
        disposition: Disposition,
    },

    #[error("registry is locked by another botfleet process ({0})")]
    RegistryLocked(PathBuf),

    #[error("process supervisor error: {0}")]
    Supervisor(String),

    #[error("invalid settings in {path}: {reason}")]
    Settings { path: PathBuf, reason: String },

    #[error("environment error: {0}")]
    Environment(#[from] EnvError),

    #[error("io error: {source}")]
    Io {
        entity: Entity,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FleetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::InvalidName { .. }
            | FleetError::InvalidPort { .. }
            | FleetError::InstanceNotFound(_)
            | FleetError::Settings { .. } => ErrorKind::Validation,
            FleetError::DuplicateInstance(_)
            | FleetError::PortInUse { .. }
            | FleetError::RegistryLocked(_) => ErrorKind::Conflict,
            FleetError::EnvironmentMissing(_) => ErrorKind::Dependency,
            FleetError::OrchestrationMerge { .. } => ErrorKind::Conflict,
            FleetError::Environment(env) => ErrorKind::of_env(env),
            FleetError::Filesystem { .. }
            | FleetError::Supervisor(_)
            | FleetError::Io { .. }
            | FleetError::Serialization(_) => ErrorKind::Io,
        }
    }

    pub fn entity(&self) -> Entity {
        match self {
            FleetError::EnvironmentMissing(_) | FleetError::Environment(_) => Entity::Environment,
            FleetError::OrchestrationMerge { .. } => Entity::Orchestration,
            FleetError::Settings { .. } => Entity::Settings,
            FleetError::Io { entity, .. } => *entity,
            _ => Entity::Instance,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            FleetError::Filesystem { disposition, .. }
            | FleetError::OrchestrationMerge { disposition, .. } => *disposition,
            FleetError::Environment(env) if env.is_fatal() => Disposition::PartiallyModified,
            _ => Disposition::Untouched,
        }
    }

    /// State may be inconsistent; an operator has to look.
    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::PartiallyModified
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FleetError::Filesystem {
            path: path.into(),
            source,
            disposition: Disposition::Untouched,
        }
    }
}

/// Result type for botfleet domain operations.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_leave_state_untouched() {
        let err = FleetError::InvalidName {
            name: "-alice".to_string(),
            reason: "must start with a letter or digit".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.entity(), Entity::Instance);
        assert_eq!(err.disposition(), Disposition::Untouched);
        assert!(err.to_string().contains("invalid instance name"));
    }

    #[test]
    fn test_conflicts() {
        assert_eq!(
            FleetError::DuplicateInstance("alice".into()).kind(),
            ErrorKind::Conflict
        );
        let err = FleetError::PortInUse {
            port: 18790,
            owner: "alice".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("18790"));
    }

    #[test]
    fn test_metadata_write_failure_is_io_not_build() {
        let err = EnvError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "fingerprint directory is a dangling link",
        ));
        assert_eq!(ErrorKind::of_env(&err), ErrorKind::Io);
        assert_eq!(
            ErrorKind::of_env(&EnvError::BuildFailed("pip exited 1".into())),
            ErrorKind::Build
        );
    }

    #[test]
    fn test_environment_errors_classify_through() {
        let missing = FleetError::EnvironmentMissing(PathBuf::from("env/bin/nanobot"));
        assert_eq!(missing.kind(), ErrorKind::Dependency);
        assert_eq!(missing.entity(), Entity::Environment);

        let build: FleetError = EnvError::BuildFailed("pip exited 1".into()).into();
        assert_eq!(build.kind(), ErrorKind::Build);

        let restore: FleetError = EnvError::RestoreFailed {
            artifact: PathBuf::from("env"),
            backup: PathBuf::from("backups/env-1"),
            build_error: "boom".into(),
            reason: "EIO".into(),
        }
        .into();
        assert_eq!(restore.kind(), ErrorKind::Io);
        assert!(restore.is_fatal());
    }

    #[test]
    fn test_merge_error_reports_orchestration() {
        let err = FleetError::OrchestrationMerge {
            path: PathBuf::from("docker-compose.yml"),
            reason: "no top-level `services` mapping".into(),
            disposition: Disposition::RolledBack,
        };
        assert_eq!(err.entity(), Entity::Orchestration);
        assert_eq!(err.disposition().as_str(), "rolled-back");
    }
}
