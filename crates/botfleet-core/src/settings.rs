//! Fleet settings (`botfleet.toml`)
//!
//! Every field has a default, so a fleet root without a settings file
//! behaves exactly like one containing an empty file. Relative paths are
//! resolved against the fleet root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use botfleet_env::{CommandBuilder, EnvironmentLayout};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{FleetError, Result};

/// Name of the optional settings file at the fleet root
pub const SETTINGS_FILE: &str = "botfleet.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    pub environment: EnvironmentSettings,
    pub instances: InstanceSettings,
    pub orchestration: OrchestrationSettings,
    pub templates: TemplateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub dependency_spec: PathBuf,
    pub artifact_dir: PathBuf,
    pub backups_dir: PathBuf,
    /// Relative to `artifact_dir`
    pub entry_point: PathBuf,
    pub build_steps: Vec<Vec<String>>,
    /// 0 disables the timeout
    pub build_timeout_secs: u64,
    /// 0 disables the timeout
    pub snapshot_timeout_secs: u64,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        EnvironmentSettings {
            dependency_spec: PathBuf::from("requirements.txt"),
            artifact_dir: PathBuf::from("env"),
            backups_dir: PathBuf::from("backups"),
            entry_point: PathBuf::from("bin/nanobot"),
            build_steps: CommandBuilder::default().steps,
            build_timeout_secs: 1800,
            snapshot_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    pub dir: PathBuf,
    /// Auto-assigned ports start above this value
    pub port_floor: u16,
    /// Gateway port inside every container
    pub internal_port: u16,
    pub container_prefix: String,
    /// Where the instance directory is mounted inside the container
    pub container_home: String,
    pub default_model: String,
    pub reserved_names: Vec<String>,
    pub reject_requested_port_collisions: bool,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        InstanceSettings {
            dir: PathBuf::from("instances"),
            port_floor: 18789,
            internal_port: 18790,
            container_prefix: "nanobot-".to_string(),
            container_home: "/root/.nanobot".to_string(),
            default_model: "anthropic/claude-opus-4-5".to_string(),
            reserved_names: vec!["all".to_string(), "base".to_string(), "env".to_string()],
            reject_requested_port_collisions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    pub compose_file: PathBuf,
    pub services_key: String,
    pub image: String,
    /// Mount point of the shared environment inside containers
    pub env_mount: String,
    /// Supervisor command prefix, e.g. `["docker", "compose"]`
    pub compose_command: Vec<String>,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        OrchestrationSettings {
            compose_file: PathBuf::from("docker-compose.yml"),
            services_key: "services".to_string(),
            image: "python:3.12-slim".to_string(),
            env_mount: "/opt/nanobot-env".to_string(),
            compose_command: vec!["docker".to_string(), "compose".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub dir: PathBuf,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        TemplateSettings {
            dir: PathBuf::from("templates"),
        }
    }
}

impl FleetSettings {
    /// Load `botfleet.toml` from `root`, falling back to defaults when absent
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!("Loading settings from {:?}", path);
                toml::from_str(&text).map_err(|e| FleetError::Settings {
                    path,
                    reason: e.to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(FleetError::Io {
                entity: crate::domain::Entity::Settings,
                source: e,
            }),
        }
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.environment.build_timeout_secs)
    }

    pub fn snapshot_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.environment.snapshot_timeout_secs)
    }

    /// Environment paths resolved under `root`
    pub fn environment_layout(&self, root: &Path) -> EnvironmentLayout {
        let env = &self.environment;
        EnvironmentLayout {
            spec_path: root.join(&env.dependency_spec),
            artifact_dir: root.join(&env.artifact_dir),
            backups_dir: root.join(&env.backups_dir),
            fingerprint_path: root.join("env.fingerprint"),
            version_path: root.join("env.version.json"),
            lock_path: root.join(".locks").join("environment.lock"),
            entry_point: env.entry_point.clone(),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
