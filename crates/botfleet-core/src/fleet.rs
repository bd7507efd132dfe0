//! A fleet root wired up with its collaborators

use std::path::{Path, PathBuf};
use std::sync::Arc;

use botfleet_env::{ArtifactBuilder, CommandBuilder, EnvironmentStore};
use tracing::info;

use crate::domain::Result;
use crate::registry::InstanceRegistry;
use crate::settings::FleetSettings;
use crate::status::StatusAggregator;
use crate::supervisor::{DockerSupervisor, ProcessSupervisor};

/// Environment store, registry and supervisor sharing one fleet root
pub struct Fleet {
    root: PathBuf,
    env: Arc<EnvironmentStore>,
    registry: Arc<InstanceRegistry>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl Fleet {
    /// Load `botfleet.toml` and use the command-line build and Docker
    /// collaborators it configures
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let settings = FleetSettings::load(&root)?;
        let builder = CommandBuilder::new(settings.environment.build_steps.clone());
        let supervisor = DockerSupervisor::new(&root, &settings);
        Ok(Self::with_parts(
            root,
            settings,
            Arc::new(builder),
            Arc::new(supervisor),
        ))
    }

    pub fn with_parts(
        root: impl Into<PathBuf>,
        settings: FleetSettings,
        builder: Arc<dyn ArtifactBuilder>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        let root = root.into();
        let env = Arc::new(
            EnvironmentStore::new(settings.environment_layout(&root), builder)
                .with_build_timeout(settings.build_timeout())
                .with_snapshot_timeout(settings.snapshot_timeout()),
        );
        let registry = Arc::new(InstanceRegistry::new(root.clone(), settings, env.clone()));
        Fleet {
            root,
            env,
            registry,
            supervisor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &FleetSettings {
        self.registry.settings()
    }

    pub fn env(&self) -> &EnvironmentStore {
        &self.env
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn status(&self) -> StatusAggregator {
        StatusAggregator::new(self.registry.clone(), self.supervisor.clone())
    }

    /// Start one instance, or every service when `name` is `None`
    pub async fn start(&self, name: Option<&str>) -> Result<()> {
        let service = self.resolve_service(name)?;
        self.supervisor.start(service.as_deref()).await?;
        info!(instance = service.as_deref().unwrap_or("all"), "Start requested");
        Ok(())
    }

    /// Stop one instance, or every service when `name` is `None`
    pub async fn stop(&self, name: Option<&str>) -> Result<()> {
        let service = self.resolve_service(name)?;
        self.supervisor.stop(service.as_deref()).await?;
        info!(instance = service.as_deref().unwrap_or("all"), "Stop requested");
        Ok(())
    }

    fn resolve_service(&self, name: Option<&str>) -> Result<Option<String>> {
        name.map(|n| self.registry.get(n).map(|i| i.name.to_string()))
            .transpose()
    }
}
