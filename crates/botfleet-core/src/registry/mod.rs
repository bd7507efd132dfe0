//! Instance registry
//!
//! An instance's durable state is its directory under `instances/` plus its
//! stanza in the orchestration definition. There is no separate database:
//! `list()` reads the directories back.
//!
//! `create()` stages every artifact in a hidden directory next to the live
//! instances and renames it into place in one step, so a failed create
//! never leaves a half-written instance behind.

pub mod artifacts;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use botfleet_env::{write_atomic, EnvError, EnvironmentStore, LockGuard};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::compose::{first_host_port, merge_service, MergeOutcome};
use crate::domain::{
    validate_name, Disposition, Entity, FleetError, Instance, InstanceName, PersonaChoice,
    PersonaSource, Result,
};
use crate::persona::{PersonaCatalog, ResolvedPersona};
use crate::settings::FleetSettings;

use artifacts::{central_stanza, inherit_api_key, override_stanza, to_pretty_json, InstanceConfig};

/// Structured record of the instance, inside its directory
pub const INSTANCE_RECORD: &str = "instance.json";
/// Instance configuration document
pub const CONFIG_DOCUMENT: &str = "config/config.json";
/// Persona document
pub const PERSONA_DOCUMENT: &str = "workspace/SOUL.md";
/// Orchestration override fragment
pub const OVERRIDE_FRAGMENT: &str = "docker-compose.override.yml";

const INSTANCE_AREAS: &[&str] = &["config", "sessions", "workspace", "memory", "skills"];
const STAGING_PREFIX: &str = ".staging-";

/// Parameters of [`InstanceRegistry::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    /// Host port; auto-allocated when `None`
    pub port: Option<u16>,
    /// Model identifier; settings default when `None`
    pub model: Option<String>,
    pub persona: PersonaChoice,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        CreateRequest {
            name: name.into(),
            port: None,
            model: None,
            persona: PersonaChoice::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_persona(mut self, persona: PersonaChoice) -> Self {
        self.persona = persona;
        self
    }
}

/// Owner of the provisioned instances of one fleet root
#[derive(Debug)]
pub struct InstanceRegistry {
    root: PathBuf,
    settings: FleetSettings,
    env: Arc<EnvironmentStore>,
    personas: PersonaCatalog,
}

impl InstanceRegistry {
    pub fn new(root: impl Into<PathBuf>, settings: FleetSettings, env: Arc<EnvironmentStore>) -> Self {
        let root = root.into();
        let personas = PersonaCatalog::new(root.join(&settings.templates.dir).join("personas"));
        InstanceRegistry {
            root,
            settings,
            env,
            personas,
        }
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    pub fn personas(&self) -> &PersonaCatalog {
        &self.personas
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join(&self.settings.instances.dir)
    }

    pub fn instance_dir(&self, name: &InstanceName) -> PathBuf {
        self.instances_dir().join(name.as_str())
    }

    pub fn compose_path(&self) -> PathBuf {
        self.root.join(&self.settings.orchestration.compose_file)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(".locks").join("registry.lock")
    }

    fn template_config_path(&self) -> PathBuf {
        self.root.join(&self.settings.templates.dir).join("config.json")
    }

    /// Well-formed and not a reserved orchestration key
    pub fn validate_name(&self, name: &str) -> bool {
        validate_name(name) && !self.is_reserved(name)
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.settings
            .instances
            .reserved_names
            .iter()
            .any(|r| r == name)
    }

    /// Parse `name`, rejecting malformed and reserved names
    pub fn check_name(&self, name: &str) -> Result<InstanceName> {
        let parsed = InstanceName::parse(name)?;
        if self.is_reserved(name) {
            return Err(FleetError::InvalidName {
                name: name.to_string(),
                reason: "name is reserved".to_string(),
            });
        }
        Ok(parsed)
    }

    /// All provisioned instances, sorted by name
    pub fn list(&self) -> Result<Vec<Instance>> {
        let dir = self.instances_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FleetError::fs(&dir, e)),
        };

        let mut instances = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FleetError::fs(&dir, e))?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            // staging directories and stray files are not instances
            let Ok(name) = InstanceName::parse(&file_name) else {
                continue;
            };
            if !entry.path().is_dir() {
                continue;
            }
            match self.read_instance(&name, &entry.path()) {
                Some(instance) => instances.push(instance),
                None => warn!(instance = %name, "Skipping instance with no recoverable port"),
            }
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    /// One instance by name
    pub fn get(&self, name: &str) -> Result<Instance> {
        let parsed = InstanceName::parse(name)?;
        let dir = self.instance_dir(&parsed);
        if !dir.is_dir() {
            return Err(FleetError::InstanceNotFound(name.to_string()));
        }
        self.read_instance(&parsed, &dir)
            .ok_or_else(|| FleetError::InstanceNotFound(name.to_string()))
    }

    fn read_instance(&self, name: &InstanceName, dir: &Path) -> Option<Instance> {
        let record = dir.join(INSTANCE_RECORD);
        match std::fs::read(&record) {
            Ok(bytes) => match serde_json::from_slice::<Instance>(&bytes) {
                Ok(instance) if &instance.name == name => return Some(instance),
                Ok(_) => warn!(instance = %name, "Instance record names another instance"),
                Err(e) => warn!(instance = %name, "Unreadable instance record: {}", e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(instance = %name, "No instance record, reading artifacts");
            }
            Err(e) => warn!(instance = %name, "Cannot read instance record: {}", e),
        }
        self.recover_instance(name, dir)
    }

    /// Rebuild a record from the override fragment and config document
    fn recover_instance(&self, name: &InstanceName, dir: &Path) -> Option<Instance> {
        let fragment = std::fs::read_to_string(dir.join(OVERRIDE_FRAGMENT)).ok()?;
        let port = first_host_port(&fragment)?;

        let model = std::fs::read(dir.join(CONFIG_DOCUMENT))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
            .and_then(|doc| doc.get("model").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| self.settings.instances.default_model.clone());

        let created_at = std::fs::metadata(dir)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Some(Instance {
            name: name.clone(),
            port,
            model,
            persona: PersonaSource::Generated,
            created_at,
        })
    }

    /// Port for a new instance given the current assignments
    pub fn allocate_port(&self, requested: Option<u16>) -> Result<u16> {
        let existing = self.list()?;
        self.pick_port(requested, &existing)
    }

    fn pick_port(&self, requested: Option<u16>, existing: &[Instance]) -> Result<u16> {
        let instances = &self.settings.instances;
        match requested {
            Some(0) => Err(FleetError::InvalidPort {
                port: 0,
                reason: "port 0 cannot be mapped on the host".to_string(),
            }),
            Some(port) => {
                if instances.reject_requested_port_collisions {
                    if let Some(owner) = existing.iter().find(|i| i.port == port) {
                        return Err(FleetError::PortInUse {
                            port,
                            owner: owner.name.to_string(),
                        });
                    }
                }
                Ok(port)
            }
            None => {
                // monotonic: gaps left by removed instances are not reused
                let highest = existing
                    .iter()
                    .map(|i| i.port)
                    .max()
                    .unwrap_or(instances.port_floor)
                    .max(instances.port_floor);
                highest.checked_add(1).ok_or_else(|| FleetError::InvalidPort {
                    port: highest,
                    reason: "no port left above the highest assigned port".to_string(),
                })
            }
        }
    }

    /// Provision a new instance and add it to the orchestration definition
    pub fn create(&self, request: &CreateRequest) -> Result<Instance> {
        let name = self.check_name(&request.name)?;

        let _registry_lock = LockGuard::exclusive(self.lock_path()).map_err(|e| match e {
            EnvError::Locked(path) => FleetError::RegistryLocked(path),
            EnvError::Io(source) => FleetError::Io {
                entity: Entity::Instance,
                source,
            },
            other => FleetError::Environment(other),
        })?;
        let _env_lock = self.env.lock_shared()?;

        if !self.env.has_artifact() {
            return Err(FleetError::EnvironmentMissing(
                self.env.layout().entry_point_path(),
            ));
        }

        let dir = self.instance_dir(&name);
        if dir.exists() {
            return Err(FleetError::DuplicateInstance(name.to_string()));
        }

        let existing = self.list()?;
        let port = self.pick_port(request.port, &existing)?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.settings.instances.default_model.clone());
        let persona = self.personas.resolve(&request.persona, &name, &model)?;

        let instance = Instance {
            name,
            port,
            model,
            persona: persona.source.clone(),
            created_at: Utc::now(),
        };

        self.place(&instance, &persona, &dir)?;
        info!(instance = %instance.name, port = instance.port, "Instance directory created");

        match self.merge_orchestration(&instance) {
            Ok(MergeOutcome::Inserted) => {
                info!(instance = %instance.name, "Added service to orchestration definition");
            }
            Ok(MergeOutcome::AlreadyPresent) => {
                warn!(
                    instance = %instance.name,
                    "Orchestration definition already has this service, left unchanged"
                );
            }
            Err(reason) => {
                let disposition = match std::fs::remove_dir_all(&dir) {
                    Ok(()) => Disposition::RolledBack,
                    Err(e) => {
                        warn!("Cannot remove {:?} after failed merge: {}", dir, e);
                        Disposition::PartiallyModified
                    }
                };
                return Err(FleetError::OrchestrationMerge {
                    path: self.compose_path(),
                    reason,
                    disposition,
                });
            }
        }

        Ok(instance)
    }

    /// Write every artifact into a staging directory, then rename it to `dir`
    fn place(&self, instance: &Instance, persona: &ResolvedPersona, dir: &Path) -> Result<()> {
        let parent = self.instances_dir();
        std::fs::create_dir_all(&parent).map_err(|e| FleetError::fs(&parent, e))?;

        // dropped on every exit path; after the rename there is nothing left to remove
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| FleetError::fs(&parent, e))?;
        debug!("Staging instance in {:?}", staging.path());

        self.write_artifacts(staging.path(), instance, persona)?;

        // tempdirs are created 0700
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o755))
                .map_err(|e| FleetError::fs(staging.path(), e))?;
        }

        std::fs::rename(staging.path(), dir).map_err(|e| FleetError::fs(dir, e))?;
        Ok(())
    }

    fn write_artifacts(
        &self,
        dir: &Path,
        instance: &Instance,
        persona: &ResolvedPersona,
    ) -> Result<()> {
        for area in INSTANCE_AREAS {
            let path = dir.join(area);
            std::fs::create_dir_all(&path).map_err(|e| FleetError::fs(&path, e))?;
        }

        let api_key = inherit_api_key(&self.template_config_path());
        let config = InstanceConfig::render(instance, api_key, &self.settings);
        write_file(&dir.join(CONFIG_DOCUMENT), &to_pretty_json(&config)?)?;
        write_file(&dir.join(PERSONA_DOCUMENT), persona.content.as_bytes())?;
        write_file(
            &dir.join(OVERRIDE_FRAGMENT),
            override_stanza(instance, &self.settings)
                .render_document()
                .as_bytes(),
        )?;
        write_file(&dir.join(INSTANCE_RECORD), &to_pretty_json(instance)?)?;
        Ok(())
    }

    /// Add the instance's stanza to the orchestration definition.
    ///
    /// The error is the reason the merge was refused; the file is untouched.
    fn merge_orchestration(&self, instance: &Instance) -> std::result::Result<MergeOutcome, String> {
        let path = self.compose_path();
        let services_key = &self.settings.orchestration.services_key;

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Creating orchestration definition {:?}", path);
                format!("{services_key}:\n")
            }
            Err(e) => return Err(format!("cannot read: {e}")),
        };

        let stanza = central_stanza(instance, &self.settings);
        let (merged, outcome) =
            merge_service(&text, services_key, &stanza).map_err(|e| e.to_string())?;

        if outcome == MergeOutcome::Inserted {
            write_atomic(&path, merged.as_bytes()).map_err(|e| format!("cannot write: {e}"))?;
        }
        Ok(outcome)
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|e| FleetError::fs(path, e))
}
