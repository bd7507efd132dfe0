//! botfleet Core Library
//!
//! Instance registry, orchestration merge, persona resolution and status
//! aggregation for a fleet of agent instances sharing one environment
//! (see `botfleet-env`).

pub mod compose;
pub mod domain;
pub mod fakes;
pub mod fleet;
pub mod persona;
pub mod registry;
pub mod settings;
pub mod status;
pub mod supervisor;
pub mod telemetry;

pub use compose::{merge_service, scan_services, MergeError, MergeOutcome, ServiceStanza};

pub use domain::{
    validate_name, Disposition, Entity, ErrorKind, FleetError, Instance, InstanceName,
    PersonaChoice, PersonaSource, Result,
};

pub use fleet::Fleet;

pub use telemetry::init_tracing;

pub use persona::{default_persona, PersonaCatalog, ResolvedPersona};

pub use registry::artifacts::InstanceConfig;
pub use registry::{CreateRequest, InstanceRegistry};

pub use settings::{FleetSettings, SETTINGS_FILE};

pub use status::{InstanceStatus, StatusAggregator};

pub use supervisor::{DockerSupervisor, ProcessInfo, ProcessState, ProcessSupervisor, ResourceUsage};

pub use botfleet_env::{
    EnvError, EnvironmentStore, EnvironmentVersion, Fingerprint, UpdateOutcome,
};
