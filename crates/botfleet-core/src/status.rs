//! Status reconciliation between the registry and live processes

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{validate_name, FleetError, InstanceName, Result};
use crate::registry::InstanceRegistry;
use crate::supervisor::{ProcessState, ProcessSupervisor, ResourceUsage};

/// One line of the status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub name: String,
    pub state: ProcessState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Whether an instance directory exists for this name
    pub in_registry: bool,
}

/// Cross-references registry entries with supervisor state
pub struct StatusAggregator {
    registry: Arc<InstanceRegistry>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl StatusAggregator {
    pub fn new(registry: Arc<InstanceRegistry>, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        StatusAggregator {
            registry,
            supervisor,
        }
    }

    /// Status of every known instance, sorted by name.
    ///
    /// Supervisor failures degrade the report instead of failing it: an
    /// unreachable supervisor leaves every registry instance `unknown`, and
    /// missing usage data leaves the usage fields empty.
    pub async fn report(&self) -> Result<Vec<InstanceStatus>> {
        let prefix = &self.registry.settings().instances.container_prefix;
        let mut report: BTreeMap<String, InstanceStatus> = BTreeMap::new();

        for instance in self.registry.list()? {
            report.insert(
                instance.name.to_string(),
                InstanceStatus {
                    name: instance.name.to_string(),
                    state: ProcessState::Unknown,
                    external_port: Some(instance.port),
                    cpu_percent: None,
                    memory: None,
                    in_registry: true,
                },
            );
        }

        let processes = match self.supervisor.list().await {
            Ok(processes) => processes,
            Err(e) => {
                warn!("Process supervisor unavailable, states unknown: {}", e);
                return Ok(report.into_values().collect());
            }
        };

        let usage: HashMap<String, ResourceUsage> = if processes.is_empty() {
            HashMap::new()
        } else {
            match self.supervisor.usage().await {
                Ok(usage) => usage.into_iter().map(|u| (u.name.clone(), u)).collect(),
                Err(e) => {
                    debug!("Resource usage unavailable: {}", e);
                    HashMap::new()
                }
            }
        };

        for process in processes {
            let Some(name) = process
                .name
                .strip_prefix(prefix.as_str())
                .filter(|n| validate_name(n))
            else {
                continue;
            };

            let status = report
                .entry(name.to_string())
                .or_insert_with(|| InstanceStatus {
                    name: name.to_string(),
                    state: ProcessState::Unknown,
                    external_port: None,
                    cpu_percent: None,
                    memory: None,
                    in_registry: false,
                });
            status.state = process.state;
            if let Some(port) = process.ports.first() {
                status.external_port = Some(*port);
            }
            if let Some(u) = usage.get(&process.name) {
                status.cpu_percent = u.cpu_percent;
                status.memory = u.memory.clone();
            }
        }

        Ok(report.into_values().collect())
    }

    /// Status of a single instance
    pub async fn report_one(&self, name: &str) -> Result<InstanceStatus> {
        let name = InstanceName::parse(name)?;
        self.report()
            .await?
            .into_iter()
            .find(|s| s.name == name.as_str())
            .ok_or_else(|| FleetError::InstanceNotFound(name.to_string()))
    }
}
