//! In-memory fakes for the process supervisor (testing only)
//!
//! `MemorySupervisor` satisfies the [`ProcessSupervisor`] contract without a
//! container engine. Processes are keyed by container name; `start`/`stop`
//! flip the state of processes whose service name matches.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{FleetError, Result};
use crate::supervisor::{ProcessInfo, ProcessState, ProcessSupervisor, ResourceUsage};

#[derive(Debug, Default)]
struct Inner {
    processes: BTreeMap<String, ProcessInfo>,
    usage: BTreeMap<String, ResourceUsage>,
    list_error: Option<String>,
    usage_error: Option<String>,
    calls: Vec<String>,
}

/// In-memory process supervisor
#[derive(Debug)]
pub struct MemorySupervisor {
    prefix: String,
    inner: Mutex<Inner>,
}

impl MemorySupervisor {
    /// `prefix` is the container prefix that maps service names to processes
    pub fn new(prefix: impl Into<String>) -> Self {
        MemorySupervisor {
            prefix: prefix.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn add_process(&self, name: &str, state: ProcessState, ports: Vec<u16>) {
        self.inner.lock().unwrap().processes.insert(
            name.to_string(),
            ProcessInfo {
                name: name.to_string(),
                state,
                ports,
            },
        );
    }

    pub fn set_usage(&self, name: &str, cpu_percent: Option<f64>, memory: Option<&str>) {
        self.inner.lock().unwrap().usage.insert(
            name.to_string(),
            ResourceUsage {
                name: name.to_string(),
                cpu_percent,
                memory: memory.map(str::to_string),
            },
        );
    }

    /// Make `list()` fail with the given message
    pub fn fail_list(&self, message: &str) {
        self.inner.lock().unwrap().list_error = Some(message.to_string());
    }

    /// Make `usage()` fail with the given message
    pub fn fail_usage(&self, message: &str) {
        self.inner.lock().unwrap().usage_error = Some(message.to_string());
    }

    /// Start/stop requests received, e.g. `start:alice`, `stop:*`
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn transition(&self, verb: &str, service: Option<&str>, state: ProcessState) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(format!("{verb}:{}", service.unwrap_or("*")));

        let target = service.map(|s| format!("{}{}", self.prefix, s));
        let mut matched = false;
        for process in inner.processes.values_mut() {
            if target.as_deref().map_or(true, |t| t == process.name) {
                process.state = state;
                matched = true;
            }
        }
        // starting an unknown service creates it, as compose would
        if !matched && state == ProcessState::Running {
            if let Some(name) = target {
                inner.processes.insert(
                    name.clone(),
                    ProcessInfo {
                        name,
                        state,
                        ports: Vec::new(),
                    },
                );
            }
        }
    }
}

#[async_trait]
impl ProcessSupervisor for MemorySupervisor {
    async fn list(&self) -> Result<Vec<ProcessInfo>> {
        let inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.list_error {
            return Err(FleetError::Supervisor(message.clone()));
        }
        Ok(inner.processes.values().cloned().collect())
    }

    async fn usage(&self) -> Result<Vec<ResourceUsage>> {
        let inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.usage_error {
            return Err(FleetError::Supervisor(message.clone()));
        }
        Ok(inner.usage.values().cloned().collect())
    }

    async fn start(&self, service: Option<&str>) -> Result<()> {
        self.transition("start", service, ProcessState::Running);
        Ok(())
    }

    async fn stop(&self, service: Option<&str>) -> Result<()> {
        self.transition("stop", service, ProcessState::Stopped);
        Ok(())
    }
}
