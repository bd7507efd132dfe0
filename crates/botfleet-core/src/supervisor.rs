//! Process-supervision collaborator
//!
//! botfleet does not supervise processes itself. It reads live state from,
//! and forwards start/stop requests to, an external engine behind the
//! [`ProcessSupervisor`] trait. [`DockerSupervisor`] drives the Docker CLI;
//! tests use [`crate::fakes::MemorySupervisor`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{FleetError, Result};
use crate::settings::FleetSettings;

/// Lifecycle state as reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Stopped,
    Unknown,
}

impl ProcessState {
    /// Map an engine state string (`running`, `exited`, ...)
    pub fn from_engine(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "running" | "restarting" => ProcessState::Running,
            "exited" | "created" | "paused" | "dead" | "removing" => ProcessState::Stopped,
            _ => ProcessState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Running => "running",
            ProcessState::Stopped => "stopped",
            ProcessState::Unknown => "unknown",
        }
    }
}

/// A process known to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Container name, including the fleet prefix
    pub name: String,
    pub state: ProcessState,
    /// Published host ports
    pub ports: Vec<u16>,
}

/// Point-in-time resource usage of one process
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    pub name: String,
    pub cpu_percent: Option<f64>,
    /// Human-readable memory figure as reported by the engine
    pub memory: Option<String>,
}

/// External engine that runs instance processes.
///
/// `service` arguments are orchestration service keys (instance names);
/// `None` means every service.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn list(&self) -> Result<Vec<ProcessInfo>>;

    async fn usage(&self) -> Result<Vec<ResourceUsage>>;

    async fn start(&self, service: Option<&str>) -> Result<()>;

    async fn stop(&self, service: Option<&str>) -> Result<()>;
}

/// Supervisor backed by the `docker` and `docker compose` command lines
#[derive(Debug, Clone)]
pub struct DockerSupervisor {
    docker: String,
    compose_command: Vec<String>,
    compose_file: PathBuf,
    name_filter: String,
    timeout: Duration,
}

impl DockerSupervisor {
    pub fn new(root: &std::path::Path, settings: &FleetSettings) -> Self {
        DockerSupervisor {
            docker: "docker".to_string(),
            compose_command: settings.orchestration.compose_command.clone(),
            compose_file: root.join(&settings.orchestration.compose_file),
            name_filter: settings.instances.container_prefix.clone(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {:?}", program, args);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::Supervisor(format!("cannot run {program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                FleetError::Supervisor(format!(
                    "{program} timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| FleetError::Supervisor(format!("{program} failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::Supervisor(format!(
                "{program} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn compose(&self, verb: &[&str], service: Option<&str>) -> Result<()> {
        let (program, prefix) = self
            .compose_command
            .split_first()
            .ok_or_else(|| FleetError::Supervisor("compose command is empty".to_string()))?;

        let mut args: Vec<String> = prefix.to_vec();
        args.push("-f".to_string());
        args.push(self.compose_file.display().to_string());
        args.extend(verb.iter().map(|s| s.to_string()));
        if let Some(service) = service {
            args.push(service.to_string());
        }
        self.run(program, &args).await.map(|_| ())
    }
}

#[async_trait]
impl ProcessSupervisor for DockerSupervisor {
    async fn list(&self) -> Result<Vec<ProcessInfo>> {
        let args = [
            "ps",
            "-a",
            "--filter",
            &format!("name={}", self.name_filter),
            "--format",
            "{{json .}}",
        ]
        .map(String::from);
        let stdout = self.run(&self.docker, &args).await?;
        Ok(parse_ps_output(&stdout))
    }

    async fn usage(&self) -> Result<Vec<ResourceUsage>> {
        let args = ["stats", "--no-stream", "--format", "{{json .}}"].map(String::from);
        let stdout = self.run(&self.docker, &args).await?;
        Ok(parse_stats_output(&stdout))
    }

    async fn start(&self, service: Option<&str>) -> Result<()> {
        self.compose(&["up", "-d"], service).await
    }

    async fn stop(&self, service: Option<&str>) -> Result<()> {
        self.compose(&["stop"], service).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    names: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    ports: String,
}

#[derive(Deserialize)]
struct StatsLine {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CPUPerc", default)]
    cpu: String,
    #[serde(rename = "MemUsage", default)]
    memory: String,
}

/// Parse `docker ps --format '{{json .}}'` output, one object per line
pub fn parse_ps_output(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PsLine>(line) {
            Ok(ps) => Some(ProcessInfo {
                // a container may carry several comma-separated names
                name: ps.names.split(',').next().unwrap_or_default().trim().to_string(),
                state: ProcessState::from_engine(&ps.state),
                ports: parse_host_ports(&ps.ports),
            }),
            Err(e) => {
                warn!("Ignoring unparseable process line: {}", e);
                None
            }
        })
        .collect()
}

/// Parse `docker stats --no-stream --format '{{json .}}'` output
pub fn parse_stats_output(stdout: &str) -> Vec<ResourceUsage> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<StatsLine>(line).ok())
        .map(|s| ResourceUsage {
            name: s.name,
            cpu_percent: s.cpu.trim().trim_end_matches('%').parse().ok(),
            memory: s
                .memory
                .split('/')
                .next()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        })
        .collect()
}

/// Host ports from a `0.0.0.0:18790->18790/tcp, :::18790->18790/tcp` list
pub fn parse_host_ports(ports: &str) -> Vec<u16> {
    let mut found: Vec<u16> = ports
        .split(',')
        .filter_map(|mapping| {
            let (host, _) = mapping.trim().split_once("->")?;
            host.rsplit(':').next()?.parse().ok()
        })
        .collect();
    found.dedup();
    found
}
