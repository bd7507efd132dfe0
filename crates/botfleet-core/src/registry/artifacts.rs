//! Per-instance artifacts: configuration document, orchestration fragments

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::compose::ServiceStanza;
use crate::domain::{FleetError, Instance, Result};
use crate::settings::FleetSettings;

/// Placeholder written when no key can be inherited
pub const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY";

/// Provider sections searched for an api key, in priority order
pub const PROVIDER_PRIORITY: &[&str] = &[
    "openrouter",
    "anthropic",
    "openai",
    "gemini",
    "zhipu",
    "groq",
    "vllm",
];

/// Identifying environment variable set in every instance container
pub const INSTANCE_ENV_VAR: &str = "NANOBOT_INSTANCE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// `config/config.json` of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub model: String,
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub gateway: GatewayConfig,
    pub workspace: String,
    pub sessions: String,
    pub log_level: String,
}

impl InstanceConfig {
    pub fn render(instance: &Instance, api_key: String, settings: &FleetSettings) -> Self {
        let home = settings.instances.container_home.trim_end_matches('/');
        InstanceConfig {
            model: instance.model.clone(),
            api_key,
            temperature: 0.7,
            max_tokens: 4096,
            gateway: GatewayConfig {
                host: "0.0.0.0".to_string(),
                port: settings.instances.internal_port,
            },
            workspace: format!("{home}/workspace"),
            sessions: format!("{home}/sessions"),
            log_level: "INFO".to_string(),
        }
    }
}

/// Find an api key in the fleet's template configuration.
///
/// A missing or unreadable template is not an error; the placeholder is
/// used and the operator fills the key in later.
pub fn inherit_api_key(template: &Path) -> String {
    let text = match std::fs::read_to_string(template) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No template config at {:?}", template);
            return API_KEY_PLACEHOLDER.to_string();
        }
        Err(e) => {
            warn!("Cannot read template config {:?}: {}", template, e);
            return API_KEY_PLACEHOLDER.to_string();
        }
    };
    let doc: Value = match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Template config {:?} is not valid JSON: {}", template, e);
            return API_KEY_PLACEHOLDER.to_string();
        }
    };
    api_key_from(&doc).unwrap_or_else(|| API_KEY_PLACEHOLDER.to_string())
}

fn api_key_from(doc: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    non_empty(doc.get("api_key")).or_else(|| {
        let providers = doc.get("providers")?;
        PROVIDER_PRIORITY
            .iter()
            .find_map(|p| non_empty(providers.get(p).and_then(|p| p.get("api_key"))))
    })
}

fn compose_path(path: &Path) -> String {
    if path.is_absolute() {
        path.display().to_string()
    } else {
        format!("./{}", path.display())
    }
}

fn port_mapping(instance: &Instance, settings: &FleetSettings) -> String {
    format!("{}:{}", instance.port, settings.instances.internal_port)
}

/// Fragment written next to the instance (`docker-compose.override.yml`)
pub fn override_stanza(instance: &Instance, settings: &FleetSettings) -> ServiceStanza {
    ServiceStanza::new(instance.name.as_str())
        .scalar(
            "container_name",
            instance.container_name(&settings.instances.container_prefix),
        )
        .list("ports", vec![port_mapping(instance, settings)])
        .list(
            "environment",
            vec![format!("{INSTANCE_ENV_VAR}={}", instance.name)],
        )
}

/// Stanza merged into the central orchestration definition
pub fn central_stanza(instance: &Instance, settings: &FleetSettings) -> ServiceStanza {
    let orchestration = &settings.orchestration;
    let home = &settings.instances.container_home;
    let instance_dir: PathBuf = settings.instances.dir.join(instance.name.as_str());
    let entry_point = Path::new(&orchestration.env_mount).join(&settings.environment.entry_point);

    ServiceStanza::new(instance.name.as_str())
        .scalar("image", orchestration.image.clone())
        .scalar(
            "container_name",
            instance.container_name(&settings.instances.container_prefix),
        )
        .list("ports", vec![port_mapping(instance, settings)])
        .list(
            "volumes",
            vec![
                format!(
                    "{}:{}:ro",
                    compose_path(&settings.environment.artifact_dir),
                    orchestration.env_mount
                ),
                format!("{}:{}", compose_path(&instance_dir), home),
            ],
        )
        .list(
            "environment",
            vec![format!("{INSTANCE_ENV_VAR}={}", instance.name)],
        )
        .list(
            "command",
            vec![entry_point.display().to_string(), "gateway".to_string()],
        )
        .scalar("restart", "unless-stopped")
}

/// Serialize `value` as pretty JSON with a trailing newline
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(FleetError::from)?;
    bytes.push(b'\n');
    Ok(bytes)
}
