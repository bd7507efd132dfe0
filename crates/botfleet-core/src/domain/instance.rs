//! Instance record and persona selection.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{FleetError, Result};

/// Lowercase alphanumerics with internal hyphens.
const NAME_PATTERN: &str = r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NAME_PATTERN).expect("static pattern compiles"))
}

/// Whether `name` is a well-formed instance name.
pub fn validate_name(name: &str) -> bool {
    name_regex().is_match(name)
}

/// Validated instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceName(String);

impl InstanceName {
    pub fn parse(name: &str) -> Result<Self> {
        if validate_name(name) {
            return Ok(InstanceName(name.to_string()));
        }
        Err(FleetError::InvalidName {
            name: name.to_string(),
            reason: explain_invalid(name).to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstanceName {
    type Error = FleetError;

    fn try_from(s: String) -> Result<Self> {
        InstanceName::parse(&s)
    }
}

impl From<InstanceName> for String {
    fn from(name: InstanceName) -> String {
        name.0
    }
}

impl std::fmt::Display for InstanceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn explain_invalid(name: &str) -> &'static str {
    if name.is_empty() {
        "name must not be empty"
    } else if name.chars().any(|c| c.is_ascii_uppercase()) {
        "uppercase letters are not allowed"
    } else if name.starts_with('-') || name.ends_with('-') {
        "name must start and end with a letter or digit"
    } else {
        "only lowercase letters, digits and hyphens are allowed"
    }
}

/// Persona requested at provisioning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PersonaChoice {
    /// A template from the persona catalog
    Template(String),
    /// Operator-supplied content; `None` asks for the generated default
    Custom(Option<String>),
}

impl PersonaChoice {
    /// Interpret a CLI-style choice: `custom` selects custom, anything else
    /// names a template.
    pub fn from_arg(choice: &str, inline: Option<String>) -> Self {
        if choice.eq_ignore_ascii_case("custom") {
            PersonaChoice::Custom(inline)
        } else {
            PersonaChoice::Template(choice.to_string())
        }
    }
}

impl Default for PersonaChoice {
    fn default() -> Self {
        PersonaChoice::Template("assistant".to_string())
    }
}

/// Where the written persona document came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "template", rename_all = "snake_case")]
pub enum PersonaSource {
    Catalog(String),
    Custom,
    Generated,
}

/// A provisioned agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: InstanceName,
    /// Host-facing port
    pub port: u16,
    pub model: String,
    pub persona: PersonaSource,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Container name under a given prefix
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_names() {
        for name in ["alice", "bob-2", "a1", "a", "x-y-z", "007"] {
            assert!(validate_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_invalid_names() {
        for name in ["", "-alice", "Alice", "alice-", "al_ice", "al ice", "alice.", "-"] {
            assert!(!validate_name(name), "{name:?} should be invalid");
        }
    }

    #[test]
    fn test_parse_explains_rejection() {
        let err = InstanceName::parse("Alice").unwrap_err();
        assert!(err.to_string().contains("uppercase"));

        let err = InstanceName::parse("alice-").unwrap_err();
        assert!(err.to_string().contains("start and end"));

        let err = InstanceName::parse("al_ice").unwrap_err();
        assert!(err.to_string().contains("only lowercase"));
    }

    #[test]
    fn test_instance_name_serde_validates() {
        let ok: InstanceName = serde_json::from_str("\"bob-2\"").unwrap();
        assert_eq!(ok.as_str(), "bob-2");
        assert!(serde_json::from_str::<InstanceName>("\"Bob\"").is_err());
    }

    #[test]
    fn test_persona_choice_from_arg() {
        assert_eq!(
            PersonaChoice::from_arg("custom", None),
            PersonaChoice::Custom(None)
        );
        assert_eq!(
            PersonaChoice::from_arg("coder", None),
            PersonaChoice::Template("coder".to_string())
        );
    }

    #[test]
    fn test_instance_record_roundtrips() {
        let instance = Instance {
            name: InstanceName::parse("alice").unwrap(),
            port: 18790,
            model: "gpt-4o-mini".to_string(),
            persona: PersonaSource::Catalog("assistant".to_string()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&instance).unwrap();
        let back: Instance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instance);
        assert_eq!(instance.container_name("nanobot-"), "nanobot-alice");
    }
}
