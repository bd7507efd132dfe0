//! Persona catalog and resolution
//!
//! The catalog is a directory of Markdown templates (`<template>.md`).
//! Templates may use `{{name}}` and `{{model}}` placeholders. A `custom`
//! choice or a template that is not in the catalog falls back to a
//! generated default persona.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::{validate_name, FleetError, InstanceName, PersonaChoice, PersonaSource, Result};

/// Rendered persona document and its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPersona {
    pub content: String,
    pub source: PersonaSource,
}

/// Directory-backed persona templates
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    dir: PathBuf,
}

impl PersonaCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PersonaCatalog { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Template names, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| FleetError::fs(&self.dir, e))?;

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map(|x| x == "md").unwrap_or(false))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .filter(|n| validate_name(n))
            .collect();
        names.sort();
        Ok(names)
    }

    fn template_path(&self, template: &str) -> Option<PathBuf> {
        // template names follow instance naming, which rules out path tricks
        if !validate_name(template) {
            return None;
        }
        let path = self.dir.join(format!("{template}.md"));
        path.is_file().then_some(path)
    }

    /// Pick and render the persona for a new instance
    pub fn resolve(
        &self,
        choice: &PersonaChoice,
        name: &InstanceName,
        model: &str,
    ) -> Result<ResolvedPersona> {
        match choice {
            PersonaChoice::Template(template) => match self.template_path(template) {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path).map_err(|e| FleetError::fs(&path, e))?;
                    debug!(template = %template, "Using catalog persona");
                    Ok(ResolvedPersona {
                        content: render(&raw, name, model),
                        source: PersonaSource::Catalog(template.clone()),
                    })
                }
                None => {
                    warn!(
                        template = %template,
                        "Persona template not in catalog, generating default persona"
                    );
                    Ok(generated(name, model))
                }
            },
            PersonaChoice::Custom(Some(content)) if !content.trim().is_empty() => {
                Ok(ResolvedPersona {
                    content: render(content, name, model),
                    source: PersonaSource::Custom,
                })
            }
            PersonaChoice::Custom(_) => Ok(generated(name, model)),
        }
    }
}

fn render(template: &str, name: &InstanceName, model: &str) -> String {
    template
        .replace("{{name}}", name.as_str())
        .replace("{{model}}", model)
}

fn generated(name: &InstanceName, model: &str) -> ResolvedPersona {
    ResolvedPersona {
        content: default_persona(name, model),
        source: PersonaSource::Generated,
    }
}

/// Default persona document for an instance
pub fn default_persona(name: &InstanceName, model: &str) -> String {
    format!(
        "# {name}\n\
         \n\
         You are {name}, a personal AI assistant running on `{model}`.\n\
         \n\
         ## Guidelines\n\
         \n\
         - Be helpful, accurate and concise.\n\
         - Ask for clarification when a request is ambiguous.\n\
         - Keep notes in your memory directory when something is worth remembering.\n\
         - Stay inside your workspace unless told otherwise.\n"
    )
}
