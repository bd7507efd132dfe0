//! Build collaborator seam
//!
//! The environment store treats the package build as a black box: given
//! the dependency specification and a target directory, produce a
//! self-contained runtime tree. [`CommandBuilder`] runs a list of
//! external command steps; tests plug in their own [`ArtifactBuilder`].

use crate::error::EnvError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Realizes a runtime artifact from a dependency specification
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Build into `target`. The directory does not exist when called.
    async fn build(&self, spec: &Path, target: &Path) -> Result<()>;
}

/// Runs external command steps in order, stopping at the first failure.
///
/// Each argument may contain `{spec}` and `{target}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBuilder {
    pub steps: Vec<Vec<String>>,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        CommandBuilder {
            steps: vec![
                vec![
                    "python3".to_string(),
                    "-m".to_string(),
                    "venv".to_string(),
                    "{target}".to_string(),
                ],
                vec![
                    "{target}/bin/pip".to_string(),
                    "install".to_string(),
                    "-r".to_string(),
                    "{spec}".to_string(),
                ],
            ],
        }
    }
}

impl CommandBuilder {
    pub fn new(steps: Vec<Vec<String>>) -> Self {
        CommandBuilder { steps }
    }

    fn render(arg: &str, spec: &Path, target: &Path) -> String {
        arg.replace("{spec}", &spec.to_string_lossy())
            .replace("{target}", &target.to_string_lossy())
    }
}

/// Keep the end of a long stderr; that is where build tools put the cause.
fn stderr_tail(stderr: &[u8]) -> String {
    const TAIL: usize = 2000;
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= TAIL {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

#[async_trait]
impl ArtifactBuilder for CommandBuilder {
    async fn build(&self, spec: &Path, target: &Path) -> Result<()> {
        if self.steps.is_empty() {
            return Err(EnvError::BuildFailed("no build steps configured".to_string()));
        }

        for (idx, step) in self.steps.iter().enumerate() {
            let Some((exe, args)) = step.split_first() else {
                return Err(EnvError::BuildFailed(format!("build step {} is empty", idx + 1)));
            };
            let exe = Self::render(exe, spec, target);
            let args: Vec<String> = args
                .iter()
                .map(|a| Self::render(a, spec, target))
                .collect();

            info!(step = idx + 1, "Running build step: {} {}", exe, args.join(" "));
            let output = Command::new(&exe)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| EnvError::BuildFailed(format!("could not run `{}`: {}", exe, e)))?;

            if !output.status.success() {
                return Err(EnvError::BuildFailed(format!(
                    "step {} `{}` exited with {}: {}",
                    idx + 1,
                    exe,
                    output.status.code().unwrap_or(-1),
                    stderr_tail(&output.stderr)
                )));
            }
            debug!(step = idx + 1, "build step succeeded");
        }

        Ok(())
    }
}
