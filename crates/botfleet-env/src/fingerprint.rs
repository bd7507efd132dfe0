//! Dependency specification fingerprinting
//!
//! A fingerprint is the SHA256 of the raw bytes of the dependency
//! specification. It is a change-detection oracle only: the content is
//! hashed as-is, so any byte change (including whitespace) forces a rebuild.

use crate::error::EnvError;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Content fingerprint of a dependency specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Fingerprint {
    /// Fingerprint raw bytes
    pub fn of_bytes(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Parse a stored fingerprint. Surrounding whitespace is ignored;
    /// anything that is not 64 hex chars is rejected.
    pub fn parse(stored: &str) -> Option<Self> {
        let trimmed = stored.trim();
        if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Fingerprint(trimmed.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Full hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get short fingerprint (first 12 characters)
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

/// Fingerprint the dependency specification at `spec_path`
pub fn fingerprint_file(spec_path: &Path) -> Result<Fingerprint> {
    let content = std::fs::read(spec_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EnvError::DependencySpecMissing(spec_path.to_path_buf())
        } else {
            EnvError::Io(e)
        }
    })?;

    let fingerprint = Fingerprint::of_bytes(&content);
    debug!("Dependency spec fingerprint: {}", fingerprint.short());
    Ok(fingerprint)
}
