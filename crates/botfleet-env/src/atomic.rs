//! Crash-safe file replacement

use crate::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomic write: write to a temp file in the same directory, fsync, then
/// rename over `path`. Readers see either the old or the new content.
///
/// If `path` already exists its permission bits are carried over.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;

    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions())?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
