//! Deadline-bounded directory copy used for snapshots and restores

use crate::error::EnvError;
use crate::Result;
use std::path::Path;
use std::time::Instant;
use walkdir::WalkDir;

/// Recursively copy `src` into `dst` (which must not exist yet).
///
/// File permissions are preserved and symlinks are recreated rather than
/// followed, so interpreter links inside a runtime tree stay relative to
/// the host. The deadline is checked between entries.
pub fn copy_tree(src: &Path, dst: &Path, deadline: Option<Instant>) -> Result<u64> {
    if dst.exists() {
        return Err(EnvError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("copy destination already exists: {}", dst.display()),
        )));
    }

    let mut copied = 0u64;
    for entry in WalkDir::new(src).follow_links(false) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EnvError::CopyTimeout(src.to_path_buf()));
        }

        let entry = entry.map_err(|e| {
            EnvError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| EnvError::Io(std::io::Error::other(e.to_string())))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            let perms = entry.metadata().map_err(walk_err)?.permissions();
            std::fs::set_permissions(&target, perms)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            make_symlink(&link, &target)?;
        } else {
            // std::fs::copy carries permission bits over
            copied += std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(copied)
}

fn walk_err(e: walkdir::Error) -> EnvError {
    EnvError::Io(
        e.into_io_error()
            .unwrap_or_else(|| std::io::Error::other("metadata lookup failed")),
    )
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn make_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(link, target).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_tree_copies_nested_files() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("env");
        std::fs::create_dir_all(src.join("lib/site-packages")).unwrap();
        std::fs::write(src.join("lib/site-packages/pkg.py"), "x = 1").unwrap();
        std::fs::write(src.join("pyvenv.cfg"), "home = /usr/bin").unwrap();

        let dst = dir.path().join("backup");
        copy_tree(&src, &dst, None).unwrap();

        assert_eq!(
            std::fs::read_to_string(dst.join("lib/site-packages/pkg.py")).unwrap(),
            "x = 1"
        );
        assert!(dst.join("pyvenv.cfg").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_preserves_mode_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let src = dir.path().join("env");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        let entry = src.join("bin/nanobot");
        std::fs::write(&entry, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("nanobot", src.join("bin/agent")).unwrap();

        let dst = dir.path().join("copy");
        copy_tree(&src, &dst, None).unwrap();

        let mode = std::fs::metadata(dst.join("bin/nanobot"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            std::fs::read_link(dst.join("bin/agent")).unwrap(),
            Path::new("nanobot")
        );
    }

    #[test]
    fn test_copy_tree_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();

        assert!(copy_tree(&src, &dst, None).is_err());
    }

    #[test]
    fn test_copy_tree_expired_deadline() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("f"), "data").unwrap();

        let err = copy_tree(&src, &dir.path().join("b"), Some(Instant::now())).unwrap_err();
        assert!(matches!(err, EnvError::CopyTimeout(_)));
    }
}
