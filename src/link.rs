//! Filesystem links and forced removal.
//!
//! `current` and persisted directories are directory links: junctions on
//! Windows (no admin rights needed), symlinks elsewhere. Removal code has to
//! treat those links as leaves, deleting the link itself and never what it
//! points to, or uninstalling an app would wipe its persisted data.

use crate::error::Result;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Whether `path` is a symlink or junction (without following it)
pub fn is_link(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Remove a link without touching its target.
pub fn remove_link(path: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        // Directory links must go through RemoveDirectory
        fs::remove_dir(path).or_else(|_| fs::remove_file(path))
    }
    #[cfg(not(windows))]
    {
        fs::remove_file(path)
    }
}

#[cfg(windows)]
fn make_dir_link(target: &Path, link: &Path) -> io::Result<()> {
    junction::create(target, link)
}

#[cfg(unix)]
fn make_dir_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// Point `link` at the directory `target`, replacing an existing link.
///
/// On unix the new link is renamed over the old one, so readers never see
/// the path missing.
pub fn create_dir_link(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        let staging = link.with_extension("ladle-link");
        if is_link(&staging) {
            remove_link(&staging)?;
        }
        make_dir_link(target, &staging)?;
        fs::rename(&staging, link)?;
    }

    #[cfg(windows)]
    {
        if is_link(link) {
            remove_link(link)?;
        }
        make_dir_link(target, link)?;
    }

    debug!(link = %link.display(), target = %target.display(), "linked directory");
    Ok(())
}

/// Hard link a persisted file into the install directory.
pub fn link_file(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::hard_link(target, link)?;
    Ok(())
}

#[cfg(windows)]
fn clear_readonly(path: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(windows))]
fn clear_readonly(_path: &Path, _metadata: &fs::Metadata) -> io::Result<()> {
    Ok(())
}

/// Delete `path` recursively, clearing read-only flags on the way.
///
/// Links are removed as links and never descended into. A missing path is
/// not an error.
pub fn force_remove_all(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.file_type().is_symlink() {
        remove_link(path)?;
        return Ok(());
    }

    if !metadata.is_dir() {
        clear_readonly(path, &metadata)?;
        fs::remove_file(path)?;
        return Ok(());
    }

    for entry in WalkDir::new(path).follow_links(false).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        let entry_path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            remove_link(entry_path)?;
            continue;
        }

        if let Ok(metadata) = entry.metadata() {
            clear_readonly(entry_path, &metadata)?;
        }
        if file_type.is_dir() {
            fs::remove_dir(entry_path)?;
        } else {
            fs::remove_file(entry_path)?;
        }
    }

    Ok(())
}

/// Move every entry of `from` into `to`, then remove the empty `from`.
pub fn move_contents(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let destination = to.join(entry.file_name());
        if destination.exists() {
            force_remove_all(&destination)?;
        }
        fs::rename(entry.path(), destination)?;
    }
    fs::remove_dir(from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_repoint_dir_link() {
        let dir = TempDir::new().unwrap();
        let v1 = dir.path().join("1.0");
        let v2 = dir.path().join("2.0");
        fs::create_dir_all(&v1).unwrap();
        fs::create_dir_all(&v2).unwrap();
        fs::write(v2.join("marker"), "2").unwrap();

        let current = dir.path().join("current");
        create_dir_link(&v1, &current).unwrap();
        assert!(is_link(&current));

        create_dir_link(&v2, &current).unwrap();
        assert_eq!(fs::read_to_string(current.join("marker")).unwrap(), "2");
    }

    #[test]
    fn test_force_remove_all_keeps_link_targets() {
        let dir = TempDir::new().unwrap();
        let persisted = dir.path().join("persist");
        fs::create_dir_all(&persisted).unwrap();
        fs::write(persisted.join("settings.ini"), "keep me").unwrap();

        let install = dir.path().join("app");
        fs::create_dir_all(install.join("nested")).unwrap();
        fs::write(install.join("nested").join("file.txt"), "x").unwrap();
        create_dir_link(&persisted, &install.join("data")).unwrap();

        force_remove_all(&install).unwrap();
        assert!(!install.exists());
        assert_eq!(
            fs::read_to_string(persisted.join("settings.ini")).unwrap(),
            "keep me"
        );
    }

    #[test]
    fn test_force_remove_all_on_link_root() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("file"), "x").unwrap();
        let link = dir.path().join("current");
        create_dir_link(&target, &link).unwrap();

        force_remove_all(&link).unwrap();
        assert!(!is_link(&link));
        assert!(target.join("file").exists());
    }

    #[test]
    fn test_force_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        force_remove_all(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_move_contents() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("tool-1.0");
        fs::create_dir_all(from.join("bin")).unwrap();
        fs::write(from.join("bin").join("tool"), "x").unwrap();
        fs::write(from.join("README"), "r").unwrap();

        move_contents(&from, dir.path()).unwrap();
        assert!(!from.exists());
        assert!(dir.path().join("bin").join("tool").exists());
        assert!(dir.path().join("README").exists());
    }
}
