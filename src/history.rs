//! Manifest history from the bucket's git repository.
//!
//! Buckets are git checkouts, so older versions of an app are found by
//! walking the commits that touched its manifest, newest first.

use crate::decoder::ManifestDecoder;
use crate::error::{LadleError, Result};
use crate::manifest::App;
use crate::version::compare_versions;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Walk up from `path` to the directory containing `.git`.
pub fn repo_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Repository root and the manifest path relative to it, with forward
/// slashes as git expects.
fn git_paths(manifest: &Path) -> Result<(PathBuf, String)> {
    let repo = repo_root(manifest).ok_or_else(|| LadleError::Tool {
        tool: "git".to_string(),
        message: format!("{} is not inside a git repository", manifest.display()),
    })?;
    let relative = manifest
        .strip_prefix(&repo)
        .map_err(|e| anyhow::anyhow!("Failed to relativize manifest path: {}", e))?
        .to_string_lossy()
        .replace('\\', "/");
    Ok((repo, relative))
}

fn git(repo: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| LadleError::Tool {
            tool: "git".to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LadleError::Tool {
            tool: "git".to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Manifest contents per commit, newest first. Each `git show` runs only
/// when the iterator reaches it.
pub fn manifest_revisions(app: &App) -> Result<impl Iterator<Item = Result<Vec<u8>>>> {
    let (repo, relative) = git_paths(app.manifest_path())?;
    let log = git(&repo, &["log", "--pretty=format:%h", "--", &relative])?;

    let commits: Vec<String> = String::from_utf8_lossy(&log)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    debug!(app = %app.name, commits = commits.len(), "manifest history");

    Ok(commits
        .into_iter()
        .map(move |commit| git(&repo, &["show", &format!("{}:{}", commit, relative)])))
}

/// Distinct versions found in history, newest first, at most `limit`.
pub fn available_versions(app: &App, limit: usize) -> Result<Vec<String>> {
    let mut decoder = ManifestDecoder::new();
    let mut versions: Vec<String> = Vec::new();

    for revision in manifest_revisions(app)? {
        if versions.len() >= limit {
            break;
        }
        let Some(version) = decoder.read_version(&revision?) else {
            continue;
        };
        // Several commits may touch the same version back to back
        if versions.last() != Some(&version) {
            versions.push(version);
        }
    }

    Ok(versions)
}

/// Raw manifest for `target` from history.
///
/// The walk stops as soon as an older version shows up, since history is
/// ordered newest first.
pub fn manifest_for_version(app: &App, target: &str) -> Result<Option<Vec<u8>>> {
    let mut decoder = ManifestDecoder::new();

    for revision in manifest_revisions(app)? {
        let data = revision?;
        let Some(version) = decoder.read_version(&data) else {
            continue;
        };

        match compare_versions(&version, target) {
            Ordering::Equal => return Ok(Some(data)),
            Ordering::Less => break,
            Ordering::Greater => {}
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn run(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=ladle", "-c", "user.email=ladle@localhost", "-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(repo)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    fn repo_with_versions(versions: &[&str]) -> (TempDir, App) {
        let dir = TempDir::new().unwrap();
        let repo = dir.path();
        let manifest_dir = repo.join("bucket");
        fs::create_dir_all(&manifest_dir).unwrap();
        run(repo, &["init", "-q"]);

        let manifest = manifest_dir.join("tool.json");
        for version in versions {
            fs::write(&manifest, format!(r#"{{"version": "{}"}}"#, version)).unwrap();
            run(repo, &["add", "."]);
            run(repo, &["commit", "-q", "-m", version]);
        }

        (dir, App::new("tool", Some("main"), manifest))
    }

    #[test]
    fn test_available_versions() {
        if !git_available() {
            return;
        }
        let (_dir, app) = repo_with_versions(&["1.0", "1.1", "2.0"]);
        assert_eq!(
            available_versions(&app, usize::MAX).unwrap(),
            vec!["2.0", "1.1", "1.0"]
        );
        assert_eq!(available_versions(&app, 1).unwrap(), vec!["2.0"]);
    }

    #[test]
    fn test_manifest_for_version() {
        if !git_available() {
            return;
        }
        let (_dir, app) = repo_with_versions(&["1.0", "1.1", "2.0"]);

        let data = manifest_for_version(&app, "1.1").unwrap().unwrap();
        assert!(String::from_utf8(data).unwrap().contains("1.1"));

        assert!(manifest_for_version(&app, "1.05").unwrap().is_none());
    }

    #[test]
    fn test_not_a_repository() {
        let dir = TempDir::new().unwrap();
        let app = App::new("tool", None, dir.path().join("tool.json"));
        if repo_root(dir.path()).is_some() {
            return;
        }
        assert!(manifest_revisions(&app).is_err());
    }
}
