//! Download cache naming and lookup.
//!
//! Cached artifacts live flat in `<root>/cache`, named
//! `<app>#<version>#<url>` with every character outside `[A-Za-z0-9_.-]`
//! replaced by `_`. The name is a pure function of its inputs, so a cached
//! file can be found again without any index.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Cache file name for one downloadable.
pub fn cache_path(app: &str, version: &str, url: &str) -> String {
    format!("{}#{}#{}", sanitize(app), sanitize(version), sanitize(url))
}

/// Find cached files for `app`, optionally restricted to one version.
pub fn lookup_cache(cache_dir: &Path, app: &str, version: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut prefix = sanitize(app);
    if let Some(version) = version.filter(|v| !v.is_empty()) {
        prefix.push('#');
        prefix.push_str(&sanitize(version));
    }
    // `git` must not match `git-lfs#...`
    let prefix_with_separator = format!("{}#", prefix);

    if !cache_dir.exists() {
        return Ok(vec![]);
    }

    let mut matches = Vec::new();
    for entry in fs::read_dir(cache_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == prefix || name.starts_with(&prefix_with_separator) {
            matches.push(entry.path());
        }
    }

    matches.sort();
    debug!(app, count = matches.len(), "cache lookup");
    Ok(matches)
}

/// Delete cached files for `app`, returning what was removed.
pub fn remove_cached(cache_dir: &Path, app: &str, version: Option<&str>) -> Result<Vec<PathBuf>> {
    let files = lookup_cache(cache_dir, app, version)?;
    for file in &files {
        fs::remove_file(file)?;
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_path_sanitizes_every_component() {
        assert_eq!(
            cache_path("git", "2.43.0", "https://github.com/git.7z.exe"),
            "git#2.43.0#https___github.com_git.7z.exe"
        );
        assert_eq!(cache_path("a b", "1/2", "x"), "a_b#1_2#x");
    }

    #[test]
    fn test_cache_path_is_deterministic() {
        let url = "https://example.com/dl?file=a&v=1";
        assert_eq!(cache_path("app", "1.0", url), cache_path("app", "1.0", url));
    }

    #[test]
    fn test_sanitize_non_ascii() {
        assert_eq!(sanitize("café"), "caf_");
    }

    #[test]
    fn test_lookup_cache() {
        let dir = TempDir::new().unwrap();
        for name in [
            cache_path("git", "1.0", "https://a/x.zip"),
            cache_path("git", "2.0", "https://a/y.zip"),
            cache_path("git-lfs", "1.0", "https://a/z.zip"),
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(lookup_cache(dir.path(), "git", None).unwrap().len(), 2);
        assert_eq!(lookup_cache(dir.path(), "git", Some("2.0")).unwrap().len(), 1);
        assert!(lookup_cache(dir.path(), "nope", None).unwrap().is_empty());

        let removed = remove_cached(dir.path(), "git", Some("1.0")).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(lookup_cache(dir.path(), "git", None).unwrap().len(), 1);
    }
}
