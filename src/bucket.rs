//! Bucket management - local manifest repositories.
//!
//! A bucket is a directory below `<root>/buckets`. Manifests live either in
//! its `bucket/` subdirectory (the standard layout) or directly at the top
//! of a flat repository.

use crate::config::Config;
use crate::error::{LadleError, Result};
use crate::manifest::{App, parse_app_identifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    name: String,
    root_dir: PathBuf,
}

impl Bucket {
    /// Bucket rooted at `root_dir`; the name is the directory name.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let name = root_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { name, root_dir }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn exists(&self) -> bool {
        self.root_dir.is_dir()
    }

    /// Directory holding the `.json` manifests
    pub fn manifest_dir(&self) -> PathBuf {
        let nested = self.root_dir.join("bucket");
        if nested.is_dir() { nested } else { self.root_dir.clone() }
    }

    /// Look up an app by name without reading its manifest.
    pub fn find_app(&self, name: &str) -> Option<App> {
        let manifest = self.manifest_dir().join(format!("{}.json", name));
        manifest
            .is_file()
            .then(|| App::new(name, Some(&self.name), manifest))
    }

    /// All apps in this bucket, unloaded.
    pub fn available_apps(&self) -> Result<Vec<App>> {
        let manifest_dir = self.manifest_dir();
        let mut apps = Vec::new();

        for entry in fs::read_dir(&manifest_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();

            // Flat buckets also carry READMEs, licenses and the like
            let Some(name) = file_name.strip_suffix(".json") else {
                continue;
            };
            if !entry.file_type()?.is_file() {
                continue;
            }

            apps.push(App::new(name, Some(&self.name), entry.path()));
        }

        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    /// Delete the bucket. Apps installed from it stay installed.
    pub fn remove(&self) -> Result<()> {
        if !self.exists() {
            return Err(LadleError::BucketNotFound(self.name.clone()));
        }
        fs::remove_dir_all(&self.root_dir)?;
        Ok(())
    }
}

/// Bucket by name. It doesn't have to exist.
pub fn get_bucket(config: &Config, name: &str) -> Bucket {
    Bucket::new(config.buckets_dir().join(name))
}

/// All bucket directories below `<root>/buckets`, sorted by name.
pub fn local_buckets(config: &Config) -> Result<Vec<Bucket>> {
    let buckets_dir = config.buckets_dir();
    if !buckets_dir.exists() {
        return Ok(vec![]);
    }

    let mut buckets = Vec::new();
    for entry in fs::read_dir(&buckets_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') {
            continue;
        }
        // Follows links, buckets may be junctions
        if !entry.path().is_dir() {
            continue;
        }

        buckets.push(Bucket::new(entry.path()));
    }

    buckets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(buckets)
}

/// Find an app by identifier. With a bucket prefix only that bucket is
/// searched, otherwise every local bucket in name order.
pub fn find_available_app(config: &Config, identifier: &str) -> Result<Option<App>> {
    let id = parse_app_identifier(identifier);

    if let Some(bucket) = id.bucket {
        return Ok(get_bucket(config, &bucket).find_app(&id.name));
    }

    for bucket in local_buckets(config)? {
        if let Some(app) = bucket.find_app(&id.name) {
            return Ok(Some(app));
        }
    }

    Ok(None)
}

/// Every app in every local bucket, unloaded
pub fn all_available_apps(config: &Config) -> Result<Vec<App>> {
    let mut apps = Vec::new();
    for bucket in local_buckets(config)? {
        apps.extend(bucket.available_apps()?);
    }
    Ok(apps)
}

/// A bucket from the registry shipped with scoop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownBucket {
    pub name: String,
    pub url: String,
}

/// Read the registry of well-known buckets (`buckets.json`).
pub fn known_buckets(config: &Config) -> Result<Vec<KnownBucket>> {
    let path = config.known_buckets_file();
    let contents = fs::read(&path).map_err(|e| {
        LadleError::Other(anyhow::anyhow!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))
    })?;

    let registry: BTreeMap<String, String> =
        serde_json::from_slice(&contents).map_err(|source| LadleError::Parse {
            path: path.clone(),
            source,
        })?;

    Ok(registry
        .into_iter()
        .map(|(name, url)| KnownBucket { name, url })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());
        let main = config.buckets_dir().join("main").join("bucket");
        fs::create_dir_all(&main).unwrap();
        fs::write(main.join("git.json"), "{}").unwrap();
        fs::write(main.join("7zip.json"), "{}").unwrap();

        let flat = config.buckets_dir().join("flat");
        fs::create_dir_all(&flat).unwrap();
        fs::write(flat.join("tool.json"), "{}").unwrap();
        fs::write(flat.join("git.json"), "{}").unwrap();
        fs::write(flat.join("README.md"), "# flat").unwrap();
        (dir, config)
    }

    #[test]
    fn test_manifest_dir_layouts() {
        let (_dir, config) = setup();
        assert!(get_bucket(&config, "main").manifest_dir().ends_with("main/bucket"));
        assert!(get_bucket(&config, "flat").manifest_dir().ends_with("flat"));
    }

    #[test]
    fn test_available_apps_skips_non_json() {
        let (_dir, config) = setup();
        let apps = get_bucket(&config, "flat").available_apps().unwrap();
        let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["git", "tool"]);
        assert_eq!(apps[0].bucket.as_deref(), Some("flat"));
    }

    #[test]
    fn test_find_available_app() {
        let (_dir, config) = setup();

        // First bucket by name wins
        let app = find_available_app(&config, "git").unwrap().unwrap();
        assert_eq!(app.bucket.as_deref(), Some("flat"));

        let app = find_available_app(&config, "main/git@2.0").unwrap().unwrap();
        assert_eq!(app.bucket.as_deref(), Some("main"));
        assert_eq!(app.name, "git");

        assert!(find_available_app(&config, "main/tool").unwrap().is_none());
        assert!(find_available_app(&config, "missing").unwrap().is_none());
    }

    #[test]
    fn test_known_buckets() {
        let (_dir, config) = setup();
        let file = config.known_buckets_file();
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(
            &file,
            r#"{"main": "https://github.com/ScoopInstaller/Main", "extras": "https://github.com/ScoopInstaller/Extras"}"#,
        )
        .unwrap();

        let known = known_buckets(&config).unwrap();
        assert_eq!(known.len(), 2);
        assert_eq!(known[0].name, "extras");
    }

    #[test]
    fn test_remove_bucket() {
        let (_dir, config) = setup();
        let bucket = get_bucket(&config, "flat");
        bucket.remove().unwrap();
        assert!(!bucket.exists());
        assert!(matches!(bucket.remove(), Err(LadleError::BucketNotFound(_))));
    }
}
