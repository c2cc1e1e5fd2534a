//! Installed app discovery - reading `<root>/apps`.

use crate::bucket;
use crate::config::Config;
use crate::decoder::ManifestDecoder;
use crate::error::Result;
use crate::manifest::{App, ArchitectureKey, DetailField, parse_app_identifier};
use crate::receipt::InstallReceipt;
use crate::version::compare_versions;
use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::ops::Deref;
use tracing::debug;

/// An app with an active `current` installation
#[derive(Debug, Clone)]
pub struct InstalledApp {
    /// Backed by `current/manifest.json`
    pub app: App,
    /// Pinned to the installed version
    pub hold: bool,
    /// Architecture used at install time, not necessarily the system's
    pub architecture: ArchitectureKey,
}

impl Deref for InstalledApp {
    type Target = App;

    fn deref(&self) -> &App {
        &self.app
    }
}

impl std::ops::DerefMut for InstalledApp {
    fn deref_mut(&mut self) -> &mut App {
        &mut self.app
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutdatedApp {
    pub name: String,
    pub bucket: Option<String>,
    pub installed: String,
    pub latest: String,
    /// The bucket no longer has a manifest for this app
    pub manifest_deleted: bool,
    pub hold: bool,
}

/// Directory name under `apps` for `name`. Exact matches win, otherwise
/// the name is matched ignoring case, as on Windows.
fn installed_dir_name(config: &Config, name: &str) -> Result<Option<String>> {
    if config.app_dir(name).is_dir() {
        return Ok(Some(name.to_string()));
    }

    let apps_dir = config.apps_dir();
    if !apps_dir.is_dir() {
        return Ok(None);
    }
    for entry in fs::read_dir(&apps_dir)? {
        let dir_name = entry?.file_name().to_string_lossy().to_string();
        if dir_name.eq_ignore_ascii_case(name) {
            return Ok(Some(dir_name));
        }
    }
    Ok(None)
}

/// Find an installed app. Bucket and version in the identifier are ignored
/// and the name is matched ignoring case; the result carries the name the
/// app was installed under.
pub fn find_installed_app(config: &Config, identifier: &str) -> Result<Option<InstalledApp>> {
    let requested = parse_app_identifier(identifier).name;
    let Some(name) = installed_dir_name(config, &requested)? else {
        return Ok(None);
    };
    let current = config.current_dir(&name);

    let Some(receipt) = InstallReceipt::read_optional(&current)? else {
        return Ok(None);
    };

    let bucket = Some(receipt.bucket.as_str()).filter(|b| !b.is_empty());
    Ok(Some(InstalledApp {
        app: App::new(&name, bucket, current.join("manifest.json")),
        hold: receipt.hold,
        architecture: receipt.architecture,
    }))
}

/// Every app with a `current/manifest.json`, sorted by name.
pub fn installed_apps(config: &Config) -> Result<Vec<InstalledApp>> {
    let apps_dir = config.apps_dir();
    if !apps_dir.exists() {
        return Ok(vec![]);
    }

    let mut apps = Vec::new();
    for entry in fs::read_dir(&apps_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') {
            continue;
        }
        if !entry.path().join("current").join("manifest.json").is_file() {
            continue;
        }

        if let Some(app) = find_installed_app(config, &name)? {
            apps.push(app);
        }
    }

    apps.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(apps)
}

/// Installed apps whose bucket has a different version, or none at all.
pub fn outdated_apps(config: &Config) -> Result<Vec<OutdatedApp>> {
    let mut decoder = ManifestDecoder::new();
    let mut outdated = Vec::new();

    for mut installed in installed_apps(config)? {
        installed.load_details_with(&mut decoder, &[DetailField::Version])?;

        // Headless installs are searched for in every bucket
        let identifier = match &installed.bucket {
            Some(bucket) => format!("{}/{}", bucket, installed.name),
            None => installed.name.clone(),
        };

        let latest = match bucket::find_available_app(config, &identifier)? {
            Some(mut available) => {
                available.load_details_with(&mut decoder, &[DetailField::Version])?;
                Some(available.version)
            }
            None => None,
        };

        let differs = match &latest {
            Some(latest) => compare_versions(&installed.version, latest) != Ordering::Equal,
            None => true,
        };
        debug!(app = %installed.name, installed = %installed.version, ?latest, "version check");

        if differs {
            outdated.push(OutdatedApp {
                name: installed.name.clone(),
                bucket: installed.bucket.clone(),
                installed: installed.version.clone(),
                manifest_deleted: latest.is_none(),
                latest: latest.unwrap_or_default(),
                hold: installed.hold,
            });
        }
    }

    Ok(outdated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn install_fake(config: &Config, name: &str, version: &str, bucket: &str) {
        let current = config.current_dir(name);
        fs::create_dir_all(&current).unwrap();
        fs::write(
            current.join("manifest.json"),
            format!(r#"{{"version": "{}"}}"#, version),
        )
        .unwrap();
        InstallReceipt::new(bucket, ArchitectureKey::X64, false)
            .write(&current)
            .unwrap();
    }

    fn bucket_manifest(config: &Config, bucket: &str, name: &str, version: &str) {
        let dir = config.buckets_dir().join(bucket).join("bucket");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{}.json", name)),
            format!(r#"{{"version": "{}"}}"#, version),
        )
        .unwrap();
    }

    fn config_in(dir: &Path) -> Config {
        Config::new(dir)
    }

    #[test]
    fn test_find_installed_app() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        install_fake(&config, "git", "2.0", "main");

        let app = find_installed_app(&config, "main/Git@1.0").unwrap().unwrap();
        assert_eq!(app.name, "git");
        assert_eq!(app.bucket.as_deref(), Some("main"));
        assert_eq!(app.architecture, ArchitectureKey::X64);

        assert!(find_installed_app(&config, "other").unwrap().is_none());
    }

    #[test]
    fn test_find_installed_app_keeps_installed_case() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        install_fake(&config, "NodeJS", "20.0", "main");

        for query in ["NodeJS", "nodejs", "main/NODEJS"] {
            let app = find_installed_app(&config, query).unwrap().unwrap();
            assert_eq!(app.name, "NodeJS", "{}", query);
            assert_eq!(app.manifest_path, config.current_dir("NodeJS").join("manifest.json"));
        }
        assert!(find_installed_app(&config, "node").unwrap().is_none());
    }

    #[test]
    fn test_outdated_apps() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());

        install_fake(&config, "current-app", "1.0", "main");
        install_fake(&config, "old-app", "1.0", "main");
        install_fake(&config, "gone-app", "1.0", "main");
        bucket_manifest(&config, "main", "current-app", "1.0");
        bucket_manifest(&config, "main", "old-app", "1.1");

        let outdated = outdated_apps(&config).unwrap();
        assert_eq!(outdated.len(), 2);

        let gone = outdated.iter().find(|o| o.name == "gone-app").unwrap();
        assert!(gone.manifest_deleted);

        let old = outdated.iter().find(|o| o.name == "old-app").unwrap();
        assert!(!old.manifest_deleted);
        assert_eq!(old.latest, "1.1");
        assert_eq!(old.installed, "1.0");
    }

    #[test]
    fn test_installed_apps_sorted() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        install_fake(&config, "zeta", "1.0", "main");
        install_fake(&config, "alpha", "1.0", "");
        fs::create_dir_all(config.app_dir("broken")).unwrap();

        let apps = installed_apps(&config).unwrap();
        let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(apps[0].bucket.is_none());
    }
}
