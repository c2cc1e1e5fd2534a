//! Install root layout and runtime settings.
//!
//! Everything ladle touches lives below a single root directory:
//!
//! ```text
//! <root>/
//!   apps/<name>/<version>/    # extracted app versions
//!   apps/<name>/current       # directory link to the active version
//!   buckets/<bucket>/         # manifest repositories
//!   cache/                    # downloaded artifacts
//!   persist/<name>/           # data kept across upgrades
//!   shims/                    # launchers placed on PATH
//! ```
//!
//! The root comes from the `SCOOP` environment variable, falling back to
//! `~/scoop`, so ladle can operate on an existing scoop installation.

use crate::error::{LadleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Concurrent transfers per app when no override is given
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub root: PathBuf,
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,
    /// Launcher copied next to every `.shim` file
    #[serde(default)]
    pub shim_launcher: Option<PathBuf>,
    /// Start menu folder receiving shortcuts
    #[serde(default)]
    pub shortcut_dir: Option<PathBuf>,
}

fn default_concurrency() -> usize {
    DEFAULT_DOWNLOAD_CONCURRENCY
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            shim_launcher: None,
            shortcut_dir: None,
        }
    }

    /// Build the configuration from the environment.
    ///
    /// `SCOOP` selects the root, `LADLE_DOWNLOAD_CONCURRENCY` overrides the
    /// number of parallel transfers.
    pub fn from_env() -> Result<Self> {
        let root = match std::env::var_os("SCOOP") {
            Some(root) if !root.is_empty() => PathBuf::from(root),
            _ => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
                .join("scoop"),
        };

        let mut config = Self::new(root);
        if let Ok(value) = std::env::var("LADLE_DOWNLOAD_CONCURRENCY") {
            config.download_concurrency = value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    LadleError::Other(anyhow::anyhow!(
                        "Invalid LADLE_DOWNLOAD_CONCURRENCY: {}",
                        value
                    ))
                })?;
        }

        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.apps_dir().join(name)
    }

    pub fn current_dir(&self, name: &str) -> PathBuf {
        self.app_dir(name).join("current")
    }

    pub fn buckets_dir(&self) -> PathBuf {
        self.root.join("buckets")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn persist_dir(&self) -> PathBuf {
        self.root.join("persist")
    }

    pub fn shims_dir(&self) -> PathBuf {
        self.root.join("shims")
    }

    /// The scoop installation itself, which carries the bucket registry
    pub fn scoop_install_dir(&self) -> PathBuf {
        self.current_dir("scoop")
    }

    pub fn known_buckets_file(&self) -> PathBuf {
        self.scoop_install_dir().join("buckets.json")
    }

    pub fn shim_launcher(&self) -> PathBuf {
        self.shim_launcher.clone().unwrap_or_else(|| {
            self.scoop_install_dir()
                .join("supporting")
                .join("shims")
                .join("kiennq")
                .join("shim.exe")
        })
    }

    pub fn shortcut_dir(&self) -> PathBuf {
        if let Some(dir) = &self.shortcut_dir {
            return dir.clone();
        }

        match dirs::data_dir() {
            Some(roaming) if cfg!(windows) => roaming
                .join("Microsoft")
                .join("Windows")
                .join("Start Menu")
                .join("Programs")
                .join("Scoop Apps"),
            _ => self.root.join("shortcuts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let config = Config::new("/opt/scoop");
        assert_eq!(config.apps_dir(), PathBuf::from("/opt/scoop/apps"));
        assert_eq!(
            config.current_dir("git"),
            PathBuf::from("/opt/scoop/apps/git/current")
        );
        assert_eq!(config.cache_dir(), PathBuf::from("/opt/scoop/cache"));
        assert_eq!(
            config.known_buckets_file(),
            PathBuf::from("/opt/scoop/apps/scoop/current/buckets.json")
        );
    }

    #[test]
    fn test_shim_launcher_override() {
        let mut config = Config::new("/opt/scoop");
        assert!(config.shim_launcher().ends_with("kiennq/shim.exe"));

        config.shim_launcher = Some(PathBuf::from("/tmp/shim.exe"));
        assert_eq!(config.shim_launcher(), PathBuf::from("/tmp/shim.exe"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: Config = serde_json::from_str(r#"{"root": "/x"}"#).unwrap();
        assert_eq!(config.download_concurrency, DEFAULT_DOWNLOAD_CONCURRENCY);
        assert!(config.shortcut_dir.is_none());
    }
}
