//! High-level PackageManager API - install, uninstall and friends.
//!
//! This module ties the lower layers (buckets, manifests, download,
//! extraction, shims, links, environment) into the app lifecycle:
//!
//! ```text
//! not installed -> installing -> installed(version) -> uninstalling -> not installed
//! ```
//!
//! with `hold` pinning an installed app against implicit upgrades.
//!
//! # Quick Start
//!
//! ```no_run
//! use ladle::PackageManager;
//! use ladle::platform::detect_architecture;
//!
//! #[tokio::main]
//! async fn main() -> ladle::Result<()> {
//!     let pm = PackageManager::new()?;
//!
//!     let result = pm.install("main/ripgrep", detect_architecture()).await?;
//!     println!("Installed {} {}", result.name, result.version);
//!
//!     for app in pm.outdated()? {
//!         println!("{} {} -> {}", app.name, app.installed, app.latest);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Steps and failures
//!
//! Install and uninstall run as ordered [`InstallStep`]/[`UninstallStep`]
//! lists. Any failure comes back as [`LadleError::Step`] naming the app and
//! the step; use [`LadleError::root`] to match on the underlying cause.
//! There is no rollback of the version directory, but if a step after the
//! environment update fails, the previous PATH and `env_set` values are
//! restored best-effort.
//!
//! # OS services
//!
//! Scripts, shortcuts and the persistent environment go through
//! [`ScriptRunner`], [`ShortcutCreator`] and [`EnvironmentStore`]. The
//! defaults use PowerShell; tests and other hosts swap them with the
//! `with_*` builders.

use crate::bucket::{self, Bucket, KnownBucket};
use crate::cache;
use crate::config::Config;
use crate::decoder::ManifestDecoder;
use crate::download::{self, DownloadEvent, DownloadOptions};
use crate::env::{EnvironmentStore, read_user_path};
use crate::error::{LadleError, Result};
use crate::extract::{self, Extraction, RequiredTool};
use crate::history;
use crate::installed::{self, InstalledApp, OutdatedApp};
use crate::link::{create_dir_link, force_remove_all, link_file};
use crate::manifest::{
    App, AppResolved, ArchitectureKey, DetailField, Installer, parse_app_identifier,
    substitute_variables,
};
use crate::platform::{PowerShell, ScriptRunner, ShortcutCreator, ShortcutLink};
use crate::receipt::InstallReceipt;
use crate::resolver::{self, Dependencies};
use crate::shim;
use futures::future::BoxFuture;
use indicatif::MultiProgress;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of an install operation
#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub name: String,
    pub version: String,
    pub bucket: Option<String>,
    pub architecture: ArchitectureKey,
    /// The version directory
    pub path: PathBuf,
    /// Shim names created
    pub shims: Vec<String>,
    /// Pinned because a specific version was requested
    pub held: bool,
    /// Artifacts served from the cache
    pub cache_hits: usize,
    /// Artifacts transferred
    pub downloaded: usize,
    /// Manifest notes to show the user
    pub notes: String,
    /// Time taken (milliseconds)
    pub time_ms: u64,
}

/// Result of an uninstall operation
#[derive(Debug, Clone, Serialize)]
pub struct UninstallResult {
    pub name: String,
    pub version: String,
    /// Shim files deleted
    pub removed_shims: usize,
    /// Time taken (milliseconds)
    pub time_ms: u64,
}

/// Result of a download-only run
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub name: String,
    pub version: String,
    pub cached: Vec<PathBuf>,
    pub downloaded: Vec<PathBuf>,
    /// `(url, error)` per failed item
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Resolve,
    CreateVersionDir,
    Download,
    Extract,
    PreInstall,
    Installer,
    WriteManifest,
    LinkCurrent,
    Shims,
    Environment,
    Shortcuts,
    Persist,
    Receipt,
    PostInstall,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstallStep::Resolve => "resolve manifest",
            InstallStep::CreateVersionDir => "create version directory",
            InstallStep::Download => "download",
            InstallStep::Extract => "extract",
            InstallStep::PreInstall => "pre_install",
            InstallStep::Installer => "installer",
            InstallStep::WriteManifest => "write manifest",
            InstallStep::LinkCurrent => "link current",
            InstallStep::Shims => "bin",
            InstallStep::Environment => "env_add_path/env_set",
            InstallStep::Shortcuts => "shortcuts",
            InstallStep::Persist => "persist",
            InstallStep::Receipt => "write install.json",
            InstallStep::PostInstall => "post_install",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallStep {
    Resolve,
    PreUninstall,
    Uninstaller,
    Environment,
    RemoveCurrent,
    Shims,
    Shortcuts,
    PostUninstall,
}

impl fmt::Display for UninstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UninstallStep::Resolve => "read installed manifest",
            UninstallStep::PreUninstall => "pre_uninstall",
            UninstallStep::Uninstaller => "uninstaller",
            UninstallStep::Environment => "env_add_path/env_set",
            UninstallStep::RemoveCurrent => "remove current",
            UninstallStep::Shims => "bin",
            UninstallStep::Shortcuts => "shortcuts",
            UninstallStep::PostUninstall => "post_uninstall",
        })
    }
}

/// Attach the app and step to an error, like `anyhow::Context`
trait StepContext<T> {
    fn step(self, app: &str, step: impl fmt::Display) -> Result<T>;
}

impl<T> StepContext<T> for Result<T> {
    fn step(self, app: &str, step: impl fmt::Display) -> Result<T> {
        self.map_err(|e| e.at_step(app, step))
    }
}

/// Variables substituted into scripts, installer arguments and env values
struct Variables(Vec<(&'static str, String)>);

impl Variables {
    fn with(&self, key: &'static str, value: impl Into<String>) -> Self {
        let mut vars = self.0.clone();
        vars.retain(|(k, _)| *k != key);
        vars.push((key, value.into()));
        Variables(vars)
    }

    fn apply(&self, value: &str) -> String {
        let pairs: Vec<(&str, &str)> = self.0.iter().map(|(k, v)| (*k, v.as_str())).collect();
        substitute_variables(value, &pairs)
    }
}

/// High-level package manager API
///
/// Holds the install root, one HTTP client reused for every download, and
/// the OS services.
///
/// # Examples
///
/// ```no_run
/// use ladle::{Config, PackageManager};
/// use ladle::env::MemoryEnvironment;
///
/// fn main() -> ladle::Result<()> {
///     let pm = PackageManager::with_config(Config::new("/tmp/scoop"))?
///         .with_environment(Box::new(MemoryEnvironment::new()));
///     for app in pm.list()? {
///         println!("{} ({})", app.name, app.architecture);
///     }
///     Ok(())
/// }
/// ```
pub struct PackageManager {
    config: Config,
    client: reqwest::Client,
    environment: Box<dyn EnvironmentStore>,
    scripts: Box<dyn ScriptRunner>,
    shortcuts: Box<dyn ShortcutCreator>,
    progress: bool,
}

impl PackageManager {
    /// Create a PackageManager configured from the environment.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::from_env()?)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("ladle/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            client,
            environment: default_environment(),
            scripts: Box::new(PowerShell::default()),
            shortcuts: Box::new(PowerShell::default()),
            progress: false,
        })
    }

    pub fn with_environment(mut self, environment: Box<dyn EnvironmentStore>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_scripts(mut self, scripts: Box<dyn ScriptRunner>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_shortcuts(mut self, shortcuts: Box<dyn ShortcutCreator>) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    /// Show progress bars for transfers
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Find an available app and load every field, honoring `@version` by
    /// searching the bucket's history. Returns the app and the raw manifest.
    pub fn resolve(&self, identifier: &str) -> Result<(App, Vec<u8>)> {
        let id = parse_app_identifier(identifier);
        let mut app = bucket::find_available_app(&self.config, identifier)?
            .ok_or_else(|| LadleError::AppNotFound(identifier.to_string()))?;

        let raw = match &id.version {
            Some(version) => history::manifest_for_version(&app, version)?.ok_or_else(|| {
                LadleError::NotAvailableInVersion {
                    app: app.name.clone(),
                    version: version.clone(),
                }
            })?,
            None => fs::read(app.manifest_path()).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    LadleError::ManifestNotFound(app.manifest_path().to_path_buf())
                }
                _ => LadleError::IoError(e),
            })?,
        };

        let path = app.manifest_path().to_path_buf();
        ManifestDecoder::new().load_from_reader(&raw[..], &path, &mut app, DetailField::ALL)?;
        Ok((app, raw))
    }

    /// Find an installed app, failing with [`LadleError::NotInstalled`].
    pub fn installed(&self, identifier: &str) -> Result<InstalledApp> {
        installed::find_installed_app(&self.config, identifier)?
            .ok_or_else(|| LadleError::NotInstalled(identifier.to_string()))
    }

    /// Install an app.
    ///
    /// `identifier` is `[bucket/]name[@version]`. Requesting a version
    /// installs that manifest from the bucket's history and holds the app.
    ///
    /// # Errors
    ///
    /// Every failure is a [`LadleError::Step`]. Notable root causes:
    /// - [`LadleError::AppNotFound`] / [`LadleError::NotAvailableInVersion`]
    /// - [`LadleError::AlreadyInstalled`] for the same version and architecture
    /// - [`LadleError::Held`] when a held app would change
    /// - [`LadleError::ChecksumMismatch`] and download failures
    pub fn install<'a>(
        &'a self,
        identifier: &'a str,
        arch: ArchitectureKey,
    ) -> BoxFuture<'a, Result<InstallResult>> {
        Box::pin(async move {
            let start = Instant::now();
            let id = parse_app_identifier(identifier);
            let label = id.name.clone();

            // Step 1: Resolve the manifest
            let (app, raw_manifest) = self.resolve(identifier).step(&label, InstallStep::Resolve)?;
            let name = app.name.clone();

            // Step 2: Deal with an existing installation
            if let Some(mut existing) = installed::find_installed_app(&self.config, &name)
                .step(&name, InstallStep::Resolve)?
            {
                existing
                    .load_details(&[DetailField::Version])
                    .step(&name, InstallStep::Resolve)?;

                if existing.version == app.version && existing.architecture == arch {
                    return Err(LadleError::AlreadyInstalled {
                        app: name.clone(),
                        version: app.version.clone(),
                    }
                    .at_step(&name, InstallStep::Resolve));
                }
                if existing.hold {
                    return Err(LadleError::Held(name.clone()).at_step(&name, InstallStep::Resolve));
                }

                info!(app = %name, from = %existing.version, to = %app.version, "replacing installed version");
                self.uninstall(&existing, existing.architecture)?;
            }

            let resolved = app.for_arch(arch);
            let version_dir = self.config.app_dir(&name).join(&app.version);
            let current = self.config.current_dir(&name);
            let variables = self.variables(&resolved, &version_dir);

            // Step 3: Create the version directory
            fs::create_dir_all(&version_dir)
                .map_err(LadleError::from)
                .step(&name, InstallStep::CreateVersionDir)?;

            // Step 4: Download and extract, one artifact at a time
            let (cache_hits, downloaded) = self.download_and_extract(&resolved, &version_dir).await?;

            // Step 5: Scripts and installer
            self.run_scripts(&resolved.pre_install, &version_dir, &variables)
                .step(&name, InstallStep::PreInstall)?;
            if let Some(installer) = &resolved.installer {
                let variables = variables
                    .with("$fname", installer.file.clone())
                    .with("$manifest", app.manifest_path().display().to_string());
                self.invoke_installer(installer, &version_dir, &variables, true)
                    .step(&name, InstallStep::Installer)?;
            }

            // Step 6: Keep the manifest and repoint current
            fs::write(version_dir.join("manifest.json"), &raw_manifest)
                .map_err(LadleError::from)
                .step(&name, InstallStep::WriteManifest)?;
            create_dir_link(&version_dir, &current).step(&name, InstallStep::LinkCurrent)?;

            // Step 7: Shims
            let mut shims = Vec::new();
            for bin in &resolved.bin {
                shim::create_shim(&self.config, &current.join(&bin.name), bin)
                    .step(&name, InstallStep::Shims)?;
                shims.push(bin.shim_name());
            }

            // Step 8: Environment, restored if anything after it fails
            let previous = self
                .update_environment(&app, &current, &variables)
                .step(&name, InstallStep::Environment)?;

            let held = id.version.is_some();
            let finished = self.finish_install(&resolved, &version_dir, &current, &variables, held);
            if let Err(e) = finished {
                if !previous.is_empty()
                    && let Err(restore) = self.environment.set_many(&previous)
                {
                    warn!(app = %name, error = %restore, "failed to restore environment");
                }
                return Err(e);
            }

            info!(app = %name, version = %app.version, "installed");
            Ok(InstallResult {
                name: name.clone(),
                version: app.version.clone(),
                bucket: app.bucket.clone(),
                architecture: arch,
                path: version_dir,
                shims,
                held,
                cache_hits,
                downloaded,
                notes: app.notes.clone(),
                time_ms: start.elapsed().as_millis() as u64,
            })
        })
    }

    /// Steps after the environment update: shortcuts, persist, receipt and
    /// post_install.
    fn finish_install(
        &self,
        resolved: &AppResolved<'_>,
        version_dir: &Path,
        current: &Path,
        variables: &Variables,
        held: bool,
    ) -> Result<()> {
        let name = &resolved.name;

        // Step 9: Shortcuts
        let shortcut_vars = variables.with_dir(current);
        for shortcut in &resolved.shortcuts {
            let relative = shortcut.name.replace('\\', "/");
            let relative = Path::new(&relative);
            let alias = relative
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let mut dir = self.config.shortcut_dir();
            if let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) {
                dir = dir.join(parent);
            }

            let link = ShortcutLink {
                link: dir.join(format!("{}.lnk", alias)),
                target: current.join(&shortcut.target),
                args: shortcut_vars.apply(&shortcut.args),
                icon: (!shortcut.icon.is_empty()).then(|| current.join(&shortcut.icon)),
                working_dir: current.to_path_buf(),
            };
            self.shortcuts.create(&link).step(name, InstallStep::Shortcuts)?;
        }

        // Step 10: Persist
        let persist_root = self.config.persist_dir().join(name);
        for entry in &resolved.persist {
            let source = version_dir.join(&entry.dir);
            let target = persist_root.join(entry.target_name());
            persist_entry(&source, &target).step(name, InstallStep::Persist)?;
        }

        // Step 11: Receipt
        InstallReceipt::new(resolved.bucket_name(), resolved.arch, held)
            .write(version_dir)
            .step(name, InstallStep::Receipt)?;

        // Step 12: post_install
        self.run_scripts(&resolved.post_install, version_dir, variables)
            .step(name, InstallStep::PostInstall)?;

        Ok(())
    }

    async fn download_and_extract(
        &self,
        resolved: &AppResolved<'_>,
        version_dir: &Path,
    ) -> Result<(usize, usize)> {
        let name = &resolved.name;
        let options = DownloadOptions {
            verify_hashes: true,
            overwrite_cache: false,
            progress: self.progress.then(MultiProgress::new),
        };

        let cache_dir = self.config.cache_dir();
        let mut events = download::download(
            &self.client,
            resolved,
            &cache_dir,
            self.config.download_concurrency,
            options,
        )
        .await
        .step(name, InstallStep::Download)?;

        let mut cache_hits = 0;
        let mut downloaded = 0;
        while let Some(event) = events.recv().await {
            let file = match event {
                DownloadEvent::Started(_) => continue,
                DownloadEvent::CacheHit(file) => {
                    cache_hits += 1;
                    file
                }
                DownloadEvent::Finished(file) => {
                    downloaded += 1;
                    file
                }
                DownloadEvent::Failed { error, .. } => {
                    return Err(error.at_step(name, InstallStep::Download));
                }
            };

            // Extraction may install helper tools, so it never overlaps
            let strategy = extract::select_strategy(
                &file.item,
                resolved.innosetup,
                self.locate("7z").is_some(),
            );
            let tool = match strategy.required_tool() {
                Some(required) => Some(
                    self.ensure_executable(required, resolved.arch)
                        .await
                        .step(name, InstallStep::Extract)?,
                ),
                None => None,
            };

            let job = Extraction {
                source: &file.path,
                version_dir,
                item: &file.item,
            };
            extract::extract(strategy, tool.as_deref(), &job).step(name, InstallStep::Extract)?;
        }

        debug!(app = %name, cache_hits, downloaded, "artifacts ready");
        Ok((cache_hits, downloaded))
    }

    /// Find `executable` on PATH or in the shim directory.
    fn locate(&self, executable: &str) -> Option<PathBuf> {
        let shims = self.config.shims_dir();
        which::which(executable)
            .or_else(|_| which::which_in(executable, Some(&shims), &shims))
            .ok()
    }

    /// Locate a helper tool, installing its app when it's missing.
    async fn ensure_executable(&self, tool: RequiredTool, arch: ArchitectureKey) -> Result<PathBuf> {
        if let Some(path) = self.locate(tool.executable) {
            return Ok(path);
        }

        info!(tool = tool.executable, app = tool.app, "installing helper");
        match self.install(tool.app, arch).await {
            Ok(_) => {}
            Err(e) if matches!(e.root(), LadleError::AlreadyInstalled { .. }) => {}
            Err(e) => return Err(e),
        }

        self.locate(tool.executable)
            .ok_or_else(|| LadleError::ToolMissing(tool.executable.to_string()))
    }

    fn variables(&self, resolved: &AppResolved<'_>, version_dir: &Path) -> Variables {
        let persist_dir = self.config.persist_dir().join(&resolved.name);
        Variables(vec![
            ("$dir", version_dir.display().to_string()),
            ("$original_dir", version_dir.display().to_string()),
            ("$persist_dir", persist_dir.display().to_string()),
            ("$version", resolved.version.clone()),
            ("$app", resolved.name.clone()),
            ("$architecture", resolved.arch.as_str().to_string()),
            ("$bucketsdir", self.config.buckets_dir().display().to_string()),
            ("$cachedir", self.config.cache_dir().display().to_string()),
            ("$scoopdir", self.config.root().display().to_string()),
        ])
    }

    fn run_scripts(&self, lines: &[String], dir: &Path, variables: &Variables) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let script = variables.apply(&lines.join("\n"));
        let working_dir = if dir.is_dir() { dir } else { self.config.root() };
        self.scripts.run_script(&script, working_dir)
    }

    /// Run an installer or uninstaller directive. `cleanup` removes the
    /// file afterwards unless `keep` is set.
    fn invoke_installer(
        &self,
        installer: &Installer,
        dir: &Path,
        variables: &Variables,
        cleanup: bool,
    ) -> Result<()> {
        if !installer.script.is_empty() {
            return self.run_scripts(&installer.script, dir, variables);
        }
        if installer.file.is_empty() {
            return Ok(());
        }

        let program = dir.join(&installer.file);
        let args: Vec<String> = installer.args.iter().map(|a| variables.apply(a)).collect();
        self.scripts.run_program(&program, &args, dir)?;

        if cleanup && !installer.keep {
            match fs::remove_file(&program) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Prepend `env_add_path` and write `env_set`. Returns the values that
    /// were replaced, for restoring.
    fn update_environment(
        &self,
        app: &App,
        current: &Path,
        variables: &Variables,
    ) -> Result<Vec<(String, String)>> {
        if app.env_add_path.is_empty() && app.env_set.is_empty() {
            return Ok(vec![]);
        }

        let mut previous = Vec::new();
        let mut updates = Vec::new();

        if !app.env_add_path.is_empty() {
            let (key, mut path) = read_user_path(self.environment.as_ref())?;
            previous.push((key.clone(), path.to_string()));
            path.prepend(&path_entries(app, current));
            updates.push((key, path.to_string()));
        }

        let env_vars = variables.with_dir(current);
        for var in &app.env_set {
            let (key, old) = self
                .environment
                .get(&var.key)?
                .unwrap_or_else(|| (var.key.clone(), String::new()));
            previous.push((key.clone(), old));
            updates.push((key, env_vars.apply(&var.value)));
        }

        debug!(app = %app.name, keys = updates.len(), "updating environment");
        self.environment.set_many(&updates)?;
        Ok(previous)
    }

    /// Uninstall an app, leaving `apps/<name>` itself in place (see
    /// [`PackageManager::purge_app_dir`]).
    ///
    /// The version directory `current` points at is removed. Persisted data
    /// survives because persist links are deleted as links.
    pub fn uninstall(&self, installed: &InstalledApp, arch: ArchitectureKey) -> Result<UninstallResult> {
        let start = Instant::now();
        let name = installed.name.clone();

        let mut app = installed.app.clone();
        app.load_details(DetailField::ALL)
            .step(&name, UninstallStep::Resolve)?;
        let resolved = app.for_arch(arch);

        let current = self.config.current_dir(&name);
        let version_dir = current_target(&current)
            .unwrap_or_else(|| self.config.app_dir(&name).join(&app.version));
        let variables = self.variables(&resolved, &version_dir);

        // Step 1: pre_uninstall
        self.run_scripts(&app.pre_uninstall, &version_dir, &variables)
            .step(&name, UninstallStep::PreUninstall)?;

        // Step 2: Uninstaller
        if let Some(uninstaller) = &resolved.uninstaller {
            self.invoke_installer(uninstaller, &version_dir, &variables, false)
                .step(&name, UninstallStep::Uninstaller)?;
        }

        // Step 3: Environment
        self.clear_environment(&app, &current)
            .step(&name, UninstallStep::Environment)?;

        // Step 4: Remove the version directory and the link to it
        force_remove_all(&version_dir).step(&name, UninstallStep::RemoveCurrent)?;
        force_remove_all(&current).step(&name, UninstallStep::RemoveCurrent)?;

        // Step 5: Shims
        let removed = shim::remove_shims(&self.config, &resolved.bin).step(&name, UninstallStep::Shims)?;

        // Step 6: Shortcuts
        self.remove_shortcuts(&resolved)
            .step(&name, UninstallStep::Shortcuts)?;

        // Step 7: post_uninstall
        self.run_scripts(&app.post_uninstall, self.config.root(), &variables)
            .step(&name, UninstallStep::PostUninstall)?;

        info!(app = %name, version = %app.version, "uninstalled");
        Ok(UninstallResult {
            name,
            version: app.version.clone(),
            removed_shims: removed.len(),
            time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn clear_environment(&self, app: &App, current: &Path) -> Result<()> {
        let mut updates: Vec<(String, String)> = app
            .env_set
            .iter()
            .map(|var| (var.key.clone(), String::new()))
            .collect();

        if !app.env_add_path.is_empty() {
            let (key, mut path) = read_user_path(self.environment.as_ref())?;
            path.remove(&path_entries(app, current));
            updates.push((key, path.to_string()));
        }

        self.environment.set_many(&updates)
    }

    fn remove_shortcuts(&self, resolved: &AppResolved<'_>) -> Result<()> {
        let shortcut_dir = self.config.shortcut_dir();
        for shortcut in &resolved.shortcuts {
            let relative = shortcut.name.replace('\\', "/");
            let relative = Path::new(&relative);

            // A subdirectory belongs to the app and goes as a whole
            let path = match relative.components().next() {
                Some(first) if relative.components().count() > 1 => shortcut_dir.join(first),
                _ => shortcut_dir.join(format!("{}.lnk", relative.display())),
            };

            if path.is_dir() {
                force_remove_all(&path)?;
            } else if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Delete `apps/<name>` entirely, including older versions.
    pub fn purge_app_dir(&self, name: &str) -> Result<()> {
        force_remove_all(&self.config.app_dir(name))
    }

    /// Uninstall by identifier and purge the app directory.
    pub fn remove(&self, identifier: &str) -> Result<UninstallResult> {
        let installed = self.installed(identifier)?;
        let result = self.uninstall(&installed, installed.architecture)?;
        self.purge_app_dir(&installed.name)?;
        Ok(result)
    }

    pub fn hold(&self, identifier: &str) -> Result<()> {
        self.set_hold(identifier, true)
    }

    pub fn unhold(&self, identifier: &str) -> Result<()> {
        self.set_hold(identifier, false)
    }

    fn set_hold(&self, identifier: &str, hold: bool) -> Result<()> {
        let installed = self.installed(identifier)?;
        InstallReceipt::set_hold(&self.config.current_dir(&installed.name), hold)?;
        debug!(app = %installed.name, hold, "updated hold");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<InstalledApp>> {
        installed::installed_apps(&self.config)
    }

    pub fn outdated(&self) -> Result<Vec<OutdatedApp>> {
        installed::outdated_apps(&self.config)
    }

    /// Download (or verify cached) artifacts without installing.
    pub async fn download(
        &self,
        identifier: &str,
        arch: ArchitectureKey,
        overwrite_cache: bool,
    ) -> Result<DownloadReport> {
        let (app, _) = self.resolve(identifier)?;
        let resolved = app.for_arch(arch);

        let options = DownloadOptions {
            verify_hashes: true,
            overwrite_cache,
            progress: self.progress.then(MultiProgress::new),
        };
        let mut events = download::download(
            &self.client,
            &resolved,
            &self.config.cache_dir(),
            self.config.download_concurrency,
            options,
        )
        .await?;

        let mut report = DownloadReport {
            name: app.name.clone(),
            version: app.version.clone(),
            ..Default::default()
        };
        while let Some(event) = events.recv().await {
            match event {
                DownloadEvent::Started(_) => {}
                DownloadEvent::CacheHit(file) => report.cached.push(file.path),
                DownloadEvent::Finished(file) => report.downloaded.push(file.path),
                DownloadEvent::Failed { item, error } => {
                    report.failed.push((item.url, error.to_string()))
                }
            }
        }
        Ok(report)
    }

    /// Forward dependency tree of an available app.
    pub fn dependencies(&self, identifier: &str) -> Result<Dependencies> {
        let (app, _) = self.resolve(identifier)?;
        resolver::dependency_tree(&self.config, &app)
    }

    /// Apps in local buckets that depend on `identifier`, recursively.
    pub fn reverse_dependencies(&self, identifier: &str) -> Result<Dependencies> {
        let (target, _) = self.resolve(identifier)?;
        let mut all = bucket::all_available_apps(&self.config)?;
        resolver::preload_dependencies(&mut all)?;
        resolver::reverse_dependency_tree(&all, &target)
    }

    /// Cached files for `app`, or the whole cache.
    pub fn cache_entries(&self, app: Option<&str>) -> Result<Vec<PathBuf>> {
        let cache_dir = self.config.cache_dir();
        if let Some(app) = app {
            return cache::lookup_cache(&cache_dir, app, None);
        }
        if !cache_dir.exists() {
            return Ok(vec![]);
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&cache_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                entries.push(entry.path());
            }
        }
        entries.sort();
        Ok(entries)
    }

    pub fn cache_remove(&self, app: &str) -> Result<Vec<PathBuf>> {
        cache::remove_cached(&self.config.cache_dir(), app, None)
    }

    /// Versions of an app found in its bucket's history, newest first.
    pub fn versions(&self, identifier: &str, limit: usize) -> Result<Vec<String>> {
        let app = bucket::find_available_app(&self.config, identifier)?
            .ok_or_else(|| LadleError::AppNotFound(identifier.to_string()))?;
        history::available_versions(&app, limit)
    }

    pub fn buckets(&self) -> Result<Vec<Bucket>> {
        bucket::local_buckets(&self.config)
    }

    pub fn known_buckets(&self) -> Result<Vec<KnownBucket>> {
        bucket::known_buckets(&self.config)
    }

    pub fn remove_bucket(&self, name: &str) -> Result<()> {
        bucket::get_bucket(&self.config, name).remove()
    }
}

impl Variables {
    /// Copy with `$dir` pointed elsewhere, `$original_dir` stays
    fn with_dir(&self, dir: &Path) -> Variables {
        self.with("$dir", dir.display().to_string())
    }
}

#[cfg(windows)]
fn default_environment() -> Box<dyn EnvironmentStore> {
    Box::new(crate::env::PowerShellEnvironment::default())
}

#[cfg(not(windows))]
fn default_environment() -> Box<dyn EnvironmentStore> {
    Box::new(crate::env::MemoryEnvironment::new())
}

/// `env_add_path` entries as absolute paths below `current`
fn path_entries(app: &App, current: &Path) -> Vec<String> {
    app.env_add_path
        .iter()
        .map(|entry| match entry.as_str() {
            "" | "." => current.display().to_string(),
            entry => current.join(entry).display().to_string(),
        })
        .collect()
}

/// Where `current` points, if it is a link
fn current_target(current: &Path) -> Option<PathBuf> {
    let target = fs::read_link(current).ok()?;
    if target.is_absolute() {
        Some(target)
    } else {
        current.parent().map(|parent| parent.join(target))
    }
}

/// Move or link one persisted entry. Existing persisted data wins over the
/// freshly extracted copy, which is renamed to `<source>.original`.
fn persist_entry(source: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        if source.exists() {
            fs::rename(source, format!("{}.original", source.display()))?;
        }
    } else if source.exists() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(source, target)?;
    } else {
        fs::create_dir_all(target)?;
    }

    if target.is_dir() {
        create_dir_link(target, source)
    } else {
        link_file(target, source)
    }
}

impl Default for PackageManager {
    fn default() -> Self {
        Self::new().expect("Failed to create PackageManager")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_step_display() {
        let err = LadleError::Held("git".into()).at_step("git", InstallStep::Resolve);
        assert_eq!(
            err.to_string(),
            "git: resolve manifest failed: git is held and won't be changed"
        );
        assert!(matches!(err.root(), LadleError::Held(_)));
    }

    #[test]
    fn test_variables_replace_keys() {
        let vars = Variables(vec![("$dir", "/a".into())]).with("$dir", "/b");
        assert_eq!(vars.apply("$dir/bin"), "/b/bin");
    }

    #[test]
    fn test_path_entries() {
        let mut app = App::new("tool", None, "tool.json");
        app.env_add_path = vec![".".into(), "bin".into()];
        let current = Path::new("/scoop/apps/tool/current");
        assert_eq!(
            path_entries(&app, current),
            vec![
                current.display().to_string(),
                current.join("bin").display().to_string()
            ]
        );
    }

    #[test]
    fn test_persist_existing_target_wins() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("1.0").join("data");
        let target = dir.path().join("persist").join("data");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("fresh.txt"), "fresh").unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("kept.txt"), "kept").unwrap();

        persist_entry(&source, &target).unwrap();

        assert!(source.join("kept.txt").exists());
        assert!(dir.path().join("1.0").join("data.original").join("fresh.txt").exists());
    }

    #[test]
    fn test_persist_moves_fresh_data() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("1.0").join("config.ini");
        let target = dir.path().join("persist").join("config.ini");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "a=1").unwrap();

        persist_entry(&source, &target).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "a=1");
        assert_eq!(fs::read_to_string(&source).unwrap(), "a=1");
    }

    #[test]
    fn test_persist_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("1.0").join("cache");
        let target = dir.path().join("persist").join("cache");
        fs::create_dir_all(dir.path().join("1.0")).unwrap();

        persist_entry(&source, &target).unwrap();
        assert!(target.is_dir());
        assert!(crate::link::is_link(&source));
    }
}
