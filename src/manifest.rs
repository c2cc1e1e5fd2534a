//! App manifest model.
//!
//! An [`App`] starts out as a name, a bucket and a manifest path. Nothing is
//! read from disk until [`App::load_details`] is called with the set of
//! [`DetailField`]s the caller needs; everything else stays at its default.
//!
//! # Architecture resolution
//!
//! Manifests can override parts of themselves per CPU architecture:
//!
//! ```text
//! {
//!   "version": "1.0",
//!   "bin": "tool.exe",
//!   "architecture": {
//!     "64bit": { "url": "https://example.com/tool-x64.zip", "hash": "..." },
//!     "32bit": { "url": "https://example.com/tool-x86.zip", "hash": "..." }
//!   }
//! }
//! ```
//!
//! [`App::for_arch`] merges root and architecture values into an
//! [`AppResolved`] without touching the `App` itself. `64bit` falls back to
//! `32bit` when it has no entry of its own; `arm64` never falls back.
//!
//! # Examples
//!
//! ```no_run
//! use ladle::manifest::{App, ArchitectureKey, DetailField};
//!
//! fn main() -> ladle::Result<()> {
//!     let mut app = App::new("git", Some("main"), "/scoop/buckets/main/bucket/git.json");
//!     app.load_details(&[DetailField::Version, DetailField::Url, DetailField::Architecture])?;
//!
//!     let resolved = app.for_arch(ArchitectureKey::X64);
//!     for item in &resolved.downloadables {
//!         println!("{} {}", item.url, item.hash);
//!     }
//!     Ok(())
//! }
//! ```

use crate::decoder::ManifestDecoder;
use crate::error::{LadleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Manifest keys that can be requested from [`App::load_details`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailField {
    Bin,
    Shortcuts,
    Url,
    Hash,
    Architecture,
    Description,
    Version,
    Notes,
    Depends,
    EnvSet,
    EnvAddPath,
    ExtractDir,
    ExtractTo,
    PostInstall,
    PreInstall,
    PreUninstall,
    PostUninstall,
    Installer,
    Uninstaller,
    InnoSetup,
    Persist,
}

impl DetailField {
    pub const ALL: &'static [DetailField] = &[
        DetailField::Bin,
        DetailField::Shortcuts,
        DetailField::Url,
        DetailField::Hash,
        DetailField::Architecture,
        DetailField::Description,
        DetailField::Version,
        DetailField::Notes,
        DetailField::Depends,
        DetailField::EnvSet,
        DetailField::EnvAddPath,
        DetailField::ExtractDir,
        DetailField::ExtractTo,
        DetailField::PostInstall,
        DetailField::PreInstall,
        DetailField::PreUninstall,
        DetailField::PostUninstall,
        DetailField::Installer,
        DetailField::Uninstaller,
        DetailField::InnoSetup,
        DetailField::Persist,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DetailField::Bin => "bin",
            DetailField::Shortcuts => "shortcuts",
            DetailField::Url => "url",
            DetailField::Hash => "hash",
            DetailField::Architecture => "architecture",
            DetailField::Description => "description",
            DetailField::Version => "version",
            DetailField::Notes => "notes",
            DetailField::Depends => "depends",
            DetailField::EnvSet => "env_set",
            DetailField::EnvAddPath => "env_add_path",
            DetailField::ExtractDir => "extract_dir",
            DetailField::ExtractTo => "extract_to",
            DetailField::PostInstall => "post_install",
            DetailField::PreInstall => "pre_install",
            DetailField::PreUninstall => "pre_uninstall",
            DetailField::PostUninstall => "post_uninstall",
            DetailField::Installer => "installer",
            DetailField::Uninstaller => "uninstaller",
            DetailField::InnoSetup => "innosetup",
            DetailField::Persist => "persist",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        DetailField::ALL.iter().copied().find(|f| f.key() == key)
    }
}

/// CPU architecture as named in manifests and `install.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArchitectureKey {
    #[serde(rename = "32bit")]
    X86,
    #[serde(rename = "64bit")]
    X64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl ArchitectureKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchitectureKey::X86 => "32bit",
            ArchitectureKey::X64 => "64bit",
            ArchitectureKey::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for ArchitectureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchitectureKey {
    type Err = LadleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "32bit" | "x86" => Ok(ArchitectureKey::X86),
            "64bit" | "x64" | "amd64" => Ok(ArchitectureKey::X64),
            "arm64" | "aarch64" => Ok(ArchitectureKey::Arm64),
            other => Err(anyhow::anyhow!("Unknown architecture: {}", other).into()),
        }
    }
}

/// An executable to expose through a shim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    /// Path relative to the install directory
    pub name: String,
    /// Shim name; defaults to the file stem of `name`
    pub alias: String,
    pub args: Vec<String>,
}

impl Bin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Name of the shim files generated for this bin
    pub fn shim_name(&self) -> String {
        if !self.alias.is_empty() {
            return self.alias.clone();
        }
        Path::new(&self.name.replace('\\', "/"))
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcut {
    /// Executable relative to the install directory
    pub target: String,
    /// Display name, optionally with a subdirectory (`Tools\App`)
    pub name: String,
    pub args: String,
    pub icon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub bucket: String,
    pub name: String,
}

impl Dependency {
    /// Parse `bucket/name` or `name`; the latter inherits `default_bucket`.
    pub fn parse(value: &str, default_bucket: &str) -> Self {
        match value.split_once('/') {
            Some((bucket, name)) => Self {
                bucket: bucket.to_string(),
                name: name.to_string(),
            },
            None => Self {
                bucket: default_bucket.to_string(),
                name: value.to_string(),
            },
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.bucket, self.name)
        }
    }
}

/// A directory or file kept outside the versioned install tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistDir {
    pub dir: String,
    /// Optional name under the persist root; defaults to `dir`
    pub link_name: String,
}

impl PersistDir {
    pub fn target_name(&self) -> &str {
        if self.link_name.is_empty() {
            &self.dir
        } else {
            &self.link_name
        }
    }
}

/// One artifact to fetch, aligned by index across the manifest's
/// `url`, `hash`, `extract_dir` and `extract_to` arrays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downloadable {
    pub url: String,
    pub hash: String,
    pub extract_dir: String,
    pub extract_to: String,
}

impl Downloadable {
    /// File name of the artifact.
    ///
    /// A `#/name` fragment renames the download, which manifests use to
    /// force an extension.
    pub fn file_name(&self) -> &str {
        if let Some((_, renamed)) = self.url.split_once("#/") {
            return renamed;
        }
        let url = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        url.rsplit('/').next().unwrap_or(url)
    }
}

/// Build downloadables from parallel arrays. The result is as long as the
/// longest of `urls`, `extract_dirs` and `extract_tos`; missing entries stay
/// empty.
pub fn merge_into_downloadables(
    urls: &[String],
    hashes: &[String],
    extract_dirs: &[String],
    extract_tos: &[String],
) -> Vec<Downloadable> {
    let len = urls.len().max(extract_dirs.len()).max(extract_tos.len());
    let mut downloadables = vec![Downloadable::default(); len];

    for (item, url) in downloadables.iter_mut().zip(urls) {
        item.url = url.clone();
    }
    for (item, hash) in downloadables.iter_mut().zip(hashes) {
        item.hash = hash.clone();
    }
    for (item, dir) in downloadables.iter_mut().zip(extract_dirs) {
        item.extract_dir = dir.clone();
    }
    for (item, to) in downloadables.iter_mut().zip(extract_tos) {
        item.extract_to = to.clone();
    }

    downloadables
}

/// Installer or uninstaller directive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installer {
    /// Executable to run; defaults to the last downloaded file
    pub file: String,
    /// PowerShell lines, mutually exclusive with `file`
    pub script: Vec<String>,
    pub args: Vec<String>,
    /// Keep `file` after running it
    pub keep: bool,
}

/// Per-architecture overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub downloadables: Vec<Downloadable>,
    pub bin: Vec<Bin>,
    pub shortcuts: Vec<Shortcut>,
    pub installer: Option<Installer>,
    pub uninstaller: Option<Installer>,
    pub pre_install: Vec<String>,
    pub post_install: Vec<String>,
}

/// An application manifest. Only fields passed to [`App::load_details`] are
/// populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    /// Owning bucket; `None` for headless installs
    pub bucket: Option<String>,
    #[serde(skip)]
    pub manifest_path: PathBuf,

    pub description: String,
    pub version: String,
    pub notes: String,

    pub bin: Vec<Bin>,
    pub shortcuts: Vec<Shortcut>,
    pub env_add_path: Vec<String>,
    pub env_set: Vec<EnvVar>,
    pub persist: Vec<PersistDir>,

    pub downloadables: Vec<Downloadable>,

    pub depends: Vec<Dependency>,
    pub architecture: BTreeMap<ArchitectureKey, Architecture>,
    pub innosetup: bool,
    pub installer: Option<Installer>,
    pub uninstaller: Option<Installer>,
    pub pre_install: Vec<String>,
    pub post_install: Vec<String>,
    pub pre_uninstall: Vec<String>,
    pub post_uninstall: Vec<String>,
    /// Root-level only; merged into downloadables by [`App::for_arch`]
    pub extract_to: Vec<String>,
}

impl App {
    /// Create an unloaded app. No IO happens here.
    pub fn new(name: &str, bucket: Option<&str>, manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            bucket: bucket.map(str::to_string),
            manifest_path: manifest_path.into(),
            ..Default::default()
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn bucket_name(&self) -> &str {
        self.bucket.as_deref().unwrap_or("")
    }

    /// Read the requested fields from the manifest in one pass.
    pub fn load_details(&mut self, fields: &[DetailField]) -> Result<()> {
        ManifestDecoder::new().load(self, fields)
    }

    /// Like [`App::load_details`], reusing the decoder's buffer.
    pub fn load_details_with(
        &mut self,
        decoder: &mut ManifestDecoder,
        fields: &[DetailField],
    ) -> Result<()> {
        decoder.load(self, fields)
    }

    /// Merge root and architecture-specific values for installation.
    pub fn for_arch(&self, arch: ArchitectureKey) -> AppResolved<'_> {
        let mut resolved = AppResolved {
            app: self,
            arch,
            bin: self.bin.clone(),
            shortcuts: self.shortcuts.clone(),
            downloadables: self.downloadables.clone(),
            installer: self.installer.clone(),
            uninstaller: self.uninstaller.clone(),
            pre_install: self.pre_install.clone(),
            post_install: self.post_install.clone(),
        };

        let overrides = self.architecture.get(&arch).or_else(|| {
            if arch == ArchitectureKey::X64 {
                self.architecture.get(&ArchitectureKey::X86)
            } else {
                None
            }
        });

        if let Some(overrides) = overrides {
            if overrides.bin.len() > resolved.bin.len() {
                resolved.bin = overrides.bin.clone();
            }
            if overrides.shortcuts.len() > resolved.shortcuts.len() {
                resolved.shortcuts = overrides.shortcuts.clone();
            }
            // An override without urls only adjusts the root artifacts
            let url_less = overrides.downloadables.iter().all(|d| d.url.is_empty());
            if url_less {
                for (item, patch) in resolved.downloadables.iter_mut().zip(&overrides.downloadables) {
                    if !patch.hash.is_empty() {
                        item.hash = patch.hash.clone();
                    }
                    if !patch.extract_dir.is_empty() {
                        item.extract_dir = patch.extract_dir.clone();
                    }
                }
            } else if overrides.downloadables.len() > resolved.downloadables.len() {
                resolved.downloadables = overrides.downloadables.clone();
            }
            if overrides.pre_install.len() > resolved.pre_install.len() {
                resolved.pre_install = overrides.pre_install.clone();
            }
            if overrides.post_install.len() > resolved.post_install.len() {
                resolved.post_install = overrides.post_install.clone();
            }
            if overrides.installer.is_some() {
                resolved.installer = overrides.installer.clone();
            }
            if overrides.uninstaller.is_some() {
                resolved.uninstaller = overrides.uninstaller.clone();
            }
        }

        match self.extract_to.as_slice() {
            [] => {}
            [single] => {
                for item in &mut resolved.downloadables {
                    item.extract_to = single.clone();
                }
            }
            many => {
                for (item, to) in resolved.downloadables.iter_mut().zip(many) {
                    item.extract_to = to.clone();
                }
            }
        }

        let last_file = resolved
            .downloadables
            .last()
            .map(|item| item.file_name().to_string());
        if let (Some(installer), Some(last_file)) = (resolved.installer.as_mut(), last_file)
            && installer.file.is_empty()
            && installer.script.is_empty()
        {
            installer.file = last_file;
        }

        resolved
    }
}

/// An [`App`] merged for one architecture, ready to install or uninstall
#[derive(Debug, Clone)]
pub struct AppResolved<'a> {
    pub app: &'a App,
    pub arch: ArchitectureKey,
    pub bin: Vec<Bin>,
    pub shortcuts: Vec<Shortcut>,
    pub downloadables: Vec<Downloadable>,
    pub installer: Option<Installer>,
    pub uninstaller: Option<Installer>,
    pub pre_install: Vec<String>,
    pub post_install: Vec<String>,
}

impl Deref for AppResolved<'_> {
    type Target = App;

    fn deref(&self) -> &App {
        self.app
    }
}

/// `[bucket/]name[@version]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentifier {
    pub bucket: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

/// Split an identifier on its first `/` and last `@`.
pub fn parse_app_identifier(identifier: &str) -> AppIdentifier {
    let (bucket, rest) = match identifier.split_once('/') {
        Some((bucket, rest)) => (Some(bucket.to_string()), rest),
        None => (None, identifier),
    };

    let (name, version) = match rest.rsplit_once('@') {
        Some((name, version)) => (name, Some(version.to_string())),
        None => (rest, None),
    };

    AppIdentifier {
        bucket,
        name: name.to_string(),
        version,
    }
}

/// Replace manifest variables such as `$dir` in `value`.
///
/// This is a plain global replace with no awareness of surrounding syntax.
/// Longer names are replaced first so `$dir` never clobbers `$dirname`.
pub fn substitute_variables(value: &str, variables: &[(&str, &str)]) -> String {
    let mut ordered: Vec<&(&str, &str)> = variables.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = value.to_string();
    for (key, replacement) in ordered {
        result = result.replace(key, replacement);
    }
    result
}
