//! Unpacking downloaded artifacts into a version directory.
//!
//! Exactly one [`Strategy`] handles each artifact:
//!
//! - Inno Setup installers (manifest `innosetup: true`) go through `innounp`
//! - formats 7-Zip understands go through `7z`, then the inner
//!   `extract_dir` is flattened into the destination
//! - `.msi` packages go through `lessmsi`
//! - `.zip` without 7-Zip on PATH, and tarballs, are read in-process
//! - anything else is copied verbatim
//!
//! Helper tools may have to be installed first (see
//! [`Strategy::required_tool`]), so an app's artifacts are extracted one
//! after another, never in parallel.

use crate::error::{LadleError, Result};
use crate::link::move_contents;
use crate::manifest::Downloadable;
use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tar::Archive;
use tracing::debug;
use zip::ZipArchive;

static SEVEN_ZIP_FORMATS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\.((gz)|(tar)|(t[abgpx]z2?)|(lzma)|(bz2?)|(7z)|(001)|(rar)|(iso)|(xz)|(lzh)|(nupkg))(\.[^\d.]+)?$",
    )
    .expect("7-Zip format pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    InnoSetup,
    SevenZip,
    Msi,
    Zip,
    Tar,
    Copy,
}

/// An executable a strategy needs, and the app that provides it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    pub executable: &'static str,
    pub app: &'static str,
}

impl Strategy {
    pub fn required_tool(self) -> Option<RequiredTool> {
        match self {
            Strategy::InnoSetup => Some(RequiredTool {
                executable: "innounp",
                app: "innounp",
            }),
            Strategy::SevenZip => Some(RequiredTool {
                executable: "7z",
                app: "7zip",
            }),
            Strategy::Msi => Some(RequiredTool {
                executable: "lessmsi",
                app: "lessmsi",
            }),
            Strategy::Zip | Strategy::Tar | Strategy::Copy => None,
        }
    }
}

/// Whether 7-Zip handles `file_name`, judged by extension.
pub fn supported_by_seven_zip(file_name: &str) -> bool {
    SEVEN_ZIP_FORMATS.is_match(&file_name.to_lowercase())
}

fn is_tarball(lower: &str) -> bool {
    lower.ends_with(".tar") || lower.ends_with(".tar.gz") || lower.ends_with(".tgz")
}

/// Pick the strategy for one artifact.
pub fn select_strategy(item: &Downloadable, innosetup: bool, seven_zip_on_path: bool) -> Strategy {
    if innosetup {
        return Strategy::InnoSetup;
    }

    let lower = item.file_name().to_lowercase();
    if is_tarball(&lower) {
        return Strategy::Tar;
    }
    if supported_by_seven_zip(&lower) {
        return Strategy::SevenZip;
    }
    if lower.ends_with(".zip") {
        return if seven_zip_on_path {
            Strategy::SevenZip
        } else {
            Strategy::Zip
        };
    }
    if lower.ends_with(".msi") {
        return Strategy::Msi;
    }
    Strategy::Copy
}

/// One artifact to unpack
#[derive(Debug, Clone)]
pub struct Extraction<'a> {
    /// The cached download
    pub source: &'a Path,
    pub version_dir: &'a Path,
    pub item: &'a Downloadable,
}

impl Extraction<'_> {
    pub fn destination(&self) -> PathBuf {
        if self.item.extract_to.is_empty() {
            self.version_dir.to_path_buf()
        } else {
            self.version_dir.join(&self.item.extract_to)
        }
    }
}

/// Run `strategy`. `tool` must be the resolved executable when the strategy
/// has a [`RequiredTool`].
pub fn extract(strategy: Strategy, tool: Option<&Path>, job: &Extraction<'_>) -> Result<()> {
    let destination = job.destination();
    fs::create_dir_all(&destination)?;
    debug!(file = %job.item.file_name(), ?strategy, dest = %destination.display(), "extracting");

    let require_tool = |name: &str| {
        tool.map(Path::to_path_buf)
            .ok_or_else(|| LadleError::ToolMissing(name.to_string()))
    };

    match strategy {
        Strategy::InnoSetup => {
            let innounp = require_tool("innounp")?;
            run_tool(&innounp, &innounp_args(job.source, &destination, &job.item.extract_dir))
        }
        Strategy::SevenZip => {
            let seven_zip = require_tool("7z")?;
            run_tool(&seven_zip, &seven_zip_args(job.source, &destination, job.item))?;
            if !job.item.extract_dir.is_empty() {
                move_contents(&destination.join(&job.item.extract_dir), &destination)?;
            }
            Ok(())
        }
        Strategy::Msi => {
            let lessmsi = require_tool("lessmsi")?;
            let args = vec![
                "x".to_string(),
                job.source.display().to_string(),
                format!("{}{}", destination.display(), std::path::MAIN_SEPARATOR),
            ];
            run_tool(&lessmsi, &args)?;

            let mut inner = destination.join("SourceDir");
            if !job.item.extract_dir.is_empty() {
                inner = inner.join(&job.item.extract_dir);
            }
            move_contents(&inner, &destination)?;
            let source_dir = destination.join("SourceDir");
            if source_dir.exists() {
                fs::remove_dir_all(source_dir)?;
            }
            Ok(())
        }
        Strategy::Zip => extract_zip(job.source, &destination, &job.item.extract_dir),
        Strategy::Tar => {
            let gzipped = !job.item.file_name().to_lowercase().ends_with(".tar");
            extract_tar(job.source, &destination, &job.item.extract_dir, gzipped)
        }
        Strategy::Copy => {
            fs::copy(job.source, destination.join(job.item.file_name()))?;
            Ok(())
        }
    }
}

fn innounp_args(source: &Path, destination: &Path, extract_dir: &str) -> Vec<String> {
    let mut args = vec![
        "-x".to_string(),
        "-y".to_string(),
        format!("-d{}", destination.display()),
        source.display().to_string(),
    ];
    if extract_dir.starts_with('{') {
        args.push(format!("-c{}", extract_dir));
    } else if !extract_dir.is_empty() {
        args.push(format!("-c{{app}}\\{}", extract_dir));
    } else {
        args.push("-c{app}".to_string());
    }
    args
}

fn seven_zip_args(source: &Path, destination: &Path, item: &Downloadable) -> Vec<String> {
    let mut args = vec![
        "x".to_string(),
        source.display().to_string(),
        format!("-o{}", destination.display()),
        "-aoa".to_string(),
        "-y".to_string(),
    ];
    let is_tar = item.file_name().to_lowercase().ends_with(".tar");
    if !is_tar && !item.extract_dir.is_empty() {
        args.push(format!("-ir!{}\\*", item.extract_dir));
    }
    args
}

fn run_tool(tool: &Path, args: &[String]) -> Result<()> {
    let name = tool
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| LadleError::Tool {
            tool: name.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LadleError::Tool {
            tool: name,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Archive-relative path below `extract_dir` with the prefix stripped, or
/// `None` when the entry is outside it.
fn strip_extract_dir(entry: &str, extract_dir: &str) -> Option<String> {
    let entry = entry.replace('\\', "/");
    let prefix = extract_dir.replace('\\', "/");
    let prefix = prefix.trim_end_matches('/');
    let rest = entry.strip_prefix(prefix)?;
    if !prefix.is_empty() && !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let rest = rest.trim_start_matches('/');
    (!rest.is_empty()).then(|| rest.to_string())
}

fn is_enclosed(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn write_entry(reader: &mut impl Read, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(reader, &mut out)?;
    Ok(())
}

fn archive_error(file: &Path, e: impl std::fmt::Display) -> LadleError {
    LadleError::Other(anyhow::anyhow!("Failed to read archive {}: {}", file.display(), e))
}

/// Unpack a zip in-process, keeping only entries below `extract_dir`.
pub fn extract_zip(source: &Path, destination: &Path, extract_dir: &str) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(source)?).map_err(|e| archive_error(source, e))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_error(source, e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().map(|p| p.to_string_lossy().to_string()) else {
            continue;
        };
        let Some(relative) = strip_extract_dir(&name, extract_dir) else {
            continue;
        };

        let target = destination.join(&relative);
        write_entry(&mut entry, &target)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }
    }

    Ok(())
}

/// Unpack a `.tar` or gzipped tarball in-process, keeping only entries below
/// `extract_dir`.
pub fn extract_tar(source: &Path, destination: &Path, extract_dir: &str, gzipped: bool) -> Result<()> {
    let file = File::open(source)?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = Archive::new(reader);

    for entry in archive.entries().map_err(|e| archive_error(source, e))? {
        let mut entry = entry.map_err(|e| archive_error(source, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| archive_error(source, e))?
            .to_string_lossy()
            .to_string();
        let Some(relative) = strip_extract_dir(&name, extract_dir) else {
            continue;
        };
        if !is_enclosed(Path::new(&relative)) {
            continue;
        }

        let target = destination.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target).map_err(|e| archive_error(source, e))?;
    }

    Ok(())
}
