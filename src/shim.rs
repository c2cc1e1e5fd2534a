//! Shims: launchers in `<root>/shims` that forward to installed executables.
//!
//! The shim directory is the only thing installs add to PATH for `bin`
//! entries. What gets written depends on the target's extension:
//!
//! | target          | files                                        |
//! |-----------------|----------------------------------------------|
//! | `.exe`, `.com`  | `<name>.exe` (launcher copy) + `<name>.shim` |
//! | `.cmd`, `.bat`  | `<name>.cmd` + `<name>` (sh)                 |
//! | `.jar`          | `<name>.cmd` + `<name>` (sh), via `java -jar`|
//!
//! The launcher reads its sibling `.shim` file to find the real executable
//! and the fixed arguments to prepend.

use crate::config::Config;
use crate::error::{LadleError, Result};
use crate::manifest::Bin;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn write_script(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    make_executable(path)
}

fn lowercase_extension(name: &str) -> String {
    Path::new(&name.replace('\\', "/"))
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Contents of the `.shim` sidecar read by the launcher.
fn shim_config(target: &Path, args: &str) -> String {
    let mut config = format!("path = \"{}\"\n", target.display());
    if !args.is_empty() {
        config.push_str(&format!("args = {}\n", args));
    }
    config
}

/// Write a shim for `bin`, which lives at `target`. Returns the files
/// written.
pub fn create_shim(config: &Config, target: &Path, bin: &Bin) -> Result<Vec<PathBuf>> {
    let shims_dir = config.shims_dir();
    fs::create_dir_all(&shims_dir)?;

    let name = bin.shim_name();
    let args = bin.args.join(" ");
    let target_display = target.display();

    let written = match lowercase_extension(&bin.name).as_str() {
        "exe" | "com" => {
            let sidecar = shims_dir.join(format!("{}.shim", name));
            fs::write(&sidecar, shim_config(target, &args))?;

            let launcher = config.shim_launcher();
            if !launcher.is_file() {
                return Err(LadleError::ToolMissing(launcher.display().to_string()));
            }
            let executable = shims_dir.join(format!("{}.exe", name));
            fs::copy(&launcher, &executable)?;
            vec![executable, sidecar]
        }
        "cmd" | "bat" => {
            let cmd = shims_dir.join(format!("{}.cmd", name));
            write_script(
                &cmd,
                &format!("@rem {target_display}\r\n@\"{target_display}\" {args} %*\r\n"),
            )?;

            let sh = shims_dir.join(&name);
            write_script(
                &sh,
                &format!(
                    "#!/bin/sh\n# {target_display}\nMSYS2_ARG_CONV_EXCL=/C cmd.exe /C \"{target_display}\" {args} \"$@\"\n"
                ),
            )?;
            vec![cmd, sh]
        }
        "jar" => {
            let dir = target.parent().unwrap_or(target).display().to_string();

            let cmd = shims_dir.join(format!("{}.cmd", name));
            write_script(
                &cmd,
                &format!(
                    "@rem {target_display}\r\n@pushd \"{dir}\"\r\n@java -jar \"{target_display}\" {args} %*\r\n@popd\r\n"
                ),
            )?;

            let sh = shims_dir.join(&name);
            write_script(
                &sh,
                &format!(
                    "#!/bin/sh\n# {target_display}\ncd \"{dir}\" || exit 1\njava -jar \"{target_display}\" {args} \"$@\"\n"
                ),
            )?;
            vec![cmd, sh]
        }
        _ => return Err(LadleError::UnsupportedShim(PathBuf::from(&bin.name))),
    };

    debug!(shim = %name, target = %target.display(), "created shim");
    Ok(written)
}

/// Shim name a file in the shim directory belongs to. Only the extensions
/// [`create_shim`] writes are stripped, so dotted names stay intact.
fn shim_name_of(file_name: &str) -> &str {
    for ext in [".exe", ".shim", ".cmd"] {
        let split = file_name.len().saturating_sub(ext.len());
        if split > 0
            && file_name.is_char_boundary(split)
            && file_name[split..].eq_ignore_ascii_case(ext)
        {
            return &file_name[..split];
        }
    }
    file_name
}

/// Delete every file in the shim directory that belongs to one of the
/// bins' shim names, ignoring case. Returns the removed files.
pub fn remove_shims(config: &Config, bins: &[Bin]) -> Result<Vec<PathBuf>> {
    let shims_dir = config.shims_dir();
    if !shims_dir.exists() || bins.is_empty() {
        return Ok(vec![]);
    }

    let wanted: Vec<String> = bins.iter().map(Bin::shim_name).collect();
    let mut removed = Vec::new();

    for entry in fs::read_dir(&shims_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        let owner = shim_name_of(&file_name);
        if wanted.iter().any(|w| w.eq_ignore_ascii_case(owner)) {
            fs::remove_file(entry.path())?;
            removed.push(entry.path());
        }
    }

    debug!(count = removed.len(), "removed shims");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        let launcher = dir.path().join("launcher.exe");
        fs::write(&launcher, b"MZ launcher").unwrap();
        config.shim_launcher = Some(launcher);
        (dir, config)
    }

    #[test]
    fn test_exe_shim_with_args() {
        let (_dir, config) = setup();
        let target = config.current_dir("rg").join("rg.exe");
        let bin = Bin {
            name: "rg.exe".into(),
            alias: "ripgrep".into(),
            args: vec!["--hidden".into(), "--smart-case".into()],
        };

        create_shim(&config, &target, &bin).unwrap();

        let sidecar = fs::read_to_string(config.shims_dir().join("ripgrep.shim")).unwrap();
        assert_eq!(
            sidecar,
            format!("path = \"{}\"\nargs = --hidden --smart-case\n", target.display())
        );
        assert_eq!(
            fs::read(config.shims_dir().join("ripgrep.exe")).unwrap(),
            b"MZ launcher"
        );
    }

    #[test]
    fn test_cmd_shim_writes_both_wrappers() {
        let (_dir, config) = setup();
        let target = config.current_dir("tool").join("bin").join("tool.cmd");
        create_shim(&config, &target, &Bin::new("bin\\tool.cmd")).unwrap();

        let cmd = fs::read_to_string(config.shims_dir().join("tool.cmd")).unwrap();
        assert!(cmd.contains(&format!("@\"{}\"", target.display())));
        let sh = fs::read_to_string(config.shims_dir().join("tool")).unwrap();
        assert!(sh.starts_with("#!/bin/sh"));
    }

    #[test]
    fn test_jar_shim_uses_java() {
        let (_dir, config) = setup();
        let target = config.current_dir("tool").join("tool.jar");
        create_shim(&config, &target, &Bin::new("tool.jar")).unwrap();

        let cmd = fs::read_to_string(config.shims_dir().join("tool.cmd")).unwrap();
        assert!(cmd.contains("java -jar"));
    }

    #[test]
    fn test_unsupported_shim_types() {
        let (_dir, config) = setup();
        for name in ["script.ps1", "script.py", "README"] {
            let err = create_shim(&config, Path::new(name), &Bin::new(name)).unwrap_err();
            assert!(matches!(err, LadleError::UnsupportedShim(_)), "{}", name);
        }
    }

    #[test]
    fn test_missing_launcher() {
        let (_dir, mut config) = setup();
        config.shim_launcher = Some(PathBuf::from("/nonexistent/shim.exe"));
        let err = create_shim(&config, Path::new("a.exe"), &Bin::new("a.exe")).unwrap_err();
        assert!(matches!(err, LadleError::ToolMissing(_)));
    }

    #[test]
    fn test_remove_shims_ignores_case() {
        let (_dir, config) = setup();
        create_shim(&config, Path::new("/x/Tool.exe"), &Bin::new("Tool.exe")).unwrap();
        create_shim(&config, Path::new("/x/other.cmd"), &Bin::new("other.cmd")).unwrap();

        let removed = remove_shims(&config, &[Bin::new("tool.exe")]).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!config.shims_dir().join("Tool.shim").exists());
        assert!(config.shims_dir().join("other.cmd").exists());
        assert!(config.shims_dir().join("other").exists());
    }

    #[test]
    fn test_remove_shims_keeps_dotted_names_apart() {
        let (_dir, config) = setup();
        let shims = config.shims_dir();
        create_shim(&config, Path::new("/a/python3.11.exe"), &Bin::new("python3.11.exe")).unwrap();
        create_shim(&config, Path::new("/b/python3.exe"), &Bin::new("python3.exe")).unwrap();
        create_shim(&config, Path::new("/c/node.20.cmd"), &Bin::new("node.20.cmd")).unwrap();
        create_shim(&config, Path::new("/d/node.cmd"), &Bin::new("node.cmd")).unwrap();

        let removed = remove_shims(&config, &[Bin::new("python3.11.exe")]).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!shims.join("python3.11.exe").exists());
        assert!(!shims.join("python3.11.shim").exists());
        assert!(shims.join("python3.exe").exists());
        assert!(shims.join("python3.shim").exists());

        // The sh wrapper has no extension of its own
        let removed = remove_shims(&config, &[Bin::new("node.20.cmd")]).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!shims.join("node.20").exists());
        assert!(shims.join("node").exists());
        assert!(shims.join("node.cmd").exists());
    }

    #[test]
    fn test_shim_name_of() {
        assert_eq!(shim_name_of("python3.11.exe"), "python3.11");
        assert_eq!(shim_name_of("Tool.SHIM"), "Tool");
        assert_eq!(shim_name_of("node.20"), "node.20");
        assert_eq!(shim_name_of(".cmd"), ".cmd");
    }
}
