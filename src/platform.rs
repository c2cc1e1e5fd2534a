//! Host detection and OS services used during installs.
//!
//! Manifests carry PowerShell snippets (`pre_install`, `installer.script`,
//! ...) and request Start menu shortcuts. Both are reached through small
//! traits so the install logic stays testable on any host:
//!
//! - [`ScriptRunner`] runs manifest scripts and installer programs
//! - [`ShortcutCreator`] writes `.lnk` files
//!
//! [`PowerShell`] implements both, plus the environment store in
//! [`crate::env`].
//!
//! # Examples
//!
//! ```no_run
//! use ladle::platform;
//!
//! let arch = platform::detect_architecture();
//! println!("installing {} packages", arch);
//! ```

use crate::error::{LadleError, Result};
use crate::manifest::ArchitectureKey;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Architecture of the running system, as manifests name it.
pub fn detect_architecture() -> ArchitectureKey {
    #[cfg(windows)]
    {
        // A 32-bit process on a 64-bit OS sees the real value in the W6432 variable
        let arch = std::env::var("PROCESSOR_ARCHITEW6432")
            .or_else(|_| std::env::var("PROCESSOR_ARCHITECTURE"))
            .unwrap_or_default();
        match arch.to_ascii_uppercase().as_str() {
            "AMD64" => return ArchitectureKey::X64,
            "ARM64" => return ArchitectureKey::Arm64,
            "X86" => return ArchitectureKey::X86,
            _ => {}
        }
    }

    match std::env::consts::ARCH {
        "x86" => ArchitectureKey::X86,
        "aarch64" => ArchitectureKey::Arm64,
        _ => ArchitectureKey::X64,
    }
}

/// Quote `value` as a PowerShell single-quoted string.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Runs manifest scripts and installer executables
pub trait ScriptRunner: Send + Sync {
    /// Run PowerShell source with `working_dir` as the current directory.
    fn run_script(&self, script: &str, working_dir: &Path) -> Result<()>;

    /// Run an installer program and wait for it to exit successfully.
    fn run_program(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<()>;
}

/// A Start menu shortcut to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutLink {
    /// Full path of the `.lnk` file
    pub link: PathBuf,
    pub target: PathBuf,
    pub args: String,
    pub icon: Option<PathBuf>,
    pub working_dir: PathBuf,
}

pub trait ShortcutCreator: Send + Sync {
    fn create(&self, shortcut: &ShortcutLink) -> Result<()>;
}

/// PowerShell host. `pwsh` is preferred over Windows PowerShell.
#[derive(Debug, Clone, Default)]
pub struct PowerShell {
    executable: Option<PathBuf>,
}

impl PowerShell {
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
        }
    }

    fn executable(&self) -> Result<PathBuf> {
        if let Some(executable) = &self.executable {
            return Ok(executable.clone());
        }
        which::which("pwsh")
            .or_else(|_| which::which("powershell"))
            .map_err(|_| LadleError::ToolMissing("powershell".to_string()))
    }

    fn command(&self, script: &str) -> Result<Command> {
        let mut command = Command::new(self.executable()?);
        command.args(["-NoProfile", "-NonInteractive", "-Command", script]);
        Ok(command)
    }

    /// Run `script` and return its standard output.
    pub fn capture(&self, script: &str) -> Result<String> {
        let output = self
            .command(script)?
            .output()
            .map_err(|e| tool_error("powershell", e.to_string()))?;

        if !output.status.success() {
            return Err(tool_error(
                "powershell",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn tool_error(tool: &str, message: String) -> LadleError {
    LadleError::Tool {
        tool: tool.to_string(),
        message,
    }
}

impl ScriptRunner for PowerShell {
    fn run_script(&self, script: &str, working_dir: &Path) -> Result<()> {
        debug!(dir = %working_dir.display(), "running script");
        let status = self
            .command(script)?
            .current_dir(working_dir)
            .status()
            .map_err(|e| tool_error("powershell", e.to_string()))?;

        if !status.success() {
            return Err(tool_error("powershell", format!("script exited with {}", status)));
        }
        Ok(())
    }

    fn run_program(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<()> {
        let is_script = program
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ps1"));

        if is_script {
            let mut invocation = format!("& {}", quote(&program.to_string_lossy()));
            for arg in args {
                invocation.push(' ');
                invocation.push_str(&quote(arg));
            }
            return self.run_script(&invocation, working_dir);
        }

        let name = program.to_string_lossy().to_string();
        let status = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .status()
            .map_err(|e| tool_error(&name, e.to_string()))?;
        if !status.success() {
            return Err(tool_error(&name, format!("exited with {}", status)));
        }
        Ok(())
    }
}

impl ShortcutCreator for PowerShell {
    fn create(&self, shortcut: &ShortcutLink) -> Result<()> {
        if let Some(parent) = shortcut.link.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut script = format!(
            "$s = (New-Object -ComObject WScript.Shell).CreateShortcut({}); \
             $s.TargetPath = {}; $s.WorkingDirectory = {}; $s.Arguments = {}; ",
            quote(&shortcut.link.to_string_lossy()),
            quote(&shortcut.target.to_string_lossy()),
            quote(&shortcut.working_dir.to_string_lossy()),
            quote(&shortcut.args),
        );
        if let Some(icon) = &shortcut.icon {
            script.push_str(&format!("$s.IconLocation = {}; ", quote(&icon.to_string_lossy())));
        }
        script.push_str("$s.Save()");

        self.capture(&script)?;
        debug!(link = %shortcut.link.display(), "created shortcut");
        Ok(())
    }
}
