//! Persistent user environment (PATH and arbitrary keys).
//!
//! Installs prepend `env_add_path` entries to the user's PATH and write
//! `env_set` values; uninstalls undo both. On Windows these live in the
//! registry and are reached through PowerShell's `[Environment]` API. The
//! [`EnvironmentStore`] trait keeps that out of the install logic so other
//! hosts and tests can substitute [`MemoryEnvironment`].

use crate::error::{LadleError, Result};
use crate::platform::{PowerShell, quote};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

/// Access to the user's persistent environment.
///
/// Keys are matched case-insensitively, as Windows does.
pub trait EnvironmentStore: Send + Sync {
    /// Look up `key`, returning the stored key spelling and its value.
    fn get(&self, key: &str) -> Result<Option<(String, String)>>;

    /// Write several values at once. An empty value deletes the key.
    fn set_many(&self, values: &[(String, String)]) -> Result<()>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key.to_string(), value.to_string())])
    }
}

/// A `;`-separated PATH value.
///
/// Entries may be double-quoted so they can contain `;` themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathList(Vec<String>);

impl PathList {
    pub fn parse(value: &str) -> Self {
        let mut entries = Vec::new();
        let mut current = String::new();
        let mut quoted = false;

        for c in value.chars() {
            match c {
                '"' => quoted = !quoted,
                ';' if !quoted => {
                    if !current.is_empty() {
                        entries.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            entries.push(current);
        }

        Self(entries)
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.iter().any(|e| e.eq_ignore_ascii_case(entry))
    }

    /// Drop every entry matching one of `remove`, ignoring case.
    pub fn remove(&mut self, remove: &[String]) {
        self.0
            .retain(|entry| !remove.iter().any(|r| r.eq_ignore_ascii_case(entry)));
    }

    /// Put `entries` at the front in the given order. Existing copies move
    /// instead of being duplicated.
    pub fn prepend(&mut self, entries: &[String]) {
        self.remove(entries);
        let mut combined = entries.to_vec();
        combined.append(&mut self.0);
        self.0 = combined;
    }
}

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            if entry.contains(';') {
                write!(f, "\"{}\"", entry)?;
            } else {
                f.write_str(entry)?;
            }
        }
        Ok(())
    }
}

/// The user's PATH as stored, with the key spelled as the store has it.
pub fn read_user_path(store: &dyn EnvironmentStore) -> Result<(String, PathList)> {
    match store.get("PATH")? {
        Some((key, value)) => Ok((key, PathList::parse(&value))),
        None => Ok(("PATH".to_string(), PathList::default())),
    }
}

/// Windows user environment, via PowerShell.
#[derive(Debug, Clone, Default)]
pub struct PowerShellEnvironment {
    shell: PowerShell,
}

impl PowerShellEnvironment {
    pub fn new(shell: PowerShell) -> Self {
        Self { shell }
    }
}

impl EnvironmentStore for PowerShellEnvironment {
    fn get(&self, key: &str) -> Result<Option<(String, String)>> {
        let output = self
            .shell
            .capture("[Environment]::GetEnvironmentVariables('User') | ConvertTo-Json")?;

        let vars: BTreeMap<String, serde_json::Value> = serde_json::from_str(&output)
            .map_err(|e| LadleError::Tool {
                tool: "powershell".to_string(),
                message: format!("unexpected environment output: {}", e),
            })?;

        Ok(vars
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            }))
    }

    fn set_many(&self, values: &[(String, String)]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let script = values
            .iter()
            .map(|(key, value)| {
                let value = if value.is_empty() {
                    "$null".to_string()
                } else {
                    quote(value)
                };
                format!(
                    "[Environment]::SetEnvironmentVariable({}, {}, 'User')",
                    quote(key),
                    value
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        debug!(keys = values.len(), "writing user environment");
        self.shell.capture(&script)?;
        Ok(())
    }
}

/// Environment held in memory, for hosts without a persistent store.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: Mutex<BTreeMap<String, String>>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars<'a>(vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            vars: Mutex::new(map),
        }
    }

    /// Copy of everything currently stored
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock can't leave the map half-written
        self.vars.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EnvironmentStore for MemoryEnvironment {
    fn get(&self, key: &str) -> Result<Option<(String, String)>> {
        Ok(self
            .lock()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn set_many(&self, values: &[(String, String)]) -> Result<()> {
        let mut vars = self.lock();
        for (key, value) in values {
            let existing = vars.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned();
            let key = existing.unwrap_or_else(|| key.clone());
            if value.is_empty() {
                vars.remove(&key);
            } else {
                vars.insert(key, value.clone());
            }
        }
        Ok(())
    }
}
