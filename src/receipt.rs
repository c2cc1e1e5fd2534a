//! Install receipts (`install.json`).
//!
//! Every installed version directory carries a small receipt recording where
//! the app came from and how it was installed:
//!
//! ```text
//! <root>/apps/git/2.43.0/
//!   install.json      # {"bucket": "main", "architecture": "64bit", "hold": false}
//!   manifest.json     # the manifest used for this install
//!   ...
//! ```
//!
//! `hold` pins the app to its installed version. Installing a specific
//! version (`git@2.40.0`) sets it automatically.
//!
//! # Examples
//!
//! ```no_run
//! use ladle::receipt::InstallReceipt;
//! use std::path::Path;
//!
//! fn main() -> ladle::Result<()> {
//!     let current = Path::new("C:/Users/me/scoop/apps/git/current");
//!     let receipt = InstallReceipt::read(current)?;
//!     println!("from {} ({}), held: {}", receipt.bucket, receipt.architecture, receipt.hold);
//!     Ok(())
//! }
//! ```

use crate::error::{LadleError, Result};
use crate::manifest::ArchitectureKey;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

pub const RECEIPT_FILE: &str = "install.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_architecture")]
    pub architecture: ArchitectureKey,
    #[serde(default)]
    pub hold: bool,
}

fn default_architecture() -> ArchitectureKey {
    ArchitectureKey::X64
}

impl InstallReceipt {
    pub fn new(bucket: &str, architecture: ArchitectureKey, hold: bool) -> Self {
        Self {
            bucket: bucket.to_string(),
            architecture,
            hold,
        }
    }

    /// Read `install.json` from an app directory.
    pub fn read(app_dir: &Path) -> Result<Self> {
        let path = app_dir.join(RECEIPT_FILE);
        let contents = fs::read(&path)?;
        serde_json::from_slice(&contents).map_err(|source| LadleError::Parse { path, source })
    }

    /// Like [`InstallReceipt::read`], but a missing receipt is `None`.
    pub fn read_optional(app_dir: &Path) -> Result<Option<Self>> {
        match Self::read(app_dir) {
            Ok(receipt) => Ok(Some(receipt)),
            Err(LadleError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, app_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(app_dir.join(RECEIPT_FILE), json)?;
        Ok(())
    }

    /// Rewrite only the `hold` flag.
    pub fn set_hold(app_dir: &Path, hold: bool) -> Result<Self> {
        let mut receipt = Self::read(app_dir)?;
        receipt.hold = hold;
        receipt.write(app_dir)?;
        Ok(receipt)
    }
}
