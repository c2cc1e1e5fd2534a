//! Library interface for ladle, a native installer for scoop-style buckets
//!
//! [`PackageManager`] is the entry point; the modules below it are usable on
//! their own (manifest decoding, cache keys, shims, dependency trees).

pub mod bucket;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod decoder;
pub mod download;
pub mod env;
pub mod error;
pub mod extract;
pub mod history;
pub mod installed;
pub mod link;
pub mod manifest;
pub mod package_manager;
pub mod platform;
pub mod receipt;
pub mod resolver;
pub mod shim;
pub mod version;

// Re-export commonly used types
pub use config::Config;
pub use error::{LadleError, Result};
pub use package_manager::{DownloadReport, InstallResult, PackageManager, UninstallResult};
