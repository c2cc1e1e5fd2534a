use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LadleError {
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("{app} {version} is already installed")]
    AlreadyInstalled { app: String, version: String },

    #[error("{0} is held and won't be changed")]
    Held(String),

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{app} is not available in version {version}")]
    NotAvailableInVersion { app: String, version: String },

    #[error("checksum mismatch for {} ({expected} != {actual})", file.display())]
    ChecksumMismatch {
        file: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to parse manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid manifest for {app}: {message}")]
    InvalidManifest { app: String, message: String },

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    #[error("Unsupported shim type: {}", .0.display())]
    UnsupportedShim(PathBuf),

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("{app}: {step} failed: {source}")]
    Step {
        app: String,
        step: String,
        #[source]
        source: Box<LadleError>,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LadleError {
    /// Wrap an error with the app and lifecycle step it happened in.
    pub fn at_step(self, app: &str, step: impl std::fmt::Display) -> Self {
        LadleError::Step {
            app: app.to_string(),
            step: step.to_string(),
            source: Box::new(self),
        }
    }

    /// Strip any `Step` wrappers and return the underlying error.
    pub fn root(&self) -> &LadleError {
        match self {
            LadleError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, LadleError>;
