//! Concurrent artifact downloads into the cache.
//!
//! [`download`] returns a channel of [`DownloadEvent`]s for one resolved
//! app. Every downloadable ends in exactly one terminal event:
//!
//! - [`DownloadEvent::CacheHit`] when the cached copy exists and its hash
//!   verifies (decided before any network access)
//! - [`DownloadEvent::Finished`] after a transfer, and verification when
//!   enabled
//! - [`DownloadEvent::Failed`] for network or checksum errors of that item
//!
//! Transfers additionally emit [`DownloadEvent::Started`]. Events arrive in
//! completion order and the channel closes once every item is done, so
//! draining it with `recv()` until `None` is always safe. A failed item never
//! cancels its siblings; callers decide whether it is fatal.
//!
//! # Examples
//!
//! ```no_run
//! use ladle::download::{self, DownloadEvent, DownloadOptions};
//! use ladle::manifest::{App, ArchitectureKey, DetailField};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> ladle::Result<()> {
//!     let mut app = App::new("git", Some("main"), "/scoop/buckets/main/bucket/git.json");
//!     app.load_details(DetailField::ALL)?;
//!     let resolved = app.for_arch(ArchitectureKey::X64);
//!
//!     let client = reqwest::Client::new();
//!     let mut events = download::download(
//!         &client,
//!         &resolved,
//!         Path::new("/scoop/cache"),
//!         2,
//!         DownloadOptions::default(),
//!     )
//!     .await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let DownloadEvent::Failed { item, error } = event {
//!             eprintln!("{}: {}", item.url, error);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::cache::cache_path;
use crate::checksum::verify_file;
use crate::error::{LadleError, Result};
use crate::manifest::{AppResolved, Downloadable};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A downloadable and where it lives in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub item: Downloadable,
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum DownloadEvent {
    CacheHit(CachedFile),
    Started(CachedFile),
    Finished(CachedFile),
    Failed { item: Downloadable, error: LadleError },
}

impl DownloadEvent {
    /// Whether this is the last event for its item
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Started(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Verify each transfer against the manifest hash before reporting it
    pub verify_hashes: bool,
    /// Skip the cache check and always transfer
    pub overwrite_cache: bool,
    /// Render per-file progress bars
    pub progress: Option<MultiProgress>,
}

/// Start downloading every artifact of `resolved`. See the module docs for
/// the event contract.
pub async fn download(
    client: &reqwest::Client,
    resolved: &AppResolved<'_>,
    cache_dir: &Path,
    concurrency: usize,
    options: DownloadOptions,
) -> Result<mpsc::Receiver<DownloadEvent>> {
    fs::create_dir_all(cache_dir).await?;

    // Started plus one terminal event per item, so sends never wait
    let (tx, rx) = mpsc::channel(resolved.downloadables.len() * 2 + 1);
    let mut pending = Vec::new();

    // Step 1: settle cache hits before touching the network
    for item in &resolved.downloadables {
        if item.url.is_empty() {
            warn!(app = %resolved.name, "downloadable without url");
            let error = LadleError::InvalidManifest {
                app: resolved.name.clone(),
                message: "downloadable has no url".to_string(),
            };
            let _ = tx.send(DownloadEvent::Failed { item: item.clone(), error }).await;
            continue;
        }

        let file = CachedFile {
            item: item.clone(),
            path: cache_dir.join(cache_path(&resolved.name, &resolved.version, &item.url)),
        };

        if !options.overwrite_cache && file.path.is_file() {
            let path = file.path.clone();
            let hash = item.hash.clone();
            let verified = tokio::task::spawn_blocking(move || verify_file(&path, &hash))
                .await
                .map_err(|e| anyhow::anyhow!("Verification task failed: {}", e))?;

            match verified {
                Ok(()) => {
                    debug!(url = %item.url, "cache hit");
                    let _ = tx.send(DownloadEvent::CacheHit(file)).await;
                    continue;
                }
                Err(e) => debug!(url = %item.url, error = %e, "cached copy rejected"),
            }
        }

        pending.push(file);
    }

    // Step 2: transfer the rest with bounded concurrency
    let client = client.clone();
    tokio::spawn(async move {
        futures::stream::iter(pending)
            .map(|file| {
                let client = client.clone();
                let tx = tx.clone();
                let options = options.clone();
                async move { fetch(&client, file, &options, &tx).await }
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<()>>()
            .await;
        // Dropping the last sender closes the channel
    });

    Ok(rx)
}

async fn fetch(
    client: &reqwest::Client,
    file: CachedFile,
    options: &DownloadOptions,
    tx: &mpsc::Sender<DownloadEvent>,
) {
    let _ = tx.send(DownloadEvent::Started(file.clone())).await;

    let result: Result<()> = async {
        transfer(client, &file, options.progress.as_ref()).await?;

        if options.verify_hashes && !file.item.hash.is_empty() {
            let path = file.path.clone();
            let hash = file.item.hash.clone();
            let verified = tokio::task::spawn_blocking(move || verify_file(&path, &hash))
                .await
                .map_err(|e| anyhow::anyhow!("Verification task failed: {}", e))?;

            if let Err(e) = verified {
                let _ = fs::remove_file(&file.path).await;
                return Err(e);
            }
        }
        Ok(())
    }
    .await;

    let event = match result {
        Ok(()) => DownloadEvent::Finished(file),
        Err(error) => {
            warn!(url = %file.item.url, error = %error, "download failed");
            DownloadEvent::Failed {
                item: file.item,
                error,
            }
        }
    };
    let _ = tx.send(event).await;
}

fn download_error(url: &str, e: impl std::fmt::Display) -> LadleError {
    LadleError::Download {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Stream one URL to a partial file, then move it into place.
async fn transfer(
    client: &reqwest::Client,
    file: &CachedFile,
    progress: Option<&MultiProgress>,
) -> Result<()> {
    let url = &file.item.url;
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| download_error(url, e))?;

    let pb = progress.map(|mp| {
        let pb = mp.add(ProgressBar::new(response.content_length().unwrap_or(0)));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(file.item.file_name().to_string());
        pb
    });

    let partial = PathBuf::from(format!("{}.download", file.path.display()));
    let written: Result<()> = async {
        let mut out = fs::File::create(&partial).await?;
        while let Some(chunk) = response.chunk().await.map_err(|e| download_error(url, e))? {
            out.write_all(&chunk).await?;
            if let Some(pb) = &pb {
                pb.inc(chunk.len() as u64);
            }
        }
        out.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&partial).await;
        return Err(e);
    }

    fs::rename(&partial, &file.path).await?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    debug!(url = %url, path = %file.path.display(), "downloaded");
    Ok(())
}
