//! Idempotent fetch-to-disk primitive.
//!
//! Ordinary URLs are streamed over HTTP. `blob:` URLs have no stable
//! network endpoint and are materialized through a browser-side fetch
//! bridge instead. If the computed filename already exists on disk the
//! network fetch is skipped entirely, but the timestamp is still
//! (re)applied. All I/O failures are caught and reported here; this layer
//! never raises past its boundary.

use crate::model::MediaType;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

/// Filesystem name length cap.
const MAX_FILENAME_LEN: usize = 200;
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Bridge that materializes `blob:` URL bytes inside the browser.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch_blob(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP downloader with blob-bridge support.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Download a URL into `dir`, returning the saved filename and path.
    ///
    /// Returns `None` on any failure; the error is logged, never raised.
    pub async fn download(
        &self,
        bridge: &dyn BlobFetcher,
        url: &str,
        dir: &Path,
        override_name: Option<&str>,
        kind: MediaType,
        timestamp: Option<i64>,
    ) -> Option<(String, PathBuf)> {
        if url.is_empty() {
            return None;
        }

        let filename = derive_filename(url, override_name, kind);
        let save_path = dir.join(&filename);

        // Idempotence: an existing file skips the fetch but still gets its
        // timestamp refreshed.
        if save_path.exists() {
            tracing::debug!("file exists, skipping fetch: {filename}");
            if let Some(ts) = timestamp {
                apply_timestamp(&save_path, ts);
            }
            return Some((filename, save_path));
        }

        let result = if url.starts_with("blob:") {
            self.save_blob(bridge, url, &save_path).await
        } else {
            self.save_http(url, &save_path).await
        };

        match result {
            Ok(()) => {
                if let Some(ts) = timestamp {
                    apply_timestamp(&save_path, ts);
                }
                tracing::info!("saved: {filename}");
                Some((filename, save_path))
            }
            Err(e) => {
                tracing::error!("download failed for {url}: {e:#}");
                // Don't leave a partial file behind.
                let _ = std::fs::remove_file(&save_path);
                None
            }
        }
    }

    async fn save_http(&self, url: &str, path: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("request failed")?
            .error_for_status()
            .context("bad status")?;

        let mut file = tokio::fs::File::create(path)
            .await
            .context("create failed")?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("stream read failed")?;
            file.write_all(&chunk).await.context("write failed")?;
        }
        file.flush().await.context("flush failed")?;
        Ok(())
    }

    async fn save_blob(&self, bridge: &dyn BlobFetcher, url: &str, path: &Path) -> Result<()> {
        tracing::debug!("materializing blob via browser bridge: {url}");
        let bytes = bridge.fetch_blob(url).await.context("blob fetch failed")?;
        tokio::fs::write(path, bytes).await.context("write failed")?;
        Ok(())
    }
}

/// Compute the on-disk filename for a media URL.
pub fn derive_filename(url: &str, override_name: Option<&str>, kind: MediaType) -> String {
    let mut filename = match override_name {
        Some(name) => name.to_string(),
        None => {
            let basename = url::Url::parse(url)
                .ok()
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|s| s.last().map(|seg| seg.to_string()))
                })
                .filter(|s| !s.is_empty());

            let mut name = basename.unwrap_or_else(|| {
                let epoch = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                format!("media_{epoch}")
            });

            let lower = name.to_lowercase();
            match kind {
                MediaType::Image
                    if ![".jpg", ".jpeg", ".png", ".webp", ".heic"]
                        .iter()
                        .any(|ext| lower.ends_with(ext)) =>
                {
                    name.push_str(".jpg");
                }
                MediaType::Video if !lower.ends_with(".mp4") => {
                    name.push_str(".mp4");
                }
                _ => {}
            }
            name
        }
    };

    // Right-truncate oversized names, keeping the extension-bearing tail.
    let count = filename.chars().count();
    if count > MAX_FILENAME_LEN {
        filename = filename.chars().skip(count - MAX_FILENAME_LEN).collect();
    }
    filename
}

/// Set the file's modification time to the post's capture date.
///
/// Failure is cosmetic (the file sorts wrong), so it only warns.
pub fn apply_timestamp(path: &Path, epoch_secs: i64) {
    let Ok(secs) = u64::try_from(epoch_secs) else {
        return;
    };
    let mtime = UNIX_EPOCH + Duration::from_secs(secs);
    let result = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(mtime));
    if let Err(e) = result {
        tracing::warn!("failed to set timestamp on {}: {e}", path.display());
    }
}
