//! Per-post acquisition orchestration.
//!
//! For each post the orchestrator runs the discovery strategies in priority
//! order — structured data, then captured traffic, then rendered markup —
//! and turns the first non-empty result into files on disk plus one
//! immutable metadata record. Only a lost browser session is allowed to
//! escape the loop; every other failure degrades and the loop advances.

use crate::browser::{human_pause, BrowserSession};
use crate::cancel::CancelToken;
use crate::dom::{self, OwnershipPolicy};
use crate::download::{apply_timestamp, Downloader};
use crate::error::{is_connection_noise, HarvestError};
use crate::harvest;
use crate::model::{MediaItem, MediaType, PostRecord, StreamPair};
use crate::mux::{self, MuxTags};
use crate::probe::{self, FfprobeProber};
use crate::prescan::QueuedPost;
use crate::resolver::{PostDetails, Resolver};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Filename stem length cap (the record keeps the full caption).
const MAX_STEM_LEN: usize = 60;
const NAV_TIMEOUT: Duration = Duration::from_secs(20);

/// Everything the per-post controller needs to know about the run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Target account handle.
    pub target: String,
    /// Whether the queue came from the tagged feed (ownership check skipped;
    /// tagged posts belong to other accounts by definition).
    pub tagged: bool,
    pub ownership: OwnershipPolicy,
    /// Pre-created destination directories; the core never creates them.
    pub video_dir: PathBuf,
    pub image_dir: PathBuf,
    pub data_dir: PathBuf,
}

/// Outcome of the discovery cascade for one post.
#[derive(Debug)]
pub enum Discovery {
    /// Authoritative media list from the structured-data endpoint.
    Structured(Vec<MediaItem>),
    /// A video/audio pair harvested from captured traffic.
    Harvested(StreamPair),
    /// Media scraped out of the rendered markup.
    DomFallback(Vec<MediaItem>),
    /// Nothing found anywhere.
    None,
}

/// Counters reported at the end of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Per-post acquisition controller.
pub struct Orchestrator<'a> {
    pub session: &'a BrowserSession,
    pub resolver: &'a Resolver,
    pub downloader: &'a Downloader,
    pub config: &'a HarvestConfig,
    pub cancel: CancelToken,
}

impl Orchestrator<'_> {
    /// Run the acquisition loop over the queue, strictly sequentially.
    ///
    /// All strategies share one browser session and one capture buffer, so
    /// posts are processed one at a time and stale traffic is flushed
    /// before each navigation.
    pub async fn run(&self, queue: &[QueuedPost]) -> Result<RunSummary, HarvestError> {
        let mut summary = RunSummary::default();

        for (index, post) in queue.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!("stop requested; ending loop");
                break;
            }

            let metrics = post
                .details
                .as_ref()
                .map(|d| format!(" | {} likes, {} views", d.likes, d.views))
                .unwrap_or_default();
            tracing::info!("[{}/{}] processing {}{metrics}", index + 1, queue.len(), post.url);

            match self.process_post(post).await {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.skipped += 1,
                Err(HarvestError::SessionLost(msg)) => {
                    tracing::error!("browser session lost: {msg}");
                    return Err(HarvestError::SessionLost(msg));
                }
                Err(HarvestError::Other(e)) => {
                    let msg = format!("{e:#}");
                    if self.cancel.is_cancelled() && is_connection_noise(&msg) {
                        tracing::debug!("suppressing shutdown error: {msg}");
                    } else {
                        tracing::error!("post failed: {msg}");
                    }
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Process one post end to end. Returns `false` when the post was
    /// skipped by ownership verification.
    async fn process_post(&self, post: &QueuedPost) -> Result<bool, HarvestError> {
        // Flush stale traffic so candidates cannot leak across posts.
        self.session.capture().drain();

        self.session
            .navigate(&post.url, NAV_TIMEOUT)
            .await
            .map_err(|e| HarvestError::SessionLost(format!("{e:#}")))?;
        human_pause(2.0, 4.0).await;

        let html = self
            .session
            .html()
            .await
            .map_err(|e| HarvestError::SessionLost(format!("{e:#}")))?;

        if !self.config.tagged
            && !dom::verify_post_owner(&html, &self.config.target, self.config.ownership)
        {
            tracing::debug!("skipping post: owned by another account");
            return Ok(false);
        }

        let page_meta = dom::extract_page_meta(&html);

        // Structured details: reuse the pre-scan result, else fetch now.
        let details = match &post.details {
            Some(d) if d.success => d.clone(),
            _ => self.resolver.fetch_post_details(&post.url).await,
        };

        // Best available capture date: platform-reported, then
        // page-rendered, then wall clock.
        let taken_at = if details.taken_at > 0 {
            details.taken_at
        } else {
            page_meta.taken_at.unwrap_or_else(now_epoch)
        };

        let caption = strip_attribution(page_meta.caption.as_deref().unwrap_or("")).to_string();
        let stem = filename_stem(&caption, &post.url);

        // Unmuting makes the player request the audio rendition.
        self.session.try_unmute().await;

        let discovery = self.discover(&details, &html).await;

        let mut record = PostRecord {
            url: post.url.clone(),
            caption: caption.clone(),
            date: taken_at,
            likes: details.likes,
            views: details.views,
            media_files: Vec::new(),
        };

        let mut failure: Option<anyhow::Error> = None;
        match discovery {
            Discovery::Structured(items) => {
                tracing::debug!("method: structured data ({} item(s))", items.len());
                self.download_items(&items, &stem, taken_at, &mut record).await;
            }
            Discovery::Harvested(pair) => {
                tracing::debug!("method: traffic harvest");
                if let Err(e) = self
                    .merge_or_save(&pair, &stem, &caption, &post.url, taken_at, &mut record)
                    .await
                {
                    failure = Some(e);
                }
            }
            Discovery::DomFallback(items) => {
                tracing::debug!("method: DOM fallback ({} item(s))", items.len());
                self.download_items(&items, &stem, taken_at, &mut record).await;
            }
            Discovery::None => {
                tracing::warn!("no media found for {}", post.url);
            }
        }

        // The record lands even when acquisition failed.
        self.write_record(&record);
        if let Some(e) = failure {
            return Err(e.into());
        }
        Ok(true)
    }

    /// Run the discovery cascade and return the first non-empty result.
    async fn discover(&self, details: &PostDetails, html: &str) -> Discovery {
        if details.success && !details.media.is_empty() {
            return Discovery::Structured(details.media.clone());
        }

        if let Some(pair) = harvest::find_stream_pair(self.session.capture(), &FfprobeProber).await
        {
            return Discovery::Harvested(pair);
        }

        let items = dom::extract_media(html);
        if !items.is_empty() {
            Discovery::DomFallback(items)
        } else {
            Discovery::None
        }
    }

    /// Download a list of discovered items; carousel items get `_<n>`
    /// suffixes. Failures skip the item, siblings still attempt.
    async fn download_items(
        &self,
        items: &[MediaItem],
        stem: &str,
        taken_at: i64,
        record: &mut PostRecord,
    ) {
        for (index, item) in items.iter().enumerate() {
            let suffix = if items.len() == 1 {
                String::new()
            } else {
                format!("_{}", index + 1)
            };
            let name = format!("{stem}{suffix}.{}", item.media_type.extension());
            let dir = match item.media_type {
                MediaType::Video => &self.config.video_dir,
                MediaType::Image => &self.config.image_dir,
            };

            if let Some((filename, _)) = self
                .downloader
                .download(
                    self.session,
                    &item.source_url,
                    dir,
                    Some(&name),
                    item.media_type,
                    Some(taken_at),
                )
                .await
            {
                record.media_files.push(filename);
            }
        }
    }

    /// Download a harvested pair, merge if the durations agree, otherwise
    /// keep the video-only stream under the final name.
    async fn merge_or_save(
        &self,
        pair: &StreamPair,
        stem: &str,
        caption: &str,
        post_url: &str,
        taken_at: i64,
        record: &mut PostRecord,
    ) -> Result<()> {
        let mut temps = TempGuard::default();
        let prefix: String = stem.chars().take(10).collect();

        let video = self
            .downloader
            .download(
                self.session,
                &pair.video.url,
                &self.config.video_dir,
                Some(&format!("temp_v_{prefix}.mp4")),
                MediaType::Video,
                Some(taken_at),
            )
            .await;
        let Some((_, video_path)) = video else {
            anyhow::bail!("video stream download failed");
        };
        temps.track(video_path.clone());

        let final_name = format!("{stem}.mp4");
        let final_path = self.config.video_dir.join(&final_name);

        let audio = self
            .downloader
            .download(
                self.session,
                &pair.audio.url,
                &self.config.video_dir,
                Some(&format!("temp_a_{prefix}.mp4")),
                MediaType::Video,
                Some(taken_at),
            )
            .await;

        let mut merged = false;
        if let Some((_, audio_path)) = audio {
            temps.track(audio_path.clone());

            let video_secs = probe::probe_duration(&video_path.to_string_lossy()).await;
            let audio_secs = probe::probe_duration(&audio_path.to_string_lossy()).await;

            if mux::durations_mergeable(video_secs, audio_secs) {
                let tags = MuxTags {
                    caption: caption.to_string(),
                    source_url: post_url.to_string(),
                    handle: self.config.target.clone(),
                    taken_at: Some(taken_at),
                };
                match mux::merge_streams(&video_path, &audio_path, &final_path, &tags).await {
                    Ok(()) => {
                        tracing::info!("merged: {final_name}");
                        apply_timestamp(&final_path, taken_at);
                        record.media_files.push(final_name.clone());
                        merged = true;
                    }
                    Err(e) => tracing::error!("merge failed: {e:#}"),
                }
            } else {
                tracing::debug!(
                    "durations diverge (video {video_secs:.1}s, audio {audio_secs:.1}s); saving video only"
                );
            }
        }

        if !merged && !final_path.exists() {
            std::fs::rename(&video_path, &final_path).context("rename to final name failed")?;
            temps.release(&video_path);
            apply_timestamp(&final_path, taken_at);
            tracing::info!("saved (video only): {final_name}");
            record.media_files.push(final_name);
        }

        Ok(())
    }

    /// Serialize the record once; it is never touched again.
    fn write_record(&self, record: &PostRecord) {
        let shortcode = shortcode_from_url(&record.url);
        let path = self.config.data_dir.join(format!("{shortcode}.json"));
        match serde_json::to_string_pretty(record) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::error!("failed to write record {}: {e}", path.display());
                }
            }
            Err(e) => tracing::error!("failed to serialize record: {e}"),
        }
    }
}

/// Temporary stream files, removed on exit — success or failure.
#[derive(Debug, Default)]
struct TempGuard {
    paths: Vec<PathBuf>,
}

impl TempGuard {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Stop tracking a path that graduated to a final file.
    fn release(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Drop the platform attribution suffix the page appends to captions.
pub fn strip_attribution(caption: &str) -> &str {
    caption.split("on Instagram").next().unwrap_or(caption).trim()
}

/// Caption reduced to a filesystem-safe filename stem.
pub fn sanitize_caption(caption: &str) -> String {
    const UNSAFE: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
    caption
        .chars()
        .filter(|c| !UNSAFE.contains(c))
        .take(MAX_STEM_LEN)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Filename stem for a post: sanitized caption, else the short identifier.
pub fn filename_stem(caption: &str, post_url: &str) -> String {
    let stem = sanitize_caption(caption);
    if stem.is_empty() {
        format!("post_{}", shortcode_from_url(post_url))
    } else {
        stem
    }
}

/// Last path segment of a post URL.
pub fn shortcode_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("unknown")
        .to_string()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
