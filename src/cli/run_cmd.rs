//! `reelgrab run <handle>` — harvest a profile's media into local folders.

use crate::browser::{human_pause, BrowserSession, SessionOptions};
use crate::cancel::CancelToken;
use crate::dom::{self, OwnershipPolicy};
use crate::download::Downloader;
use crate::error::HarvestError;
use crate::orchestrator::{HarvestConfig, Orchestrator};
use crate::prescan::{self, SortOrder};
use crate::resolver::Resolver;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const PLATFORM_BASE: &str = "https://www.instagram.com";
const NAV_TIMEOUT: Duration = Duration::from_secs(20);
/// Feed scroll rounds before link extraction.
const SCROLL_ROUNDS: usize = 3;
const MAX_HANDLE_LEN: usize = 30;

/// Parsed options for one harvest run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: String,
    pub output_dir: PathBuf,
    pub login: bool,
    pub tagged: bool,
    pub headless: bool,
    pub mute: bool,
    pub sort: SortOrder,
    pub strict_owner: bool,
}

/// Run the harvest command.
pub async fn run(options: RunOptions) -> Result<()> {
    if !is_safe_handle(&options.target) {
        bail!("invalid handle: {:?}", options.target);
    }

    // The directory layout is created up front; the pipeline only writes
    // into directories that already exist.
    let root = options.output_dir.join(&options.target);
    let video_dir = root.join("videos");
    let image_dir = root.join("images");
    let data_dir = root.join("data");
    for dir in [&video_dir, &image_dir, &data_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("stop requested; finishing the current post");
                cancel.cancel();
            }
        });
    }

    let session = BrowserSession::launch(&SessionOptions {
        headless: options.headless,
        mute_audio: options.mute,
    })
    .await?;

    let result = harvest_profile(&session, &options, cancel, video_dir, image_dir, data_dir).await;

    // The browser closes on every path, including errors.
    session.close().await;
    result
}

async fn harvest_profile(
    session: &BrowserSession,
    options: &RunOptions,
    cancel: CancelToken,
    video_dir: PathBuf,
    image_dir: PathBuf,
    data_dir: PathBuf,
) -> Result<()> {
    if options.login {
        session
            .navigate(&format!("{PLATFORM_BASE}/accounts/login/"), NAV_TIMEOUT)
            .await?;
        println!("Log in in the browser window, then press Enter to continue...");
        wait_for_enter().await?;
    }

    let profile_url = if options.tagged {
        format!("{PLATFORM_BASE}/{}/tagged/", options.target)
    } else {
        format!("{PLATFORM_BASE}/{}/", options.target)
    };
    tracing::info!("opening profile {profile_url}");
    session.navigate(&profile_url, NAV_TIMEOUT).await?;
    human_pause(2.0, 4.0).await;

    session.scroll_feed(SCROLL_ROUNDS).await?;

    let html = session.html().await?;
    let links = dom::extract_post_links(&html, PLATFORM_BASE);
    if links.is_empty() {
        tracing::warn!("no posts found; the profile may be private or empty");
        return Ok(());
    }
    tracing::info!("found {} post(s)", links.len());

    let user_agent = session.user_agent().await;
    let resolver = Resolver::new(&user_agent, &profile_url);
    let downloader = Downloader::new(&user_agent);

    let queue = prescan::build_queue(links, options.sort, &resolver).await;

    let config = HarvestConfig {
        target: options.target.clone(),
        tagged: options.tagged,
        ownership: if options.strict_owner {
            OwnershipPolicy::Strict
        } else {
            OwnershipPolicy::Lenient
        },
        video_dir,
        image_dir,
        data_dir,
    };

    let orchestrator = Orchestrator {
        session,
        resolver: &resolver,
        downloader: &downloader,
        config: &config,
        cancel,
    };

    let summary = orchestrator
        .run(&queue)
        .await
        .map_err(|e| match e {
            HarvestError::SessionLost(msg) => anyhow::anyhow!("browser session lost: {msg}"),
            HarvestError::Other(e) => e,
        })?;

    println!(
        "Done: {} processed, {} skipped, {} failed.",
        summary.processed, summary.skipped, summary.failed
    );
    Ok(())
}

/// Block until the user presses Enter, off the async runtime.
async fn wait_for_enter() -> Result<()> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| ())
    })
    .await
    .context("stdin task failed")?
    .context("stdin read failed")?;
    Ok(())
}

/// Is this a plausible account handle, safe to embed in paths and URLs?
pub fn is_safe_handle(handle: &str) -> bool {
    if handle.is_empty() || handle.len() > MAX_HANDLE_LEN {
        return false;
    }
    if handle.contains("..") || handle.starts_with('.') || handle.ends_with('.') {
        return false;
    }
    handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
