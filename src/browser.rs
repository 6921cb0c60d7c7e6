//! Browser session wrapper around chromiumoxide.
//!
//! One session owns one page; all discovery strategies share it, so the
//! acquisition loop drives it strictly sequentially. The session also
//! exposes the JS fetch bridge used to materialize `blob:` URLs.

use crate::capture::TrafficCapture;
use crate::download::BlobFetcher;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Fallback UA when the page cannot report its own.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Find the browser binary path.
pub fn find_browser() -> Option<PathBuf> {
    // 1. REELGRAB_BROWSER_PATH env
    if let Ok(p) = std::env::var("REELGRAB_BROWSER_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.reelgrab/browser/
    if let Some(home) = dirs::home_dir() {
        let candidates = vec![
            home.join(".reelgrab/browser/chrome-linux64/chrome"),
            home.join(".reelgrab/browser/chrome"),
        ];
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch-time knobs for the session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub mute_audio: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: false,
            mute_audio: true,
        }
    }
}

/// A live browser session with traffic capture attached.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    capture: TrafficCapture,
}

impl BrowserSession {
    /// Launch the browser and open one page with capture wired up.
    pub async fn launch(options: &SessionOptions) -> Result<Self> {
        let binary = find_browser()
            .context("no browser found; set REELGRAB_BROWSER_PATH or install Chromium")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(binary)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled");

        if options.headless {
            builder = builder.headless_mode(HeadlessMode::New);
        } else {
            builder = builder.with_head();
        }
        if options.mute_audio {
            builder = builder.arg("--mute-audio");
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        // Drive the CDP connection until the browser goes away.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create page")?;

        let capture = TrafficCapture::new();
        capture.attach(&page).await?;

        Ok(Self {
            browser,
            page,
            capture,
        })
    }

    /// The capture buffer fed by this session's page.
    pub fn capture(&self) -> &TrafficCapture {
        &self.capture
    }

    /// Navigate the page and wait for the load to settle.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;
        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout:?}"),
        }
    }

    /// Snapshot of the rendered markup.
    pub async fn html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))
    }

    /// The session's real user agent, so plain HTTP requests blend in.
    pub async fn user_agent(&self) -> String {
        match self.page.evaluate("navigator.userAgent").await {
            Ok(result) => result
                .into_value::<String>()
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            Err(_) => DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Scroll the feed down in a non-linear, human-like way.
    pub async fn scroll_feed(&self, rounds: usize) -> Result<()> {
        for _ in 0..rounds {
            let step: u32 = rand::thread_rng().gen_range(400..=800);
            self.page
                .evaluate(format!("window.scrollBy(0, {step})"))
                .await
                .context("scroll failed")?;
            human_pause(1.5, 3.5).await;
        }
        Ok(())
    }

    /// Best-effort click on the player's mute toggle.
    ///
    /// Unmuting makes the player request the audio rendition, which is what
    /// puts an audio candidate into the traffic capture.
    pub async fn try_unmute(&self) {
        let script = r#"
            (() => {
                const selectors = [
                    '[aria-label="Audio is muted"]',
                    '[aria-label="Click to enable audio"]',
                ];
                for (const sel of selectors) {
                    const el = document.querySelector(sel);
                    if (el) {
                        const btn = el.closest('button,[role="button"]') || el;
                        btn.click();
                        return true;
                    }
                }
                return false;
            })()
        "#;
        match self.page.evaluate(script).await {
            Ok(result) => {
                if result.into_value::<bool>().unwrap_or(false) {
                    tracing::debug!("clicked mute toggle");
                }
            }
            Err(e) => tracing::debug!("unmute attempt failed: {e}"),
        }
        human_pause(0.5, 1.0).await;
    }

    /// Close the page and the browser.
    pub async fn close(mut self) {
        let _ = self.page.close().await;
        let _ = self.browser.close().await;
    }
}

#[async_trait]
impl BlobFetcher for BrowserSession {
    /// Fetch a `blob:` URL inside the page and return its bytes.
    ///
    /// The blob only exists in the page's JS heap, so the bytes travel out
    /// as a base64 data URL.
    async fn fetch_blob(&self, url: &str) -> Result<Vec<u8>> {
        let quoted = serde_json::to_string(url)?;
        let script = format!(
            r#"
            (async () => {{
                const res = await fetch({quoted});
                const blob = await res.blob();
                return await new Promise((resolve) => {{
                    const reader = new FileReader();
                    reader.onloadend = () => resolve(reader.result);
                    reader.readAsDataURL(blob);
                }});
            }})()
            "#
        );

        let result = self
            .page
            .evaluate(script)
            .await
            .context("blob fetch script failed")?;
        let data_url: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("blob fetch returned no data: {e:?}"))?;

        decode_data_url(&data_url)
    }
}

/// Decode a `data:<mime>;base64,<payload>` string into bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let encoded = match data_url.split_once(',') {
        Some((_, payload)) => payload,
        None => data_url,
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("invalid base64 in blob payload")
}

/// Sleep a random interval to look less like a machine.
pub async fn human_pause(min_secs: f64, max_secs: f64) {
    let secs = rand::thread_rng().gen_range(min_secs..max_secs);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}
