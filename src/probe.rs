//! Stream metadata probe backed by ffprobe.
//!
//! Every probe carries a bounded timeout and places a `--` end-of-options
//! marker before the URL/path argument, since probed URLs come from captured
//! traffic and may start with `-`. Any failure — timeout, non-zero exit,
//! malformed output — degrades to a zero-value result; the probe never
//! returns an error to its caller.

use crate::model::MediaKind;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;

/// Probe timeout for remote stream URLs.
const URL_PROBE_TIMEOUT: Duration = Duration::from_secs(8);
/// Probe timeout for local files (duration only).
const FILE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing a single URL or file.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub kind: MediaKind,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

impl Default for StreamMeta {
    fn default() -> Self {
        Self {
            kind: MediaKind::Unknown,
            width: 0,
            height: 0,
            duration: 0.0,
        }
    }
}

/// Seam for the traffic harvester, so candidate analysis is testable
/// without ffprobe on the path.
#[async_trait]
pub trait StreamProber: Send + Sync {
    async fn probe(&self, url: &str) -> StreamMeta;
}

/// ffprobe-backed prober.
#[derive(Debug, Clone, Default)]
pub struct FfprobeProber;

#[async_trait]
impl StreamProber for FfprobeProber {
    async fn probe(&self, url: &str) -> StreamMeta {
        probe_url(url).await
    }
}

/// Argument list for probing a URL. The `--` marker must precede the
/// untrusted URL argument.
pub fn probe_args(url: &str) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "stream=codec_type,width,height:format=duration".to_string(),
        "-of".to_string(),
        "json".to_string(),
        "--".to_string(),
        url.to_string(),
    ]
}

/// Argument list for probing the duration of a local file.
pub fn duration_args(path: &str) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "json".to_string(),
        "--".to_string(),
        path.to_string(),
    ]
}

/// Probe a stream URL for type, resolution, and duration.
pub async fn probe_url(url: &str) -> StreamMeta {
    let stdout = match run_ffprobe(&probe_args(url), URL_PROBE_TIMEOUT).await {
        Some(out) => out,
        None => return StreamMeta::default(),
    };
    parse_probe_output(&stdout)
}

/// Probe a local media file's duration in seconds. Returns 0.0 on failure.
pub async fn probe_duration(path: &str) -> f64 {
    let stdout = match run_ffprobe(&duration_args(path), FILE_PROBE_TIMEOUT).await {
        Some(out) => out,
        None => return 0.0,
    };
    parse_probe_output(&stdout).duration
}

async fn run_ffprobe(args: &[String], timeout: Duration) -> Option<String> {
    let output = tokio::time::timeout(timeout, Command::new("ffprobe").args(args).output()).await;

    match output {
        Ok(Ok(out)) => {
            if !out.status.success() {
                tracing::debug!("ffprobe exited non-zero: {}", out.status);
                return None;
            }
            Some(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        Ok(Err(e)) => {
            tracing::debug!("ffprobe spawn failed: {e}");
            None
        }
        Err(_) => {
            tracing::debug!("ffprobe timed out after {timeout:?}");
            None
        }
    }
}

/// Parse ffprobe JSON output into a [`StreamMeta`].
///
/// The first video-typed stream wins; audio detection does not
/// short-circuit, so a video container with audio tracks still classifies
/// as video. Missing or malformed fields default.
pub fn parse_probe_output(stdout: &str) -> StreamMeta {
    let mut meta = StreamMeta::default();

    let data: Value = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("malformed ffprobe output: {e}");
            return meta;
        }
    };

    if let Some(dur) = data
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
    {
        meta.duration = dur;
    }

    if let Some(streams) = data.get("streams").and_then(|s| s.as_array()) {
        for stream in streams {
            match stream.get("codec_type").and_then(|c| c.as_str()) {
                Some("video") => {
                    meta.kind = MediaKind::Video;
                    meta.width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
                    meta.height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;
                    break;
                }
                Some("audio") => {
                    meta.kind = MediaKind::Audio;
                }
                _ => {}
            }
        }
    }

    meta
}
