//! Network-traffic candidate harvester.
//!
//! Watches captured response events for media streams, probes every
//! candidate, and picks the best video/audio pair: highest pixel count for
//! video, longest duration for audio (a longer audio candidate is more
//! likely the complete track rather than a preview fragment).

use crate::capture::{ResponseEvent, TrafficCapture};
use crate::model::{MediaCandidate, MediaKind, StreamPair};
use crate::probe::StreamProber;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

/// Fixed polling budget: 15 rounds, 0.5 s apart.
const POLL_ROUNDS: usize = 15;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn byte_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[&?]byte(start|end)=[0-9]+").unwrap())
}

/// Strip byte-range query parameters so range-sharded requests for the same
/// logical stream collapse to one candidate.
pub fn normalize_stream_url(url: &str) -> String {
    byte_range_re().replace_all(url, "").into_owned()
}

/// Does this response look like a media stream?
pub fn is_stream_response(event: &ResponseEvent) -> bool {
    event.mime_type.contains("video")
        || event.mime_type.contains("audio")
        || event.url.contains(".mp4")
}

/// Accept a captured response as a candidate URL, or reject it.
///
/// Requires an absolute scheme and rejects initialization-segment URLs
/// (substring heuristic, matching how the CDN names them).
fn accept_candidate(event: &ResponseEvent) -> Option<String> {
    if !is_stream_response(event) {
        return None;
    }
    if !event.url.starts_with("http") {
        return None;
    }
    let clean = normalize_stream_url(&event.url);
    if clean.contains("init") {
        return None;
    }
    Some(clean)
}

/// Poll the capture buffer for media candidates and resolve the best
/// video/audio pair.
///
/// Returns `None` when the polling budget is exhausted without observing at
/// least one candidate of each kind. Probe failures are already soft, so
/// transient errors during a round simply leave the lists unchanged.
pub async fn find_stream_pair(
    capture: &TrafficCapture,
    prober: &dyn StreamProber,
) -> Option<StreamPair> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates: Vec<String> = Vec::new();
    let mut analyzed: HashSet<String> = HashSet::new();
    let mut videos: Vec<MediaCandidate> = Vec::new();
    let mut audios: Vec<MediaCandidate> = Vec::new();

    for round in 0..POLL_ROUNDS {
        // Collect: scan newly captured responses.
        for event in capture.drain() {
            if let Some(clean) = accept_candidate(&event) {
                if seen.insert(clean.clone()) {
                    candidates.push(clean);
                }
            }
        }

        // Analyze: while either side is unresolved, probe everything new.
        if videos.is_empty() || audios.is_empty() {
            if !candidates.is_empty() {
                tracing::debug!("analyzing {} candidate stream(s)", candidates.len());
            }
            for url in &candidates {
                if !analyzed.insert(url.clone()) {
                    continue;
                }
                let meta = prober.probe(url).await;
                let candidate = MediaCandidate {
                    url: url.clone(),
                    kind: meta.kind,
                    width: meta.width,
                    height: meta.height,
                    duration_seconds: meta.duration,
                };
                match meta.kind {
                    MediaKind::Video => {
                        tracing::debug!(
                            "video candidate: {}x{} ({:.1}s)",
                            meta.width,
                            meta.height,
                            meta.duration
                        );
                        videos.push(candidate);
                    }
                    MediaKind::Audio => {
                        tracing::debug!("audio candidate: {:.1}s", meta.duration);
                        audios.push(candidate);
                    }
                    _ => {}
                }
            }
        }

        // Decide: once both lists are non-empty, pick the best of each.
        if !videos.is_empty() && !audios.is_empty() {
            return Some(select_pair(videos, audios));
        }

        if round + 1 < POLL_ROUNDS {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    None
}

/// Pick the highest-pixel-count video and the longest audio.
fn select_pair(mut videos: Vec<MediaCandidate>, mut audios: Vec<MediaCandidate>) -> StreamPair {
    videos.sort_by(|a, b| b.pixel_count().cmp(&a.pixel_count()));
    audios.sort_by(|a, b| {
        b.duration_seconds
            .partial_cmp(&a.duration_seconds)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let video = videos.remove(0);
    let audio = audios.remove(0);
    tracing::debug!(
        "selected pair: video {}x{} | audio {:.1}s",
        video.width,
        video.height,
        audio.duration_seconds
    );
    StreamPair { video, audio }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{StreamMeta, StreamProber};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubProber {
        responses: HashMap<String, StreamMeta>,
        calls: Mutex<Vec<String>>,
    }

    impl StubProber {
        fn new(responses: Vec<(&str, StreamMeta)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StreamProber for StubProber {
        async fn probe(&self, url: &str) -> StreamMeta {
            self.calls.lock().unwrap().push(url.to_string());
            self.responses.get(url).cloned().unwrap_or_default()
        }
    }

    fn video_meta(width: u32, height: u32, duration: f64) -> StreamMeta {
        StreamMeta {
            kind: MediaKind::Video,
            width,
            height,
            duration,
        }
    }

    fn audio_meta(duration: f64) -> StreamMeta {
        StreamMeta {
            kind: MediaKind::Audio,
            width: 0,
            height: 0,
            duration,
        }
    }

    fn event(url: &str, mime: &str) -> ResponseEvent {
        ResponseEvent {
            url: url.to_string(),
            mime_type: mime.to_string(),
        }
    }

    #[test]
    fn test_byte_range_params_stripped() {
        let a = normalize_stream_url("https://cdn.example.com/v.mp4?bytestart=0&byteend=524287");
        let b =
            normalize_stream_url("https://cdn.example.com/v.mp4?bytestart=524288&byteend=1048575");
        assert_eq!(a, b);
        assert_eq!(a, "https://cdn.example.com/v.mp4");
    }

    #[test]
    fn test_non_range_params_survive() {
        let url = normalize_stream_url("https://cdn.example.com/v.mp4?efg=abc&bytestart=100");
        assert_eq!(url, "https://cdn.example.com/v.mp4?efg=abc");
    }

    #[test]
    fn test_stream_response_detection() {
        assert!(is_stream_response(&event("https://c/x", "video/mp4")));
        assert!(is_stream_response(&event("https://c/x", "audio/mp4")));
        assert!(is_stream_response(&event("https://c/x.mp4?a=1", "application/octet-stream")));
        assert!(!is_stream_response(&event("https://c/x.jpg", "image/jpeg")));
    }

    #[test]
    fn test_init_segments_and_relative_urls_rejected() {
        assert!(accept_candidate(&event("blob:https://c/x.mp4", "video/mp4")).is_none());
        assert!(accept_candidate(&event("https://c/init.mp4", "video/mp4")).is_none());
        assert!(accept_candidate(&event("https://c/seg1.mp4", "video/mp4")).is_some());
    }

    #[tokio::test]
    async fn test_best_pair_selection() {
        // Videos 1920x1080 and 1280x720; audios 30.2s and 12.0s. The pair
        // must be the 1080p video and the 30.2s audio.
        let capture = TrafficCapture::new();
        capture.push(event("https://c/v720.mp4", "video/mp4"));
        capture.push(event("https://c/v1080.mp4", "video/mp4"));
        capture.push(event("https://c/a_short.mp4", "audio/mp4"));
        capture.push(event("https://c/a_full.mp4", "audio/mp4"));

        let prober = StubProber::new(vec![
            ("https://c/v720.mp4", video_meta(1280, 720, 30.0)),
            ("https://c/v1080.mp4", video_meta(1920, 1080, 30.0)),
            ("https://c/a_short.mp4", audio_meta(12.0)),
            ("https://c/a_full.mp4", audio_meta(30.2)),
        ]);

        let pair = find_stream_pair(&capture, &prober).await.unwrap();
        assert_eq!(pair.video.url, "https://c/v1080.mp4");
        assert_eq!(pair.video.pixel_count(), 1920 * 1080);
        assert_eq!(pair.audio.url, "https://c/a_full.mp4");
        assert!((pair.audio.duration_seconds - 30.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_range_sharded_urls_probe_once() {
        let capture = TrafficCapture::new();
        capture.push(event("https://c/v.mp4?bytestart=0&byteend=9", "video/mp4"));
        capture.push(event("https://c/v.mp4?bytestart=10&byteend=19", "video/mp4"));
        capture.push(event("https://c/a.mp4", "audio/mp4"));

        let prober = StubProber::new(vec![
            ("https://c/v.mp4", video_meta(640, 360, 10.0)),
            ("https://c/a.mp4", audio_meta(10.0)),
        ]);

        let pair = find_stream_pair(&capture, &prober).await.unwrap();
        assert_eq!(pair.video.url, "https://c/v.mp4");

        let calls = prober.calls.lock().unwrap();
        assert_eq!(
            calls.iter().filter(|c| c.as_str() == "https://c/v.mp4").count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_none() {
        // Video only, no audio: the loop must exhaust its budget and give up.
        let capture = TrafficCapture::new();
        capture.push(event("https://c/v.mp4", "video/mp4"));

        let prober = StubProber::new(vec![("https://c/v.mp4", video_meta(640, 360, 10.0))]);

        assert!(find_stream_pair(&capture, &prober).await.is_none());
    }
}
