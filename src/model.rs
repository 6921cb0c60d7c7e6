//! Core data model for the acquisition pipeline.
//!
//! `MediaCandidate` is the ephemeral, probe-derived unit used during traffic
//! harvesting; `MediaItem` is what discovery strategies hand to the download
//! layer; `PostRecord` is the flat per-post metadata record written once at
//! the end of processing.

use serde::{Deserialize, Serialize};

/// Classification of a probed stream URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    /// Probe failed or the URL does not point at a recognizable stream.
    Unknown,
}

/// The kind of media a discovery strategy produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Image,
}

impl MediaType {
    /// Default file extension for this media type.
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Video => "mp4",
            MediaType::Image => "jpg",
        }
    }
}

/// An unverified stream URL with probe-derived metadata.
///
/// Created during traffic harvesting, discarded once a [`StreamPair`] is
/// chosen.
#[derive(Debug, Clone)]
pub struct MediaCandidate {
    pub url: String,
    pub kind: MediaKind,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl MediaCandidate {
    /// Derived rendition size. Higher pixel count ≈ higher quality rendition.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One best video and one best audio candidate, chosen for merging.
///
/// Both members' kind matches their slot; selection only happens once at
/// least one candidate of each kind has been observed.
#[derive(Debug, Clone)]
pub struct StreamPair {
    pub video: MediaCandidate,
    pub audio: MediaCandidate,
}

/// A single downloadable media entry produced by a discovery strategy.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub media_type: MediaType,
    pub source_url: String,
    pub poster_url: Option<String>,
    pub width: Option<u32>,
    pub alt_text: Option<String>,
}

impl MediaItem {
    /// A video item with just a source URL.
    pub fn video(url: impl Into<String>) -> Self {
        Self {
            media_type: MediaType::Video,
            source_url: url.into(),
            poster_url: None,
            width: None,
            alt_text: None,
        }
    }

    /// An image item with just a source URL.
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            media_type: MediaType::Image,
            source_url: url.into(),
            poster_url: None,
            width: None,
            alt_text: None,
        }
    }
}

/// Flat metadata record for one processed post.
///
/// Written exactly once per attempted post (even when `media_files` is
/// empty) and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    /// Canonical post URL.
    pub url: String,
    /// Caption text, best available source.
    pub caption: String,
    /// Capture date in epoch seconds. Best available: platform-reported,
    /// then page-rendered, then wall clock.
    pub date: i64,
    pub likes: u64,
    pub views: u64,
    /// Saved filenames in discovery/append order.
    pub media_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_count_derivation() {
        let c = MediaCandidate {
            url: "https://cdn.example.com/v.mp4".to_string(),
            kind: MediaKind::Video,
            width: 1920,
            height: 1080,
            duration_seconds: 30.0,
        };
        assert_eq!(c.pixel_count(), 1920 * 1080);
    }

    #[test]
    fn test_post_record_roundtrip() {
        let record = PostRecord {
            url: "https://www.instagram.com/p/ABC123/".to_string(),
            caption: "sunset".to_string(),
            date: 1_708_276_800,
            likes: 42,
            views: 1000,
            media_files: vec!["sunset.mp4".to_string()],
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: PostRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.url, record.url);
        assert_eq!(parsed.media_files, record.media_files);
    }
}
