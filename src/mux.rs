//! Lossless video/audio muxing via ffmpeg.
//!
//! Streams are combined with stream copy only (no re-encode). The merge is
//! gated on the two durations agreeing within [`MAX_DURATION_DRIFT`]; when
//! they diverge the caller saves the video-only stream instead. A non-zero
//! ffmpeg exit is a soft failure for the same reason.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Maximum |video − audio| duration difference that still merges.
pub const MAX_DURATION_DRIFT: f64 = 2.0;

/// Caption length cap inside container metadata.
const MAX_METADATA_CAPTION: usize = 255;

/// ffmpeg gets more headroom than a probe; it has to copy both streams.
const MUX_TIMEOUT: Duration = Duration::from_secs(20);

/// Everything the mux step embeds into the output container.
#[derive(Debug, Clone, Default)]
pub struct MuxTags {
    /// Post caption; becomes title + description, truncated and
    /// quote-sanitized.
    pub caption: String,
    /// Source post URL; becomes the comment tag.
    pub source_url: String,
    /// Account handle; becomes the artist tag (`@handle`).
    pub handle: String,
    /// Capture date (epoch seconds); becomes creation_time.
    pub taken_at: Option<i64>,
}

/// Should these two streams be merged at all?
pub fn durations_mergeable(video_secs: f64, audio_secs: f64) -> bool {
    (video_secs - audio_secs).abs() <= MAX_DURATION_DRIFT
}

/// Caption as embedded in container metadata: quotes softened, capped.
fn metadata_caption(caption: &str) -> String {
    caption.replace('"', "'").chars().take(MAX_METADATA_CAPTION).collect()
}

/// Build the full ffmpeg argument list for a stream-copy merge.
///
/// The `--` end-of-options marker sits before the positional output path;
/// the input paths are bound to `-i` and cannot be mistaken for flags.
pub fn mux_args(video: &Path, audio: &Path, output: &Path, tags: &MuxTags) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        video.to_string_lossy().into_owned(),
        "-i".to_string(),
        audio.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    if let Some(ts) = tags.taken_at {
        if let Some(dt) = chrono::DateTime::from_timestamp(ts, 0) {
            args.push("-metadata".to_string());
            args.push(format!("creation_time={}", dt.format("%Y-%m-%d %H:%M:%S")));
        }
    }

    if !tags.caption.is_empty() {
        let caption = metadata_caption(&tags.caption);
        args.push("-metadata".to_string());
        args.push(format!("title={caption}"));
        args.push("-metadata".to_string());
        args.push(format!("description={caption}"));
    }

    args.push("-metadata".to_string());
    args.push(format!("comment={}", tags.source_url));
    args.push("-metadata".to_string());
    args.push(format!("artist=@{}", tags.handle));

    args.push("--".to_string());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Merge a video and an audio file into one output container.
pub async fn merge_streams(
    video: &Path,
    audio: &Path,
    output: &Path,
    tags: &MuxTags,
) -> Result<()> {
    let args = mux_args(video, audio, output, tags);

    let result = tokio::time::timeout(MUX_TIMEOUT, Command::new("ffmpeg").args(&args).output())
        .await
        .context("ffmpeg timed out")?
        .context("failed to spawn ffmpeg")?;

    if !result.status.success() {
        bail!(
            "ffmpeg exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tags() -> MuxTags {
        MuxTags {
            caption: "say \"cheese\"".to_string(),
            source_url: "https://www.instagram.com/p/ABC123/".to_string(),
            handle: "santiago_photos".to_string(),
            taken_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_merge_gate_thresholds() {
        // Δ=1.5s merges, Δ=3.0s does not.
        assert!(durations_mergeable(30.0, 31.5));
        assert!(!durations_mergeable(30.0, 33.0));
        // Boundary is inclusive.
        assert!(durations_mergeable(30.0, 32.0));
    }

    #[test]
    fn test_marker_precedes_output_path() {
        let args = mux_args(
            &PathBuf::from("v.mp4"),
            &PathBuf::from("a.mp4"),
            &PathBuf::from("-rf"),
            &tags(),
        );
        let marker = args.iter().rposition(|a| a == "--").unwrap();
        let output = args.iter().position(|a| a == "-rf").unwrap();
        assert!(marker < output);
        assert_eq!(output, args.len() - 1);
    }

    #[test]
    fn test_stream_copy_and_metadata_tags() {
        let args = mux_args(
            &PathBuf::from("v.mp4"),
            &PathBuf::from("a.mp4"),
            &PathBuf::from("out.mp4"),
            &tags(),
        );
        let copy = args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy");
        assert!(copy);
        assert!(args.iter().any(|a| a == "comment=https://www.instagram.com/p/ABC123/"));
        assert!(args.iter().any(|a| a == "artist=@santiago_photos"));
        // Quotes in the caption are softened.
        assert!(args.iter().any(|a| a == "title=say 'cheese'"));
        assert!(args.iter().any(|a| a.starts_with("creation_time=2023-11-14")));
    }

    #[test]
    fn test_caption_truncated_in_metadata() {
        let long = "x".repeat(400);
        assert_eq!(metadata_caption(&long).len(), 255);
    }
}
