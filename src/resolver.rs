//! Structured-data resolver for the platform's internal post endpoint.
//!
//! One GET per post against the `?__a=1&__d=dis` endpoint with headers that
//! identify the request as an in-page XHR. The payload has no stable schema;
//! two known envelope shapes (GraphQL-style and feed-item-style) are parsed
//! behind this one module with lenient optional-field structs, so a shape
//! change touches nothing else. Every failure mode is soft: the resolver
//! returns `success = false` with zero-valued fields, never an error.

use crate::model::MediaItem;
use serde::Deserialize;
use std::time::Duration;

const ENDPOINT_SUFFIX: &str = "?__a=1&__d=dis";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Authoritative media descriptors plus engagement metrics for one post.
#[derive(Debug, Clone, Default)]
pub struct PostDetails {
    pub success: bool,
    pub likes: u64,
    pub views: u64,
    /// Platform-reported capture timestamp (epoch seconds), 0 when absent.
    pub taken_at: i64,
    /// Media items in document order (carousel children preserve order).
    pub media: Vec<MediaItem>,
}

// ── Wire shapes ─────────────────────────────────────────────────────────────
//
// Unknown or missing fields default rather than failing the parse.

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Envelope {
    graphql: Option<GraphqlEnvelope>,
    items: Vec<MediaNode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GraphqlEnvelope {
    shortcode_media: Option<MediaNode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MediaNode {
    taken_at_timestamp: i64,
    video_view_count: u64,
    edge_media_preview_like: LikeEdge,
    is_video: bool,
    video_url: Option<String>,
    display_resources: Vec<DisplayResource>,
    display_url: Option<String>,
    edge_sidecar_to_children: Option<Sidecar>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LikeEdge {
    count: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DisplayResource {
    src: String,
    config_width: u32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Sidecar {
    edges: Vec<SidecarEdge>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SidecarEdge {
    node: MediaNode,
}

/// Structured-data endpoint client.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: reqwest::Client,
    referer: String,
}

impl Resolver {
    /// Build a resolver whose requests mimic the in-page browsing context.
    pub fn new(user_agent: &str, referer: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            client,
            referer: referer.to_string(),
        }
    }

    /// Fetch post details from the internal endpoint. Soft-fails.
    pub async fn fetch_post_details(&self, post_url: &str) -> PostDetails {
        let api_url = format!("{}{ENDPOINT_SUFFIX}", normalize_post_url(post_url));

        let response = self
            .client
            .get(&api_url)
            .header("Referer", &self.referer)
            .header("x-requested-with", "XMLHttpRequest")
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("structured-data request failed: {e}");
                return PostDetails::default();
            }
        };

        if response.status().as_u16() != 200 {
            tracing::debug!("structured-data endpoint returned {}", response.status());
            return PostDetails::default();
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("structured-data body read failed: {e}");
                return PostDetails::default();
            }
        };

        let details = parse_post_details(&body);
        if details.success {
            tracing::debug!(
                "post details: likes={} views={} media={}",
                details.likes,
                details.views,
                details.media.len()
            );
        }
        details
    }
}

/// Strip the query string so endpoint parameters are the only ones present.
pub fn normalize_post_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Parse a structured-data response body. Soft-fails to the zero value.
///
/// Tries the GraphQL envelope first, then the feed-item envelope.
pub fn parse_post_details(body: &str) -> PostDetails {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("structured-data parse failed: {e}");
            return PostDetails::default();
        }
    };

    let node = envelope
        .graphql
        .and_then(|g| g.shortcode_media)
        .or_else(|| envelope.items.into_iter().next());

    let node = match node {
        Some(n) => n,
        None => return PostDetails::default(),
    };

    let mut details = PostDetails {
        success: true,
        likes: node.edge_media_preview_like.count,
        views: node.video_view_count,
        taken_at: node.taken_at_timestamp,
        media: Vec::new(),
    };

    match &node.edge_sidecar_to_children {
        // Carousel: children in document order, each extracted independently.
        Some(sidecar) => {
            for edge in &sidecar.edges {
                if let Some(item) = extract_node(&edge.node) {
                    details.media.push(item);
                }
            }
        }
        None => {
            if let Some(item) = extract_node(&node) {
                details.media.push(item);
            }
        }
    }

    details
}

/// Extract one media item from a node.
///
/// Video nodes yield their direct video URL. Image nodes prefer the widest
/// entry of the resolution ladder, falling back to the single display URL.
fn extract_node(node: &MediaNode) -> Option<MediaItem> {
    if node.is_video {
        return node.video_url.as_ref().map(MediaItem::video);
    }

    if let Some(best) = node.display_resources.iter().max_by_key(|r| r.config_width) {
        let mut item = MediaItem::image(&best.src);
        item.width = Some(best.config_width);
        return Some(item);
    }

    node.display_url.as_ref().map(MediaItem::image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;

    #[test]
    fn test_normalize_strips_query() {
        assert_eq!(
            normalize_post_url("https://www.instagram.com/p/ABC/?igshid=xyz"),
            "https://www.instagram.com/p/ABC/"
        );
        assert_eq!(
            normalize_post_url("https://www.instagram.com/p/ABC/"),
            "https://www.instagram.com/p/ABC/"
        );
    }

    #[test]
    fn test_graphql_envelope_single_image() {
        let body = r#"{
            "graphql": {
                "shortcode_media": {
                    "taken_at_timestamp": 1700000000,
                    "edge_media_preview_like": {"count": 321},
                    "is_video": false,
                    "display_resources": [
                        {"src": "https://cdn/640.jpg", "config_width": 640},
                        {"src": "https://cdn/1080.jpg", "config_width": 1080},
                        {"src": "https://cdn/750.jpg", "config_width": 750}
                    ]
                }
            }
        }"#;
        let details = parse_post_details(body);
        assert!(details.success);
        assert_eq!(details.likes, 321);
        assert_eq!(details.taken_at, 1_700_000_000);
        assert_eq!(details.media.len(), 1);
        assert_eq!(details.media[0].source_url, "https://cdn/1080.jpg");
        assert_eq!(details.media[0].width, Some(1080));
    }

    #[test]
    fn test_feed_item_envelope_video() {
        let body = r#"{
            "items": [{
                "taken_at_timestamp": 1690000000,
                "video_view_count": 9000,
                "is_video": true,
                "video_url": "https://cdn/clip.mp4"
            }]
        }"#;
        let details = parse_post_details(body);
        assert!(details.success);
        assert_eq!(details.views, 9000);
        assert_eq!(details.media.len(), 1);
        assert_eq!(details.media[0].media_type, MediaType::Video);
        assert_eq!(details.media[0].source_url, "https://cdn/clip.mp4");
    }

    #[test]
    fn test_carousel_preserves_document_order() {
        let body = r#"{
            "graphql": {
                "shortcode_media": {
                    "is_video": false,
                    "edge_sidecar_to_children": {
                        "edges": [
                            {"node": {"is_video": false, "display_url": "https://cdn/1.jpg"}},
                            {"node": {"is_video": true, "video_url": "https://cdn/2.mp4"}},
                            {"node": {"is_video": false, "display_url": "https://cdn/3.jpg"}}
                        ]
                    }
                }
            }
        }"#;
        let details = parse_post_details(body);
        assert_eq!(details.media.len(), 3);
        assert_eq!(details.media[0].source_url, "https://cdn/1.jpg");
        assert_eq!(details.media[1].source_url, "https://cdn/2.mp4");
        assert_eq!(details.media[2].source_url, "https://cdn/3.jpg");
    }

    #[test]
    fn test_display_url_fallback_without_ladder() {
        let body = r#"{
            "graphql": {
                "shortcode_media": {
                    "is_video": false,
                    "display_url": "https://cdn/only.jpg"
                }
            }
        }"#;
        let details = parse_post_details(body);
        assert_eq!(details.media[0].source_url, "https://cdn/only.jpg");
        assert_eq!(details.media[0].width, None);
    }

    #[test]
    fn test_malformed_and_empty_payloads_soft_fail() {
        assert!(!parse_post_details("<!DOCTYPE html><html>").success);
        assert!(!parse_post_details("{}").success);
        assert!(!parse_post_details(r#"{"items": []}"#).success);
        let details = parse_post_details("not json");
        assert_eq!(details.likes, 0);
        assert!(details.media.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let body = r#"{
            "graphql": {
                "shortcode_media": {
                    "is_video": true,
                    "video_url": "https://cdn/v.mp4",
                    "some_future_field": {"nested": [1, 2, 3]}
                }
            },
            "status": "ok"
        }"#;
        let details = parse_post_details(body);
        assert!(details.success);
        assert_eq!(details.media.len(), 1);
    }
}
