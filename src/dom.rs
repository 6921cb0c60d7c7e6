//! DOM fallback extraction over rendered page markup.
//!
//! The markup has no stable schema, so media extraction cascades through
//! heuristics in strict priority order. Video tags and responsive images
//! always both run (a post can carry both); the remaining strategies only
//! run while nothing has been found. One seen-URL set spans the whole call
//! so no URL is ever emitted twice.
//!
//! This module also hosts the other markup readers: page metadata, post-link
//! discovery, and post ownership verification.

use crate::model::MediaItem;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Smallest responsive-image width worth keeping.
const MIN_IMAGE_WIDTH: u32 = 400;
/// Width at which an image counts as an HD rendition.
const HD_IMAGE_WIDTH: u32 = 1080;
/// srcset attributes shorter than this are decorative icons.
const MIN_SRCSET_LEN: usize = 30;

/// URL substrings that mark a known high-resolution rendition.
const RESOLUTION_TOKENS: [&str; 5] = ["1080", "1440", "s750", "p1080", "p750"];
/// Tokens accepted for bare `<img>` tags inside the post article.
const ARTICLE_TOKENS: [&str; 5] = ["s1080x", "s1440x", "1080w", "1280", "s750"];

fn srcset_candidate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s+(\d+)(?:w|px)?$").unwrap())
}

fn post_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(p|reel)/([\w-]+)").unwrap())
}

/// Extract high-quality media from a rendered post page.
pub fn extract_media(html: &str) -> Vec<MediaItem> {
    let document = Html::parse_document(html);
    let mut media: Vec<MediaItem> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    collect_video_tags(&document, &mut media, &mut seen);
    collect_srcset_images(&document, &mut media, &mut seen);

    if media.is_empty() {
        collect_lazy_images(&document, &mut media, &mut seen);
    }
    if media.is_empty() {
        collect_jsonld_media(&document, &mut media, &mut seen);
    }
    if media.is_empty() {
        collect_meta_tag_media(&document, &mut media, &mut seen);
    }
    if media.is_empty() {
        collect_article_images(&document, &mut media, &mut seen);
    }

    media
}

// ── Strategy 1: direct <video> elements ─────────────────────────────────────

fn collect_video_tags(document: &Html, media: &mut Vec<MediaItem>, seen: &mut HashSet<String>) {
    let sel = Selector::parse("video[src]").unwrap();
    for element in document.select(&sel) {
        let src = element.value().attr("src").unwrap_or("");
        if src.is_empty() || !seen.insert(src.to_string()) {
            continue;
        }
        let mut item = MediaItem::video(src);
        item.poster_url = element.value().attr("poster").map(|p| p.to_string());
        media.push(item);
    }
}

// ── Strategy 2: high-resolution responsive images ───────────────────────────

/// Parse a srcset attribute into `(width, url)` candidates.
pub fn parse_srcset(srcset: &str) -> Vec<(u32, String)> {
    let mut candidates = Vec::new();
    for part in srcset.split(',') {
        let part = part.trim();
        if let Some(caps) = srcset_candidate_re().captures(part) {
            if let Ok(width) = caps[2].parse::<u32>() {
                candidates.push((width, caps[1].to_string()));
            }
        }
    }
    candidates
}

fn collect_srcset_images(document: &Html, media: &mut Vec<MediaItem>, seen: &mut HashSet<String>) {
    let sel = Selector::parse("img[srcset]").unwrap();
    let mut kept: Vec<(u32, String, String)> = Vec::new();

    for element in document.select(&sel) {
        let srcset = element.value().attr("srcset").unwrap_or("");
        if srcset.len() < MIN_SRCSET_LEN {
            continue;
        }
        let alt = element.value().attr("alt").unwrap_or("").to_string();

        // The widest variant of this image, if it clears the floor.
        if let Some((width, url)) = parse_srcset(srcset).into_iter().max_by_key(|(w, _)| *w) {
            if width >= MIN_IMAGE_WIDTH && !seen.contains(&url) {
                kept.push((width, url, alt));
            }
        }
    }

    // Global best-first ordering across all kept images.
    kept.sort_by(|a, b| b.0.cmp(&a.0));

    for (width, url, alt) in kept {
        if !seen.insert(url.clone()) {
            continue;
        }
        if width >= HD_IMAGE_WIDTH {
            tracing::debug!("HD image: {width}px");
        }
        let mut item = MediaItem::image(url);
        item.width = Some(width);
        item.alt_text = if alt.is_empty() { None } else { Some(alt) };
        media.push(item);
    }
}

// ── Strategy 3: lazy-loaded image attributes ────────────────────────────────

fn collect_lazy_images(document: &Html, media: &mut Vec<MediaItem>, seen: &mut HashSet<String>) {
    let sel = Selector::parse("img[data-src]").unwrap();
    for element in document.select(&sel) {
        let src = element.value().attr("data-src").unwrap_or("");
        if src.is_empty() || seen.contains(src) {
            continue;
        }
        if RESOLUTION_TOKENS.iter().any(|t| src.contains(t)) {
            seen.insert(src.to_string());
            media.push(MediaItem::image(src));
            tracing::debug!("lazy-loaded image accepted");
        }
    }
}

// ── Strategy 4: JSON-LD structured data ─────────────────────────────────────

fn collect_jsonld_media(document: &Html, media: &mut Vec<MediaItem>, seen: &mut HashSet<String>) {
    let sel = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    for element in document.select(&sel) {
        let text = element.inner_html();
        let value: serde_json::Value = match serde_json::from_str(text.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let content_url = value
            .get("contentUrl")
            .or_else(|| value.get("thumbnailUrl"))
            .and_then(|u| u.as_str());
        if let Some(url) = content_url {
            if (url.contains(".jpg") || url.contains(".png")) && seen.insert(url.to_string()) {
                media.push(MediaItem::image(url));
                tracing::debug!("JSON-LD image accepted");
            }
        }
    }
}

// ── Strategy 5: meta-tag fallback ───────────────────────────────────────────

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let sel = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
}

fn collect_meta_tag_media(document: &Html, media: &mut Vec<MediaItem>, seen: &mut HashSet<String>) {
    // og:video first; og:image is frequently center-cropped, last resort.
    if let Some(url) = meta_content(document, "og:video") {
        if seen.insert(url.clone()) {
            media.push(MediaItem::video(url));
        }
    }
    if let Some(url) = meta_content(document, "og:image") {
        if seen.insert(url.clone()) {
            tracing::warn!("falling back to og:image (quality/crop risk)");
            media.push(MediaItem::image(url));
        }
    }
}

// ── Strategy 6: article-scoped <img> tags ───────────────────────────────────

fn collect_article_images(document: &Html, media: &mut Vec<MediaItem>, seen: &mut HashSet<String>) {
    let sel = Selector::parse("article img[src]").unwrap();
    for element in document.select(&sel) {
        let src = element.value().attr("src").unwrap_or("");
        if src.is_empty() || seen.contains(src) {
            continue;
        }
        if ARTICLE_TOKENS.iter().any(|t| src.contains(t)) {
            seen.insert(src.to_string());
            media.push(MediaItem::image(src));
        }
    }
}

// ── Page metadata ───────────────────────────────────────────────────────────

/// Caption and capture date as rendered on the page.
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub caption: Option<String>,
    /// Epoch seconds parsed from the page's `<time datetime>` tag.
    pub taken_at: Option<i64>,
}

/// Extract caption and date from rendered markup.
pub fn extract_page_meta(html: &str) -> PageMeta {
    let document = Html::parse_document(html);
    let mut meta = PageMeta::default();

    let time_sel = Selector::parse("time[datetime]").unwrap();
    if let Some(el) = document.select(&time_sel).next() {
        meta.taken_at = el
            .value()
            .attr("datetime")
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.timestamp());
    }

    // og:description is the most stable caption source; the rendered caption
    // markup churns too often to select against.
    meta.caption = meta_content(&document, "og:description").or_else(|| {
        let title_sel = Selector::parse("title").unwrap();
        document
            .select(&title_sel)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    meta
}

// ── Post-link discovery ─────────────────────────────────────────────────────

/// Extract unique post links from a rendered feed view, in first-seen order.
///
/// Accepts both absolute and relative `/p/` and `/reel/` hrefs; reels are
/// normalized to the canonical `/p/<code>/` form.
pub fn extract_post_links(html: &str, base: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse("a[href]").unwrap();

    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&sel) {
        let href = element.value().attr("href").unwrap_or("");
        if let Some(caps) = post_link_re().captures(href) {
            let url = format!("{}/p/{}/", base.trim_end_matches('/'), &caps[2]);
            if seen.insert(url.clone()) {
                links.push(url);
            }
        }
    }

    tracing::debug!("found {} unique post link(s)", links.len());
    links
}

// ── Ownership verification ──────────────────────────────────────────────────

/// What to do when ownership cannot be established either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipPolicy {
    /// Assume the post belongs to the target (recall-leaning).
    #[default]
    Lenient,
    /// Reject the post unless ownership is confirmed.
    Strict,
}

/// Check whether the rendered post belongs to the target handle.
///
/// A header profile link naming the target, or an `og:title` crediting
/// `(@target)`, confirms ownership. A header profile link to a *different*
/// handle (one without `/p/` or `/explore/` qualifiers) rejects it. When
/// neither signal exists the configured policy decides.
pub fn verify_post_owner(html: &str, target: &str, policy: OwnershipPolicy) -> bool {
    let document = Html::parse_document(html);
    let sel = Selector::parse("header a[href]").unwrap();

    let hrefs: Vec<String> = document
        .select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .map(|h| h.to_string())
        .collect();

    let needle = format!("/{target}/");
    if hrefs.iter().any(|h| h.contains(&needle)) {
        return true;
    }

    if let Some(title) = meta_content(&document, "og:title") {
        if title.contains(&format!("(@{target})")) {
            return true;
        }
    }

    if !hrefs.is_empty() {
        for href in &hrefs {
            if !href.contains("/p/") && !href.contains("/explore/") && !href.contains(target) {
                tracing::debug!("post owner appears to be someone else: {href}");
                return false;
            }
        }
        return true;
    }

    match policy {
        OwnershipPolicy::Lenient => true,
        OwnershipPolicy::Strict => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;

    #[test]
    fn test_srcset_parsing_units() {
        let candidates = parse_srcset(
            "https://cdn/a_640.jpg 640w, https://cdn/a_1080.jpg 1080w, https://cdn/a_150.jpg 150px",
        );
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[1], (1080, "https://cdn/a_1080.jpg".to_string()));
    }

    #[test]
    fn test_video_and_srcset_both_accumulate() {
        let html = r#"
        <html><body><article>
        <video src="blob:https://site/abc" poster="https://cdn/poster.jpg"></video>
        <img srcset="https://cdn/img_640.jpg 640w, https://cdn/img_1440.jpg 1440w" alt="a dog" />
        </article></body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].media_type, MediaType::Video);
        assert_eq!(media[0].poster_url.as_deref(), Some("https://cdn/poster.jpg"));
        assert_eq!(media[1].media_type, MediaType::Image);
        assert_eq!(media[1].width, Some(1440));
        assert_eq!(media[1].alt_text.as_deref(), Some("a dog"));
    }

    #[test]
    fn test_below_width_floor_excluded() {
        // 1600px image kept, 350px image dropped.
        let html = r#"
        <html><body>
        <img srcset="https://cdn/big_800.jpg 800w, https://cdn/big_1600.jpg 1600w" />
        <img srcset="https://cdn/small_200.jpg 200w, https://cdn/small_350.jpg 350w" />
        </body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].source_url, "https://cdn/big_1600.jpg");

        // With only the 350px image nothing survives strategy 2 and the
        // later strategies have nothing to offer either.
        let html = r#"
        <html><body>
        <img srcset="https://cdn/small_200.jpg 200w, https://cdn/small_350.jpg 350w" />
        </body></html>
        "#;
        assert!(extract_media(html).is_empty());
    }

    #[test]
    fn test_kept_images_sorted_widest_first() {
        let html = r#"
        <html><body>
        <img srcset="https://cdn/mid_720.jpg 720w, https://cdn/mid_900.jpg 900w" />
        <img srcset="https://cdn/big_1080.jpg 1080w, https://cdn/big_1440.jpg 1440w" />
        </body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media[0].width, Some(1440));
        assert_eq!(media[1].width, Some(900));
    }

    #[test]
    fn test_short_srcset_treated_as_icon() {
        let html = r#"<html><body><img srcset="/i.jpg 32w" /></body></html>"#;
        assert!(extract_media(html).is_empty());
    }

    #[test]
    fn test_lazy_loaded_fallback_requires_token() {
        let html = r#"
        <html><body>
        <img data-src="https://cdn/photo_p1080x1080.jpg" />
        <img data-src="https://cdn/avatar_small.jpg" />
        </body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].source_url, "https://cdn/photo_p1080x1080.jpg");
    }

    #[test]
    fn test_jsonld_fallback() {
        let html = r#"
        <html><head>
        <script type="application/ld+json">
        {"@type": "ImageObject", "contentUrl": "https://cdn/full.jpg"}
        </script>
        </head><body></body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].source_url, "https://cdn/full.jpg");
    }

    #[test]
    fn test_og_video_beats_og_image() {
        let html = r#"
        <html><head>
        <meta property="og:image" content="https://cdn/cropped.jpg" />
        <meta property="og:video" content="https://cdn/clip.mp4" />
        </head><body></body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media[0].media_type, MediaType::Video);
        assert_eq!(media[0].source_url, "https://cdn/clip.mp4");
    }

    #[test]
    fn test_article_image_last_resort() {
        let html = r#"
        <html><body><article>
        <img src="https://cdn/photo_s1080x1080.jpg" />
        <img src="https://cdn/sticker.gif" />
        </article></body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].source_url, "https://cdn/photo_s1080x1080.jpg");
    }

    #[test]
    fn test_single_srcset_image_end_to_end() {
        // A video-free post with one srcset image of best width 1440px
        // yields exactly one image item at that width.
        let html = r#"
        <html><body><article>
        <img srcset="https://cdn/p_640.jpg 640w, https://cdn/p_1080.jpg 1080w, https://cdn/p_1440.jpg 1440w" alt="" />
        </article></body></html>
        "#;
        let media = extract_media(html);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].media_type, MediaType::Image);
        assert_eq!(media[0].width, Some(1440));
    }

    #[test]
    fn test_page_meta_extraction() {
        let html = r#"
        <html><head>
        <meta property="og:description" content="42 Likes - sunset at the pier" />
        <title>ignored</title>
        </head><body>
        <time datetime="2024-05-04T12:30:00+00:00">May 4</time>
        </body></html>
        "#;
        let meta = extract_page_meta(html);
        assert_eq!(meta.caption.as_deref(), Some("42 Likes - sunset at the pier"));
        assert_eq!(meta.taken_at, Some(1_714_825_800));
    }

    #[test]
    fn test_post_link_discovery_normalizes_reels() {
        let html = r#"
        <html><body>
        <a href="/p/AAA111/">one</a>
        <a href="https://www.instagram.com/reel/BBB222/?igshid=x">two</a>
        <a href="/p/AAA111/?variant">dup</a>
        <a href="/explore/">not a post</a>
        </body></html>
        "#;
        let links = extract_post_links(html, "https://www.instagram.com");
        assert_eq!(
            links,
            vec![
                "https://www.instagram.com/p/AAA111/",
                "https://www.instagram.com/p/BBB222/",
            ]
        );
    }

    #[test]
    fn test_owner_confirmed_by_header_link() {
        let html = r#"
        <html><body><header>
        <a href="/santiago_photos/">santiago</a>
        </header></body></html>
        "#;
        assert!(verify_post_owner(html, "santiago_photos", OwnershipPolicy::Strict));
    }

    #[test]
    fn test_foreign_profile_link_rejects() {
        // A header profile link to another handle, with no /p/ or /explore/
        // qualifiers, rejects the post.
        let html = r#"
        <html><body><header>
        <a href="/someone_else/">someone</a>
        </header></body></html>
        "#;
        assert!(!verify_post_owner(html, "santiago_photos", OwnershipPolicy::Lenient));
    }

    #[test]
    fn test_uncertain_ownership_follows_policy() {
        let html = "<html><body><main>no header here</main></body></html>";
        assert!(verify_post_owner(html, "santiago_photos", OwnershipPolicy::Lenient));
        assert!(!verify_post_owner(html, "santiago_photos", OwnershipPolicy::Strict));
    }

    #[test]
    fn test_owner_confirmed_by_og_title() {
        let html = r#"
        <html><head>
        <meta property="og:title" content="Santiago (@santiago_photos) shared a photo" />
        </head><body></body></html>
        "#;
        assert!(verify_post_owner(html, "santiago_photos", OwnershipPolicy::Strict));
    }
}
