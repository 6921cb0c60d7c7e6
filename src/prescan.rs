//! Engagement pre-scan and queue ordering.
//!
//! Sorting by likes or views needs post details up front, so the resolver
//! is fanned out over a small bounded worker pool. Each call is independent
//! and side-effect-free; results fan back into one list. A small random
//! jitter precedes each call to avoid correlated request bursts.

use crate::resolver::{PostDetails, Resolver};
use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use rand::Rng;
use rand::seq::SliceRandom;
use std::time::Duration;

/// Bounded fan-out width for the pre-scan.
const SCAN_WORKERS: usize = 5;

/// Processing order of the discovered posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortOrder {
    /// Feed order, newest first.
    #[default]
    Default,
    /// Oldest first.
    Reverse,
    /// Shuffled.
    Random,
    /// Most-liked first (requires pre-scan).
    Likes,
    /// Most-viewed first (requires pre-scan).
    Views,
}

impl SortOrder {
    /// Does this order need engagement metrics before the main loop?
    pub fn needs_prescan(self) -> bool {
        matches!(self, SortOrder::Likes | SortOrder::Views)
    }
}

/// A post queued for acquisition, with pre-scanned details when available.
#[derive(Debug, Clone)]
pub struct QueuedPost {
    pub url: String,
    pub details: Option<PostDetails>,
}

/// Build the processing queue in the requested order.
pub async fn build_queue(links: Vec<String>, order: SortOrder, resolver: &Resolver) -> Vec<QueuedPost> {
    if order.needs_prescan() {
        let mut queue = prescan(links, resolver).await;
        sort_by_engagement(&mut queue, order);
        if let Some(top) = queue.first().and_then(|q| q.details.as_ref()) {
            tracing::info!(
                "pre-scan complete; top post has {} like(s), {} view(s)",
                top.likes,
                top.views
            );
        }
        return queue;
    }

    let mut queue: Vec<QueuedPost> = links
        .into_iter()
        .map(|url| QueuedPost { url, details: None })
        .collect();

    match order {
        SortOrder::Reverse => queue.reverse(),
        SortOrder::Random => queue.shuffle(&mut rand::thread_rng()),
        _ => {}
    }
    queue
}

/// Fetch details for every link on a bounded worker pool.
async fn prescan(links: Vec<String>, resolver: &Resolver) -> Vec<QueuedPost> {
    let total = links.len();
    tracing::info!("pre-scanning {total} post(s) on {SCAN_WORKERS} worker(s)");

    stream::iter(links)
        .map(|url| async move {
            // Jitter to de-correlate the burst.
            let jitter = rand::thread_rng().gen_range(50..=200u64);
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let details = resolver.fetch_post_details(&url).await;
            QueuedPost {
                url,
                details: Some(details),
            }
        })
        .buffer_unordered(SCAN_WORKERS)
        .collect()
        .await
}

fn sort_by_engagement(queue: &mut [QueuedPost], order: SortOrder) {
    let key = |post: &QueuedPost| -> u64 {
        let details = match &post.details {
            Some(d) => d,
            None => return 0,
        };
        match order {
            SortOrder::Likes => details.likes,
            SortOrder::Views => details.views,
            _ => 0,
        }
    };
    queue.sort_by(|a, b| key(b).cmp(&key(a)));
}
