//! Traffic capture buffer fed by CDP `Network.responseReceived` events.
//!
//! The buffer is append-only from the browser's event task and drained by
//! the harvester. One buffer belongs to exactly one page navigation at a
//! time, so the orchestrator flushes it before each post to keep candidates
//! from leaking across posts.

use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::sync::{Arc, Mutex};

/// One captured transport-level response.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: String,
    pub mime_type: String,
}

/// Shared capture buffer.
#[derive(Debug, Clone, Default)]
pub struct TrafficCapture {
    buf: Arc<Mutex<Vec<ResponseEvent>>>,
}

impl TrafficCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a response record.
    pub fn push(&self, event: ResponseEvent) {
        if let Ok(mut buf) = self.buf.lock() {
            buf.push(event);
        }
    }

    /// Take all buffered records, leaving the buffer empty.
    pub fn drain(&self) -> Vec<ResponseEvent> {
        match self.buf.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(_) => Vec::new(),
        }
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.buf.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to response events on a page and feed them into this
    /// buffer. The listener task ends when the page goes away.
    pub async fn attach(&self, page: &Page) -> anyhow::Result<()> {
        let mut events = page.event_listener::<EventResponseReceived>().await?;
        let capture = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                capture.push(ResponseEvent {
                    url: event.response.url.clone(),
                    mime_type: event.response.mime_type.clone(),
                });
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let capture = TrafficCapture::new();
        capture.push(ResponseEvent {
            url: "https://cdn.example.com/a.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
        });
        capture.push(ResponseEvent {
            url: "https://cdn.example.com/b.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
        });
        assert_eq!(capture.len(), 2);

        let drained = capture.drain();
        assert_eq!(drained.len(), 2);
        assert!(capture.is_empty());
        assert!(capture.drain().is_empty());
    }

    #[test]
    fn test_clones_share_one_buffer() {
        let capture = TrafficCapture::new();
        let writer = capture.clone();
        writer.push(ResponseEvent {
            url: "https://cdn.example.com/a.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
        });
        assert_eq!(capture.len(), 1);
    }
}
