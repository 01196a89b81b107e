//! HTTP fetch layer.
//!
//! All engine-side downloads go through [`HttpFetcher`], which keeps a
//! single reqwest client and publishes throughput observations on the
//! event bus after each transfer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hopradio_common::{EngineEvent, EventBus};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::Result;

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    bus: EventBus,
    total_bytes: Arc<AtomicU64>,
}

impl HttpFetcher {
    pub fn new(bus: EventBus) -> Self {
        Self {
            client: reqwest::Client::new(),
            bus,
            total_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Download a resource fully into memory, recording throughput.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        trace!(url, "fetching");
        let start = Instant::now();
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let elapsed = start.elapsed().as_secs_f64().max(1e-3);

        let total = self
            .total_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed)
            + bytes.len() as u64;
        let bytes_per_sec = (bytes.len() as f64 / elapsed) as u64;
        debug!(url, len = bytes.len(), bytes_per_sec, "fetch complete");
        self.bus.emit_lossy(EngineEvent::NetworkStats {
            bytes_per_sec,
            total_bytes: total,
            timestamp: chrono::Utc::now(),
        });

        Ok(bytes.to_vec())
    }

    /// Fetch and deserialize a JSON resource.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    /// Total bytes downloaded over the fetcher's lifetime.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

/// Guess a symphonia format hint from a locator's file extension.
pub fn hint_from_locator(locator: &str) -> Option<String> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let ext = path.rsplit('.').next()?;
    match ext.to_ascii_lowercase().as_str() {
        e @ ("mp3" | "flac" | "aac" | "m4a" | "ogg" | "wav") => Some(e.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_bytes_returns_body_and_emits_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 512]))
            .mount(&server)
            .await;

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let fetcher = HttpFetcher::new(bus);
        let bytes = fetcher
            .fetch_bytes(&format!("{}/a.mp3", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes.len(), 512);
        assert_eq!(fetcher.total_bytes(), 512);

        match rx.try_recv().unwrap() {
            EngineEvent::NetworkStats { total_bytes, .. } => assert_eq!(total_bytes, 512),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_error_status_surfaces_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(EventBus::new(4));
        let result = fetcher.fetch_bytes(&format!("{}/missing", server.uri())).await;
        match result {
            Err(Error::Http(e)) => assert!(e.is_status()),
            other => panic!("expected HTTP status error, got {other:?}"),
        }
    }

    #[test]
    fn hint_strips_query_and_lowercases() {
        assert_eq!(
            hint_from_locator("https://s.example/track.MP3?token=x").as_deref(),
            Some("mp3")
        );
        assert_eq!(hint_from_locator("https://s.example/stream"), None);
    }
}
