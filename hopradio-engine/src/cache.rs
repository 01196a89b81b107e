//! Offline cache: audio blobs keyed by locator plus the saved playlist.
//!
//! Backed by a single SQLite database. Blobs survive failed download
//! batches, so a retried batch only fetches what is still missing.

use hopradio_common::{EngineEvent, EventBus, OfflineEntry};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::net::HttpFetcher;

#[derive(Clone)]
pub struct OfflineCache {
    pool: SqlitePool,
}

impl OfflineCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the cache database at `db_path`.
    pub async fn open(db_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&format!("sqlite://{db_path}?mode=rwc"))
            .await?;
        let cache = Self::new(pool);
        cache.init().await?;
        Ok(cache)
    }

    /// Create tables when missing.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                locator    TEXT PRIMARY KEY,
                bytes      BLOB NOT NULL,
                size       INTEGER NOT NULL,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_playlist (
                position INTEGER PRIMARY KEY,
                locator  TEXT NOT NULL,
                title    TEXT NOT NULL,
                artist   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn contains(&self, locator: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM blobs WHERE locator = ?")
            .bind(locator)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn store(&self, locator: &str, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO blobs (locator, bytes, size, fetched_at) VALUES (?, ?, ?, ?)",
        )
        .bind(locator)
        .bind(bytes)
        .bind(bytes.len() as i64)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT bytes FROM blobs WHERE locator = ?")
            .bind(locator)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("bytes")))
    }

    /// Replace the saved offline playlist.
    pub async fn save_playlist(&self, entries: &[OfflineEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM offline_playlist")
            .execute(&mut *tx)
            .await?;
        for (position, entry) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO offline_playlist (position, locator, title, artist) VALUES (?, ?, ?, ?)",
            )
            .bind(position as i64)
            .bind(&entry.locator)
            .bind(&entry.title)
            .bind(&entry.artist)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// The saved offline playlist in position order.
    pub async fn playlist(&self) -> Result<Vec<OfflineEntry>> {
        let rows = sqlx::query(
            "SELECT locator, title, artist FROM offline_playlist ORDER BY position ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| OfflineEntry {
                locator: r.get("locator"),
                title: r.get("title"),
                artist: r.get("artist"),
            })
            .collect())
    }

    /// Download an offline mix into the cache.
    ///
    /// Already-cached entries are skipped. An HTTP status error on one
    /// entry logs it and moves on; a transport error aborts the whole
    /// batch with a `DownloadFailed` event, keeping what was stored.
    /// Progress events are whole percentages over the entry count,
    /// non-decreasing, ending at 100 on success.
    ///
    /// Returns the number of newly stored blobs.
    pub async fn download(
        &self,
        fetcher: &HttpFetcher,
        entries: &[OfflineEntry],
        bus: &EventBus,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let total = entries.len();
        let mut stored = 0usize;
        let mut kept: Vec<OfflineEntry> = Vec::with_capacity(total);

        for (completed, entry) in entries.iter().enumerate() {
            if self.contains(&entry.locator).await? {
                debug!(locator = %entry.locator, "already cached, skipping");
                kept.push(entry.clone());
            } else {
                match fetcher.fetch_bytes(&entry.locator).await {
                    Ok(bytes) => {
                        self.store(&entry.locator, &bytes).await?;
                        stored += 1;
                        kept.push(entry.clone());
                    }
                    Err(Error::Http(e)) if e.is_status() => {
                        warn!(locator = %entry.locator, error = %e, "entry rejected by server, skipping");
                    }
                    Err(e) => {
                        warn!(error = %e, "download batch aborted");
                        bus.emit_lossy(EngineEvent::DownloadFailed {
                            reason: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                        return Err(e);
                    }
                }
            }
            let percent = ((completed + 1) * 100 / total) as u8;
            bus.emit_lossy(EngineEvent::DownloadProgress {
                percent,
                timestamp: chrono::Utc::now(),
            });
        }

        self.save_playlist(&kept).await?;
        info!(stored, total, "offline mix download complete");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn memory_cache() -> OfflineCache {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let cache = OfflineCache::new(pool);
        cache.init().await.unwrap();
        cache
    }

    fn entry(url: String, title: &str) -> OfflineEntry {
        OfflineEntry {
            locator: url,
            title: title.into(),
            artist: String::new(),
        }
    }

    #[tokio::test]
    async fn store_and_load_roundtrip() {
        let cache = memory_cache().await;
        assert!(!cache.contains("k").await.unwrap());
        cache.store("k", &[1, 2, 3]).await.unwrap();
        assert!(cache.contains("k").await.unwrap());
        assert_eq!(cache.load("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.load("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn playlist_replaces_and_preserves_order() {
        let cache = memory_cache().await;
        cache
            .save_playlist(&[entry("a".into(), "A"), entry("b".into(), "B")])
            .await
            .unwrap();
        cache.save_playlist(&[entry("c".into(), "C")]).await.unwrap();
        let playlist = cache.playlist().await.unwrap();
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist[0].title, "C");
    }

    #[tokio::test]
    async fn download_emits_monotonic_progress_ending_at_100() {
        let server = MockServer::start().await;
        for name in ["a", "b", "c"] {
            Mock::given(method("GET"))
                .and(path(format!("/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
                .mount(&server)
                .await;
        }
        let cache = memory_cache().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let fetcher = HttpFetcher::new(EventBus::new(4));

        let entries: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| entry(format!("{}/{n}", server.uri()), n))
            .collect();
        let stored = cache.download(&fetcher, &entries, &bus).await.unwrap();
        assert_eq!(stored, 3);

        let mut percents = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::DownloadProgress { percent, .. } = event {
                percents.push(percent);
            }
        }
        assert_eq!(percents, vec![33, 66, 100]);
        assert_eq!(cache.playlist().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cached_entries_are_skipped_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
            .expect(1)
            .mount(&server)
            .await;

        let cache = memory_cache().await;
        let bus = EventBus::new(64);
        let fetcher = HttpFetcher::new(EventBus::new(4));
        let entries = vec![entry(format!("{}/a", server.uri()), "a")];

        assert_eq!(cache.download(&fetcher, &entries, &bus).await.unwrap(), 1);
        // Second batch finds the blob already present.
        assert_eq!(cache.download(&fetcher, &entries, &bus).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_error_skips_entry_but_batch_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = memory_cache().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let fetcher = HttpFetcher::new(EventBus::new(4));
        let entries = vec![
            entry(format!("{}/gone", server.uri()), "gone"),
            entry(format!("{}/ok", server.uri()), "ok"),
        ];

        let stored = cache.download(&fetcher, &entries, &bus).await.unwrap();
        assert_eq!(stored, 1);

        // The rejected entry does not appear in the saved playlist.
        let playlist = cache.playlist().await.unwrap();
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist[0].title, "ok");

        let mut saw_full_progress = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::DownloadProgress { percent: 100, .. } => saw_full_progress = true,
                EngineEvent::DownloadFailed { .. } => panic!("status error must not abort batch"),
                _ => {}
            }
        }
        assert!(saw_full_progress);
    }

    #[tokio::test]
    async fn transport_error_aborts_batch_and_keeps_partial_blobs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/first"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
            .mount(&server)
            .await;
        let good = format!("{}/first", server.uri());
        let unreachable = "http://127.0.0.1:1/second".to_string();

        let cache = memory_cache().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let fetcher = HttpFetcher::new(EventBus::new(4));
        let entries = vec![entry(good.clone(), "first"), entry(unreachable, "second")];

        assert!(cache.download(&fetcher, &entries, &bus).await.is_err());
        // The blob stored before the abort survives.
        assert!(cache.contains(&good).await.unwrap());

        let mut saw_failed = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::DownloadFailed { .. } = event {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }
}
