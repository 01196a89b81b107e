//! Station catalog loading and access.

use std::path::Path;

use hopradio_common::{Track, TrackKind};
use tracing::warn;

use crate::error::{Error, Result};
use crate::net::HttpFetcher;

/// Immutable view of a station's track catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for track in &tracks {
            if !seen.insert(track.id) {
                warn!(id = track.id, title = %track.title, "duplicate track id in catalog");
            }
        }
        Self { tracks }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let tracks: Vec<Track> =
            serde_json::from_slice(data).map_err(|e| Error::Catalog(e.to_string()))?;
        Ok(Self::from_tracks(tracks))
    }

    /// Load a catalog from a local JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data)
    }

    /// Fetch a catalog from a remote JSON endpoint.
    pub async fn fetch(fetcher: &HttpFetcher, url: &str) -> Result<Self> {
        let data = fetcher.fetch_bytes(url).await?;
        Self::from_json(&data)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// The continuous remote stream entry, if the station has one. When
    /// present it overrides local rotation; the first such entry wins.
    pub fn stream_track(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Stream)
    }

    pub fn music(&self) -> impl Iterator<Item = &Track> {
        self.of_kind(TrackKind::Music)
    }

    pub fn jingles(&self) -> Vec<&Track> {
        self.of_kind(TrackKind::Jingle).collect()
    }

    pub fn ads(&self) -> Vec<&Track> {
        self.of_kind(TrackKind::Ad).collect()
    }

    fn of_kind(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: u64, kind: TrackKind) -> Track {
        Track {
            id,
            kind,
            artist: String::new(),
            title: format!("t{id}"),
            locator: format!("mem://{id}"),
            weight: 1,
        }
    }

    #[test]
    fn parses_catalog_json() {
        let json = r#"[
            {"id":1,"kind":"music","title":"A","src":"https://s/a.mp3","weight":3},
            {"id":2,"kind":"jingle","title":"Sting","src":"https://s/j.mp3"},
            {"id":3,"kind":"ad","title":"Spot","src":"https://s/ad.mp3"}
        ]"#;
        let catalog = Catalog::from_json(json.as_bytes()).unwrap();
        assert_eq!(catalog.music().count(), 1);
        assert_eq!(catalog.jingles().len(), 1);
        assert_eq!(catalog.ads().len(), 1);
        assert!(catalog.stream_track().is_none());
    }

    #[test]
    fn first_stream_entry_wins() {
        let catalog = Catalog::from_tracks(vec![
            track(1, TrackKind::Music),
            track(2, TrackKind::Stream),
            track(3, TrackKind::Stream),
        ]);
        assert_eq!(catalog.stream_track().map(|t| t.id), Some(2));
    }

    #[test]
    fn loads_catalog_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"id":7,"kind":"music","title":"A","src":"https://s/a.mp3"}]"#,
        )
        .unwrap();
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.tracks().len(), 1);
        assert_eq!(catalog.tracks()[0].id, 7);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            Catalog::from_json(b"{not json"),
            Err(Error::Catalog(_))
        ));
    }
}
