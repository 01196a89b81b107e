//! Track catalog data model.
//!
//! A station catalog is a flat list of tracks. The `kind` field decides
//! how the scheduler treats each entry: music rotates through the
//! weighted pool, jingles and ads are inserted by the scheduler, and a
//! `stream` entry short-circuits rotation entirely (the engine connects
//! to its locator as a continuous remote stream).

use serde::{Deserialize, Serialize};

/// Role of a catalog entry in station programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Music,
    Jingle,
    Ad,
    Stream,
}

impl TrackKind {
    /// True for entries the scheduler may place in the rotation queue.
    pub fn is_schedulable(self) -> bool {
        !matches!(self, TrackKind::Stream)
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrackKind::Music => "music",
            TrackKind::Jingle => "jingle",
            TrackKind::Ad => "ad",
            TrackKind::Stream => "stream",
        };
        f.write_str(s)
    }
}

/// One entry of the station catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub kind: TrackKind,
    #[serde(default)]
    pub artist: String,
    pub title: String,
    /// Where the audio lives: an HTTP(S) URL or a cache key.
    #[serde(alias = "src")]
    pub locator: String,
    /// Selection weight in the rotation pool. Zero means never drawn.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// One entry of a downloadable offline mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineEntry {
    #[serde(alias = "download_url")]
    pub locator: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
}

impl OfflineEntry {
    /// Synthesize a catalog-shaped track for display events. Offline
    /// entries carry no catalog id, so the caller supplies one (the
    /// playlist position works well).
    pub fn as_track(&self, id: u64) -> Track {
        Track {
            id,
            kind: TrackKind::Music,
            artist: self.artist.clone(),
            title: self.title.clone(),
            locator: self.locator.clone(),
            weight: 0,
        }
    }
}

/// Station metadata as published by the station info endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationStatus {
    #[serde(default)]
    pub listeners: u64,
    #[serde(default)]
    pub now_playing: Option<Track>,
    #[serde(default)]
    pub next_playing: Option<Track>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TrackKind::Jingle).unwrap(), "\"jingle\"");
        let kind: TrackKind = serde_json::from_str("\"ad\"").unwrap();
        assert_eq!(kind, TrackKind::Ad);
    }

    #[test]
    fn track_accepts_src_alias_and_defaults_weight() {
        let json = r#"{"id":7,"kind":"music","title":"Night Drive","src":"https://s.example/7.mp3"}"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.locator, "https://s.example/7.mp3");
        assert_eq!(track.weight, 1);
        assert_eq!(track.artist, "");
    }

    #[test]
    fn offline_entry_as_track_uses_supplied_id() {
        let entry = OfflineEntry {
            locator: "https://s.example/mix/3.mp3".into(),
            title: "Deep Cut".into(),
            artist: "Nobody".into(),
        };
        let track = entry.as_track(3);
        assert_eq!(track.id, 3);
        assert_eq!(track.kind, TrackKind::Music);
        assert_eq!(track.weight, 0);
    }

    #[test]
    fn stream_kind_is_not_schedulable() {
        assert!(!TrackKind::Stream.is_schedulable());
        assert!(TrackKind::Music.is_schedulable());
        assert!(TrackKind::Ad.is_schedulable());
    }
}
