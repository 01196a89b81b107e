//! Engine event model and broadcast bus.
//!
//! Every observable state change in the engine is published as an
//! [`EngineEvent`] on the [`EventBus`]. Consumers (UI layers, the media
//! key bridge, tests) subscribe and react; the engine never calls back
//! into consumers directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::track::Track;

/// Whether audio is currently meant to be flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
}

/// Which program source the engine is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    /// Station programming: rotation or a continuous remote stream.
    Live,
    /// A locally cached offline mix.
    Offline,
}

/// Events published by the playback engine.
///
/// All events carry a wall-clock timestamp so consumers can order and
/// age them without trusting their own receive time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// The current program item changed.
    TrackChanged {
        track: Track,
        timestamp: DateTime<Utc>,
    },
    /// The engine began loading or connecting to a source.
    LoadStarted { timestamp: DateTime<Utc> },
    /// Audio is actually flowing for the current source.
    PlaybackStarted {
        /// Known for fully decoded sources, absent for continuous streams.
        duration_secs: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    /// Playback stalled (true) or recovered (false).
    BufferingChanged {
        buffering: bool,
        timestamp: DateTime<Utc>,
    },
    /// Preview of the upcoming program item.
    NextTrackUpdate {
        track: Track,
        timestamp: DateTime<Utc>,
    },
    /// Rolling download throughput observed by the HTTP layer.
    NetworkStats {
        bytes_per_sec: u64,
        total_bytes: u64,
        timestamp: DateTime<Utc>,
    },
    /// Offline mix download progress, 0..=100, never decreasing.
    DownloadProgress {
        percent: u8,
        timestamp: DateTime<Utc>,
    },
    /// Offline mix download aborted.
    DownloadFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Station metadata poll result.
    StationStatus {
        listeners: u64,
        timestamp: DateTime<Utc>,
    },
    /// Play/pause transition.
    PlaybackStateChanged {
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },
    /// Live/offline mode transition.
    ModeChanged {
        mode: PlayMode,
        timestamp: DateTime<Utc>,
    },
    /// Master volume changed. Applies to subsequently created sources.
    VolumeChanged {
        volume: f32,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event discriminant name, useful for logging and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::TrackChanged { .. } => "TrackChanged",
            EngineEvent::LoadStarted { .. } => "LoadStarted",
            EngineEvent::PlaybackStarted { .. } => "PlaybackStarted",
            EngineEvent::BufferingChanged { .. } => "BufferingChanged",
            EngineEvent::NextTrackUpdate { .. } => "NextTrackUpdate",
            EngineEvent::NetworkStats { .. } => "NetworkStats",
            EngineEvent::DownloadProgress { .. } => "DownloadProgress",
            EngineEvent::DownloadFailed { .. } => "DownloadFailed",
            EngineEvent::StationStatus { .. } => "StationStatus",
            EngineEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            EngineEvent::ModeChanged { .. } => "ModeChanged",
            EngineEvent::VolumeChanged { .. } => "VolumeChanged",
        }
    }
}

/// Broadcast bus for [`EngineEvent`].
///
/// Built on `tokio::sync::broadcast`: publishing never blocks, slow
/// subscribers lag rather than back-pressure the engine, and receivers
/// clean up when dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Events emitted before the call
    /// are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit to all subscribers. Returns the subscriber count, or an
    /// error when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit, silently dropping the event when nobody is listening.
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackKind;

    fn sample_track() -> Track {
        Track {
            id: 1,
            kind: TrackKind::Music,
            artist: "Test".into(),
            title: "Tone".into(),
            locator: "https://s.example/1.mp3".into(),
            weight: 1,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::TrackChanged {
            track: sample_track(),
            timestamp: Utc::now(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "TrackChanged");
    }

    #[test]
    fn emit_without_subscribers_errors_but_lossy_does_not_panic() {
        let bus = EventBus::new(16);
        let event = EngineEvent::LoadStarted { timestamp: Utc::now() };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit(EngineEvent::VolumeChanged {
            volume: 0.5,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(a.recv().await.unwrap().kind(), "VolumeChanged");
        assert_eq!(b.recv().await.unwrap().kind(), "VolumeChanged");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_string(&EngineEvent::DownloadProgress {
            percent: 40,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"DownloadProgress\""));
        assert!(json.contains("\"percent\":40"));
    }
}
