//! Playback state: the active session plus the live and offline
//! program controllers.

pub mod monitor;
pub mod offline;
pub mod stream;

use hopradio_common::Track;
use tracing::debug;
use uuid::Uuid;

use crate::audio::backend::PlayerResource;

/// The single active playback resource.
///
/// At most one session exists across the whole engine; replacing it
/// drops the previous one, which stops its player.
pub struct PlaybackSession {
    pub id: Uuid,
    pub track: Track,
    pub player: Box<dyn PlayerResource>,
    /// Set once the player reports audio flowing.
    pub started: bool,
}

impl PlaybackSession {
    pub fn new(track: Track, player: Box<dyn PlayerResource>) -> Self {
        Self {
            id: Uuid::new_v4(),
            track,
            player,
            started: false,
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        debug!(session = %self.id, track = self.track.id, "releasing playback session");
        self.player.stop();
    }
}
