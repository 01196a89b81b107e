//! Shared engine state.
//!
//! A read-mostly snapshot of what the engine is doing, safe to poll
//! from any task (status endpoints, the media key bridge, tests). The
//! engine core is the only writer.

use hopradio_common::{PlayMode, PlaybackState, Track};
use tokio::sync::RwLock;

pub struct SharedState {
    playback_state: RwLock<PlaybackState>,
    mode: RwLock<PlayMode>,
    current_track: RwLock<Option<Track>>,
    volume: RwLock<f32>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            playback_state: RwLock::new(PlaybackState::Paused),
            mode: RwLock::new(PlayMode::Live),
            current_track: RwLock::new(None),
            volume: RwLock::new(1.0),
        }
    }

    pub async fn playback_state(&self) -> PlaybackState {
        *self.playback_state.read().await
    }

    pub async fn set_playback_state(&self, state: PlaybackState) {
        *self.playback_state.write().await = state;
    }

    pub async fn mode(&self) -> PlayMode {
        *self.mode.read().await
    }

    pub async fn set_mode(&self, mode: PlayMode) {
        *self.mode.write().await = mode;
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.current_track.read().await.clone()
    }

    pub async fn set_current_track(&self, track: Option<Track>) {
        *self.current_track.write().await = track;
    }

    pub async fn volume(&self) -> f32 {
        *self.volume.read().await
    }

    pub async fn set_volume(&self, volume: f32) {
        *self.volume.write().await = volume.clamp(0.0, 1.0);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_are_paused_live_full_volume() {
        let state = SharedState::new();
        assert_eq!(state.playback_state().await, PlaybackState::Paused);
        assert_eq!(state.mode().await, PlayMode::Live);
        assert!(state.current_track().await.is_none());
        assert_eq!(state.volume().await, 1.0);
    }

    #[tokio::test]
    async fn volume_is_clamped() {
        let state = SharedState::new();
        state.set_volume(1.7).await;
        assert_eq!(state.volume().await, 1.0);
        state.set_volume(-0.3).await;
        assert_eq!(state.volume().await, 0.0);
    }
}
