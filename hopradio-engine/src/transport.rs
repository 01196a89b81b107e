//! OS media controls bridge (MPRIS/SMTC/Now Playing).
//!
//! Connects the engine event bus to platform media key integrations via
//! `souvlaki`. Media key presses become engine commands; track and
//! play/pause changes are published back to the OS, deduplicated so the
//! desktop shell is not spammed.
//!
//! Seeking is not mapped: radio programming has no user-visible seek.

use std::sync::{Arc, Mutex};

use hopradio_common::{EngineEvent, EventBus, PlaybackState, Track};
use souvlaki::{MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::engine::EngineCommand;

#[derive(Debug, Clone, Copy, Default)]
struct ControlState {
    is_playing: bool,
}

struct TransportBridge {
    controls: Option<MediaControls>,
    control_state: Arc<Mutex<ControlState>>,
    last_published_playing: Option<bool>,
    last_published_track: Option<(String, String)>,
}

impl TransportBridge {
    fn new(cfg: &TransportConfig, commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        let control_state = Arc::new(Mutex::new(ControlState::default()));
        let controls = create_controls(cfg, commands, Arc::clone(&control_state));
        Self {
            controls,
            control_state,
            last_published_playing: None,
            last_published_track: None,
        }
    }

    fn on_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::TrackChanged { track, .. } => self.publish_metadata(track),
            EngineEvent::PlaybackStateChanged { state, .. } => {
                let playing = *state == PlaybackState::Playing;
                match self.control_state.lock() {
                    Ok(mut s) => s.is_playing = playing,
                    Err(poisoned) => poisoned.into_inner().is_playing = playing,
                }
                self.publish_playback(playing);
            }
            _ => {}
        }
    }

    fn publish_playback(&mut self, playing: bool) {
        if self.last_published_playing == Some(playing) {
            return;
        }
        let Some(controls) = self.controls.as_mut() else {
            return;
        };
        let playback = if playing {
            MediaPlayback::Playing { progress: None }
        } else {
            MediaPlayback::Paused { progress: None }
        };
        if let Err(err) = controls.set_playback(playback) {
            warn!(error = ?err, "failed to publish playback state");
            return;
        }
        self.last_published_playing = Some(playing);
    }

    fn publish_metadata(&mut self, track: &Track) {
        let key = (track.title.clone(), track.artist.clone());
        if self.last_published_track.as_ref() == Some(&key) {
            return;
        }
        let Some(controls) = self.controls.as_mut() else {
            return;
        };
        let artist = (!track.artist.is_empty()).then_some(track.artist.as_str());
        if let Err(err) = controls.set_metadata(MediaMetadata {
            title: Some(track.title.as_str()),
            artist,
            album: None,
            cover_url: None,
            duration: None,
        }) {
            warn!(error = ?err, "failed to publish track metadata");
            return;
        }
        debug!(title = %track.title, "media metadata published");
        self.last_published_track = Some(key);
    }
}

#[cfg(not(target_os = "windows"))]
fn create_controls(
    cfg: &TransportConfig,
    commands: mpsc::UnboundedSender<EngineCommand>,
    control_state: Arc<Mutex<ControlState>>,
) -> Option<MediaControls> {
    let mut controls = match MediaControls::new(PlatformConfig {
        display_name: &cfg.display_name,
        dbus_name: &cfg.dbus_name,
        hwnd: None,
    }) {
        Ok(controls) => controls,
        Err(err) => {
            warn!(error = ?err, "failed to create media controls backend");
            return None;
        }
    };

    if let Err(err) = controls.attach(move |event| {
        let snapshot = match control_state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if let Some(command) = map_control_event(event, snapshot) {
            let _ = commands.send(command);
        }
    }) {
        warn!(error = ?err, "failed to attach media controls handler");
        return None;
    }

    Some(controls)
}

#[cfg(target_os = "windows")]
fn create_controls(
    _cfg: &TransportConfig,
    _commands: mpsc::UnboundedSender<EngineCommand>,
    _control_state: Arc<Mutex<ControlState>>,
) -> Option<MediaControls> {
    // Souvlaki needs an HWND on Windows and the engine has no window.
    warn!("Windows media controls are disabled: no HWND available");
    None
}

fn map_control_event(event: MediaControlEvent, state: ControlState) -> Option<EngineCommand> {
    match event {
        MediaControlEvent::Play => Some(EngineCommand::Play),
        MediaControlEvent::Pause | MediaControlEvent::Stop => Some(EngineCommand::Pause),
        MediaControlEvent::Toggle => {
            if state.is_playing {
                Some(EngineCommand::Pause)
            } else {
                Some(EngineCommand::Play)
            }
        }
        MediaControlEvent::Next => Some(EngineCommand::Next),
        // Previous only means something in offline mode; the core
        // treats it as a no-op elsewhere.
        MediaControlEvent::Previous => Some(EngineCommand::PrevOffline),
        _ => None,
    }
}

/// Run the bridge on its own thread: souvlaki callbacks and the MPRIS
/// event pump are synchronous.
pub(crate) fn spawn(
    cfg: TransportConfig,
    bus: EventBus,
    commands: mpsc::UnboundedSender<EngineCommand>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("hopradio-transport".into())
        .spawn(move || {
            let mut bridge = TransportBridge::new(&cfg, commands);
            if bridge.controls.is_none() {
                info!("media controls unavailable; transport bridge idle");
            }
            let mut rx = bus.subscribe();
            loop {
                match rx.blocking_recv() {
                    Ok(event) => bridge.on_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "transport bridge lagged behind event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(is_playing: bool) -> ControlState {
        ControlState { is_playing }
    }

    #[test]
    fn play_pause_and_next_map_directly() {
        assert!(matches!(
            map_control_event(MediaControlEvent::Play, state(false)),
            Some(EngineCommand::Play)
        ));
        assert!(matches!(
            map_control_event(MediaControlEvent::Pause, state(true)),
            Some(EngineCommand::Pause)
        ));
        assert!(matches!(
            map_control_event(MediaControlEvent::Next, state(true)),
            Some(EngineCommand::Next)
        ));
    }

    #[test]
    fn toggle_depends_on_current_state() {
        assert!(matches!(
            map_control_event(MediaControlEvent::Toggle, state(true)),
            Some(EngineCommand::Pause)
        ));
        assert!(matches!(
            map_control_event(MediaControlEvent::Toggle, state(false)),
            Some(EngineCommand::Play)
        ));
    }

    #[test]
    fn unsupported_controls_are_ignored() {
        assert!(map_control_event(MediaControlEvent::Raise, state(true)).is_none());
        assert!(map_control_event(MediaControlEvent::Quit, state(true)).is_none());
    }
}
