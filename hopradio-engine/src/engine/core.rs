//! Engine core: single-owner state machine behind the command channel.
//!
//! The core is the only writer of playback state. Timers (health ticks,
//! scheduled reconnects) and player threads all feed back into the same
//! command channel, so every transition happens in one place and in a
//! defined order. Scheduled reconnects carry a generation number;
//! pausing or switching modes bumps the generation, which cancels
//! anything already in flight.

use std::sync::Arc;
use std::time::Duration;

use hopradio_common::{
    EngineEvent, EventBus, PlayMode, PlaybackState, StationStatus, Track,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::EngineCommand;
use crate::audio::backend::{AudioBackend, PlayerEvent, PlayerSource, PlayerSpec};
use crate::audio::graph::GraphConfig;
use crate::cache::OfflineCache;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::net::{hint_from_locator, HttpFetcher};
use crate::playback::monitor::HealthMonitor;
use crate::playback::offline::OfflineController;
use crate::playback::stream::{StreamController, StreamState};
use crate::playback::PlaybackSession;
use crate::scheduler::PlaylistScheduler;
use crate::state::SharedState;

pub(crate) struct EngineCore {
    cfg: EngineConfig,
    bus: EventBus,
    state: Arc<SharedState>,
    backend: Arc<dyn AudioBackend>,
    fetcher: HttpFetcher,
    cache: OfflineCache,
    scheduler: PlaylistScheduler,
    live: StreamController,
    offline: OfflineController,
    monitor: HealthMonitor,
    commands: mpsc::UnboundedSender<EngineCommand>,

    mode: PlayMode,
    playing: bool,
    buffering: bool,
    volume: f32,
    session: Option<PlaybackSession>,
    /// Bumped per created player; stale player events are dropped.
    session_gen: u64,
    /// Bumped per scheduled reconnect and on cancellation points.
    retry_gen: u64,
}

impl EngineCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: EngineConfig,
        catalog: Catalog,
        backend: Arc<dyn AudioBackend>,
        cache: OfflineCache,
        fetcher: HttpFetcher,
        bus: EventBus,
        state: Arc<SharedState>,
        commands: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        let volume = cfg.audio.volume.clamp(0.0, 1.0);
        let monitor = HealthMonitor::new(&cfg.health);
        let scheduler = PlaylistScheduler::new(catalog, cfg.scheduler.clone());
        Self {
            cfg,
            bus,
            state,
            backend,
            fetcher,
            cache,
            scheduler,
            live: StreamController::new(),
            offline: OfflineController::new(),
            monitor,
            commands,
            mode: PlayMode::Live,
            playing: false,
            buffering: false,
            volume,
            session: None,
            session_gen: 0,
            retry_gen: 0,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineCommand>) {
        info!("engine core running");
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Init => self.scheduler.prepare(),
                EngineCommand::Play => self.handle_play().await,
                EngineCommand::Pause => self.handle_pause().await,
                EngineCommand::Next => self.handle_next().await,
                EngineCommand::SetVolume(v) => self.handle_set_volume(v).await,
                EngineCommand::PlayOffline(entries) => self.handle_play_offline(entries).await,
                EngineCommand::SwitchToLive => self.handle_switch_to_live().await,
                EngineCommand::NextOffline => self.handle_offline_step(1).await,
                EngineCommand::PrevOffline => self.handle_offline_step(-1).await,
                EngineCommand::Download(entries) => self.handle_download(entries),
                EngineCommand::Station(status) => self.handle_station(status).await,
                EngineCommand::Player { session, event } => {
                    self.handle_player_event(session, event).await
                }
                EngineCommand::Retry { generation } => self.handle_retry(generation).await,
                EngineCommand::HealthTick => self.handle_health_tick().await,
                EngineCommand::Shutdown => break,
            }
        }
        self.drop_session();
        info!("engine core stopped");
    }

    fn emit(&self, event: EngineEvent) {
        self.bus.emit_lossy(event);
    }

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    /// Release the current playback resource, if any.
    fn drop_session(&mut self) {
        if self.session.take().is_some() {
            self.monitor.reset();
            if self.buffering {
                self.buffering = false;
                self.emit(EngineEvent::BufferingChanged {
                    buffering: false,
                    timestamp: Self::now(),
                });
            }
        }
    }

    /// Schedule a reconnect after `delay`. Supersedes any reconnect
    /// already pending; exactly one can come due.
    fn schedule_reconnect(&mut self, delay: Duration) {
        self.retry_gen += 1;
        let generation = self.retry_gen;
        let commands = self.commands.clone();
        debug!(delay_ms = delay.as_millis() as u64, generation, "reconnect scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(EngineCommand::Retry { generation });
        });
    }

    /// Invalidate pending reconnects without scheduling a new one.
    fn cancel_reconnects(&mut self) {
        self.retry_gen += 1;
    }

    /// Create a player for `source` and make it the active session.
    /// The previous session is released before the backend is asked
    /// for a new resource; two players never coexist.
    fn spawn_player(&mut self, track: Track, source: PlayerSource, tune_in: bool) {
        self.drop_session();
        self.session_gen += 1;
        let session = self.session_gen;
        let (player_tx, mut player_rx) = mpsc::unbounded_channel();
        let player = self.backend.create_player(
            PlayerSpec {
                source,
                volume: self.volume,
                tune_in,
            },
            player_tx,
        );

        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(event) = player_rx.recv().await {
                if commands.send(EngineCommand::Player { session, event }).is_err() {
                    break;
                }
            }
        });

        self.session = Some(PlaybackSession::new(track, player));
    }

    async fn announce_track(&self, track: &Track) {
        self.state.set_current_track(Some(track.clone())).await;
        self.emit(EngineEvent::LoadStarted { timestamp: Self::now() });
        self.emit(EngineEvent::TrackChanged {
            track: track.clone(),
            timestamp: Self::now(),
        });
    }

    async fn set_playing(&mut self, playing: bool) {
        if self.playing == playing {
            return;
        }
        self.playing = playing;
        let state = if playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        };
        self.state.set_playback_state(state).await;
        self.emit(EngineEvent::PlaybackStateChanged {
            state,
            timestamp: Self::now(),
        });
    }

    async fn set_mode(&mut self, mode: PlayMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.state.set_mode(mode).await;
        self.emit(EngineEvent::ModeChanged {
            mode,
            timestamp: Self::now(),
        });
    }

    // ---- command handlers ----

    async fn handle_play(&mut self) {
        self.set_playing(true).await;
        if self.session.is_some() {
            return;
        }
        match self.mode {
            PlayMode::Live => self.connect_live().await,
            PlayMode::Offline => self.start_offline(0).await,
        }
    }

    async fn handle_pause(&mut self) {
        self.cancel_reconnects();
        self.drop_session();
        self.live.set_state(StreamState::Idle);
        self.set_playing(false).await;
    }

    async fn handle_next(&mut self) {
        match self.mode {
            PlayMode::Offline => self.handle_offline_step(1).await,
            PlayMode::Live => {
                if self.scheduler.catalog().stream_track().is_some() {
                    // A continuous stream has no next; skipping it is
                    // meaningless.
                    debug!("next ignored on a continuous stream");
                    return;
                }
                if !self.playing {
                    // Advance the rotation silently.
                    let _ = self.scheduler.next_track();
                    return;
                }
                self.cancel_reconnects();
                self.connect_live().await;
            }
        }
    }

    async fn handle_set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.volume = volume;
        self.state.set_volume(volume).await;
        self.emit(EngineEvent::VolumeChanged {
            volume,
            timestamp: Self::now(),
        });
    }

    async fn handle_play_offline(&mut self, entries: Vec<hopradio_common::OfflineEntry>) {
        let entries = if entries.is_empty() {
            // Fall back to the playlist saved by the last download.
            match self.cache.playlist().await {
                Ok(saved) => saved,
                Err(e) => {
                    warn!(error = %e, "failed to load saved offline playlist");
                    Vec::new()
                }
            }
        } else {
            entries
        };
        if entries.is_empty() {
            warn!("no offline entries to play");
            return;
        }

        self.cancel_reconnects();
        self.drop_session();
        self.set_mode(PlayMode::Offline).await;
        self.offline.set_entries(entries);
        self.set_playing(true).await;
        self.start_offline(0).await;
    }

    async fn handle_switch_to_live(&mut self) {
        self.cancel_reconnects();
        self.drop_session();
        self.set_mode(PlayMode::Live).await;
        self.set_playing(true).await;
        self.connect_live().await;
    }

    async fn handle_offline_step(&mut self, step: i64) {
        if self.mode != PlayMode::Offline {
            debug!("offline navigation ignored in live mode");
            return;
        }
        self.cancel_reconnects();
        self.start_offline(step).await;
    }

    fn handle_download(&mut self, entries: Vec<hopradio_common::OfflineEntry>) {
        // Runs concurrently so a long download doesn't block playback
        // commands; the cache emits progress and failure events itself.
        let cache = self.cache.clone();
        let fetcher = self.fetcher.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let _ = cache.download(&fetcher, &entries, &bus).await;
        });
    }

    async fn handle_station(&mut self, status: StationStatus) {
        self.emit(EngineEvent::StationStatus {
            listeners: status.listeners,
            timestamp: Self::now(),
        });
        if self.mode != PlayMode::Live {
            return;
        }
        // On a continuous stream the station endpoint is the only
        // source of track titles.
        if self.scheduler.catalog().stream_track().is_some() {
            if let Some(now_playing) = status.now_playing {
                let current = self.state.current_track().await;
                let changed = current
                    .map(|c| c.id != now_playing.id || c.title != now_playing.title)
                    .unwrap_or(true);
                if changed && self.session.is_some() {
                    self.state.set_current_track(Some(now_playing.clone())).await;
                    self.emit(EngineEvent::TrackChanged {
                        track: now_playing,
                        timestamp: Self::now(),
                    });
                }
            }
        }
        if let Some(next) = status.next_playing {
            self.emit(EngineEvent::NextTrackUpdate {
                track: next,
                timestamp: Self::now(),
            });
        }
    }

    async fn handle_player_event(&mut self, session: u64, event: PlayerEvent) {
        if session != self.session_gen || self.session.is_none() {
            debug!(session, "event from a stale player ignored");
            return;
        }
        match event {
            PlayerEvent::Started { duration } => {
                if let Some(active) = self.session.as_mut() {
                    active.started = true;
                    let graph = if self.cfg.audio.bypass_graph {
                        GraphConfig::bypassed()
                    } else {
                        GraphConfig::production(self.cfg.audio.master_gain)
                    };
                    active.player.attach_graph(&graph);
                }
                if self.mode == PlayMode::Live {
                    self.live.set_state(StreamState::Playing);
                }
                if self.buffering {
                    self.buffering = false;
                    self.emit(EngineEvent::BufferingChanged {
                        buffering: false,
                        timestamp: Self::now(),
                    });
                }
                self.emit(EngineEvent::PlaybackStarted {
                    duration_secs: duration.map(|d| d.as_secs_f64()),
                    timestamp: Self::now(),
                });
            }
            PlayerEvent::Ended => {
                self.drop_session();
                if !self.playing {
                    return;
                }
                match self.mode {
                    PlayMode::Offline => self.start_offline(1).await,
                    PlayMode::Live => {
                        if self.scheduler.catalog().stream_track().is_some() {
                            // A continuous stream ending is a failure;
                            // back off briefly and reconnect.
                            warn!("continuous stream ended unexpectedly");
                            self.live.set_state(StreamState::Reconnecting);
                            self.schedule_reconnect(self.cfg.retry.stream_end());
                        } else {
                            self.connect_live().await;
                        }
                    }
                }
            }
            PlayerEvent::LoadFailed { reason } => {
                warn!(%reason, "source failed to load");
                self.drop_session();
                if !self.playing {
                    return;
                }
                match self.mode {
                    PlayMode::Live => {
                        self.live.set_state(StreamState::Connecting);
                        self.schedule_reconnect(self.cfg.retry.load_retry());
                    }
                    // A bad offline entry is skipped, not retried.
                    PlayMode::Offline => self.start_offline(1).await,
                }
            }
        }
    }

    async fn handle_retry(&mut self, generation: u64) {
        if generation != self.retry_gen {
            debug!(generation, "stale reconnect ignored");
            return;
        }
        if !self.playing {
            return;
        }
        match self.mode {
            PlayMode::Live => self.connect_live().await,
            PlayMode::Offline => self.start_offline(0).await,
        }
    }

    async fn handle_health_tick(&mut self) {
        let Some(active) = self.session.as_ref() else {
            return;
        };
        if !self.playing || !active.started {
            return;
        }
        let position = active.player.position();
        let energy = active.player.analyzer().average_energy();
        let verdict = self
            .monitor
            .observe(position, energy, self.cfg.health.tick_secs());

        if let Some(buffering) = verdict.buffering {
            if buffering != self.buffering {
                self.buffering = buffering;
                self.emit(EngineEvent::BufferingChanged {
                    buffering,
                    timestamp: Self::now(),
                });
            }
        }
        if verdict.stall_fault {
            info!("playback position frozen; forcing reconnect");
            self.force_reconnect();
            return;
        }
        if verdict.silence_fault {
            info!("sustained silence detected");
            match self.mode {
                PlayMode::Live => self.force_reconnect(),
                PlayMode::Offline => {
                    self.drop_session();
                    self.start_offline(1).await;
                }
            }
        }
    }

    fn force_reconnect(&mut self) {
        self.drop_session();
        if self.mode == PlayMode::Live {
            self.live.set_state(StreamState::Reconnecting);
        }
        self.schedule_reconnect(self.cfg.retry.forced_reconnect());
    }

    // ---- live program ----

    /// Connect to the live program: the station's continuous stream
    /// when the catalog defines one, otherwise the next rotation track.
    async fn connect_live(&mut self) {
        self.drop_session();
        self.live.set_state(StreamState::Connecting);

        if let Some(stream) = self.scheduler.catalog().stream_track().cloned() {
            self.announce_track(&stream).await;
            let source = PlayerSource::StreamUrl {
                url: stream.locator.clone(),
            };
            self.spawn_player(stream, source, false);
            return;
        }

        let Some(track) = self.scheduler.next_track() else {
            warn!("catalog has nothing playable; staying idle");
            self.live.set_state(StreamState::Idle);
            return;
        };

        let data = match self.load_locator(&track.locator).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, track = track.id, "track fetch failed; will retry");
                self.schedule_reconnect(self.cfg.retry.load_retry());
                return;
            }
        };

        self.announce_track(&track).await;
        if let Some(next) = self.scheduler.peek_next() {
            self.emit(EngineEvent::NextTrackUpdate {
                track: next.clone(),
                timestamp: Self::now(),
            });
        }

        let tune_in = self.cfg.audio.tune_in && self.live.take_tune_in();
        let hint = hint_from_locator(&track.locator);
        self.spawn_player(track, PlayerSource::Bytes { data, hint }, tune_in);
    }

    /// Cache-transparent load: cached blob if present, network fetch
    /// otherwise.
    async fn load_locator(&self, locator: &str) -> crate::error::Result<Vec<u8>> {
        if let Some(bytes) = self.cache.load(locator).await? {
            debug!(locator, "serving from cache");
            return Ok(bytes);
        }
        self.fetcher.fetch_bytes(locator).await
    }

    // ---- offline program ----

    /// Move the offline cursor by `step` and play the entry there.
    /// Entries whose audio cannot be fetched are skipped; after a full
    /// lap of failures the engine gives up and goes idle.
    async fn start_offline(&mut self, step: i64) {
        if self.offline.is_empty() {
            warn!("offline playlist is empty");
            return;
        }
        // Navigation stops the current entry before the next one loads.
        self.drop_session();
        self.offline.advance(step);

        let mut attempts = 0;
        loop {
            let Some(track) = self.offline.current_track() else {
                return;
            };
            let entry_locator = track.locator.clone();
            match self.load_locator(&entry_locator).await {
                Ok(data) => {
                    self.announce_track(&track).await;
                    if let Some(next) = self.offline.peek_next() {
                        self.emit(EngineEvent::NextTrackUpdate {
                            track: next.as_track((self.offline.index() as u64 + 1)
                                % self.offline.len() as u64),
                            timestamp: Self::now(),
                        });
                    }
                    let hint = hint_from_locator(&entry_locator);
                    self.spawn_player(track, PlayerSource::Bytes { data, hint }, false);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, locator = %entry_locator, "offline entry unavailable, skipping");
                    attempts += 1;
                    if attempts >= self.offline.len() {
                        warn!("no playable offline entries");
                        return;
                    }
                    self.offline.advance(1);
                }
            }
        }
    }
}
