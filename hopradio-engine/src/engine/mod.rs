//! The playback engine: public handle and serialized core.
//!
//! [`RadioEngine`] is a cheap handle; every operation is a non-blocking
//! send into the core's command channel. The core task owns all mutable
//! state and processes commands strictly in order, so there is no
//! locking anywhere in the control path.

mod core;


use std::sync::Arc;

use hopradio_common::{EngineEvent, EventBus, OfflineEntry, StationStatus};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::audio::backend::{AudioBackend, PlayerEvent};
use crate::cache::OfflineCache;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::net::HttpFetcher;
use crate::state::SharedState;
use crate::{station, transport};

pub(crate) use self::core::EngineCore;

/// Commands consumed by the engine core, one at a time.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Prepare the initial rotation queue.
    Init,
    Play,
    Pause,
    Next,
    SetVolume(f32),
    PlayOffline(Vec<OfflineEntry>),
    SwitchToLive,
    NextOffline,
    PrevOffline,
    Download(Vec<OfflineEntry>),
    /// Station metadata from the poller.
    Station(StationStatus),
    /// Event from the player owned by session generation `session`.
    Player { session: u64, event: PlayerEvent },
    /// A scheduled reconnect came due.
    Retry { generation: u64 },
    /// Periodic health check.
    HealthTick,
    Shutdown,
}

/// Handle to a running playback engine.
///
/// All methods return immediately; results surface as [`EngineEvent`]s
/// on the bus. Dropping every handle shuts the engine down once the
/// command channel closes.
#[derive(Clone)]
pub struct RadioEngine {
    commands: mpsc::UnboundedSender<EngineCommand>,
    bus: EventBus,
    state: Arc<SharedState>,
}

impl RadioEngine {
    /// Start the engine and its background tasks. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        catalog: Catalog,
        backend: Arc<dyn AudioBackend>,
        cache: OfflineCache,
    ) -> Self {
        let bus = EventBus::new(256);
        let state = Arc::new(SharedState::new());
        let fetcher = HttpFetcher::new(bus.clone());
        let (tx, rx) = mpsc::unbounded_channel();

        let core = EngineCore::new(
            config.clone(),
            catalog,
            backend,
            cache,
            fetcher.clone(),
            bus.clone(),
            state.clone(),
            tx.clone(),
        );
        tokio::spawn(core.run(rx));

        // Health tick, stops once the core is gone.
        let tick_tx = tx.clone();
        let tick = config.health.tick();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tick_tx.send(EngineCommand::HealthTick).is_err() {
                    break;
                }
            }
        });

        if let Some(url) = config.station.metadata_url.clone() {
            station::spawn_poller(
                fetcher,
                url,
                config.station.poll_interval(),
                tx.clone(),
            );
        }

        if config.transport.enabled {
            if let Err(e) = transport::spawn(config.transport.clone(), bus.clone(), tx.clone()) {
                warn!(error = %e, "failed to start media controls bridge");
            }
        }

        info!("playback engine started");
        Self {
            commands: tx,
            bus,
            state,
        }
    }

    fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            warn!("engine core is gone; command dropped");
        }
    }

    /// Prepare the rotation queue without starting playback.
    pub fn init(&self) {
        self.send(EngineCommand::Init);
    }

    /// Start (or resume) playback in the current mode.
    pub fn play(&self) {
        self.send(EngineCommand::Play);
    }

    /// Stop playback and release the audio resource entirely.
    pub fn pause(&self) {
        self.send(EngineCommand::Pause);
    }

    /// Skip to the next program item.
    pub fn next(&self) {
        self.send(EngineCommand::Next);
    }

    /// Set master volume. Takes effect for subsequently created audio
    /// sources; the current one keeps its volume.
    pub fn set_volume(&self, volume: f32) {
        self.send(EngineCommand::SetVolume(volume));
    }

    /// Switch to offline mode and play the given mix. An empty list
    /// replays the playlist saved by the last download.
    pub fn play_offline(&self, entries: Vec<OfflineEntry>) {
        self.send(EngineCommand::PlayOffline(entries));
    }

    /// Switch back to live programming.
    pub fn switch_to_live(&self) {
        self.send(EngineCommand::SwitchToLive);
    }

    pub fn play_next_offline(&self) {
        self.send(EngineCommand::NextOffline);
    }

    pub fn play_prev_offline(&self) {
        self.send(EngineCommand::PrevOffline);
    }

    /// Download an offline mix into the cache in the background.
    /// Progress and failures surface as events.
    pub fn download_offline_mix(&self, entries: Vec<OfflineEntry>) {
        self.send(EngineCommand::Download(entries));
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Read-only snapshot of engine state.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Stop the core loop.
    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }
}
