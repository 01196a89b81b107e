//! Player resource abstraction and the cpal-backed implementation.
//!
//! The engine core never touches devices directly: it asks an
//! [`AudioBackend`] for one [`PlayerResource`] per source and listens
//! for [`PlayerEvent`]s. That keeps the core deterministic under test
//! and confines all real-time audio work to this module.
//!
//! `CpalBackend` runs each player on its own OS thread. Fully decoded
//! sources (rotation tracks, cached offline entries) are decoded up
//! front; continuous streams are decoded progressively into a ring
//! buffer that the device callback drains.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use symphonia::core::io::ReadOnlySource;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::analyzer::{AnalyzerTap, SpectrumReader};
use super::decode::{decode_bytes, resample_linear, StreamingDecoder};
use super::graph::{GraphConfig, GraphSlot};
use super::output::AudioOutput;

/// Where a player's audio comes from.
pub enum PlayerSource {
    /// A complete encoded blob, decoded before playback starts.
    Bytes { data: Vec<u8>, hint: Option<String> },
    /// A continuous remote stream, decoded as it arrives.
    StreamUrl { url: String },
}

impl PlayerSource {
    pub fn describe(&self) -> String {
        match self {
            PlayerSource::Bytes { data, .. } => format!("bytes({})", data.len()),
            PlayerSource::StreamUrl { url } => format!("stream({url})"),
        }
    }
}

/// Everything a backend needs to create one player.
pub struct PlayerSpec {
    pub source: PlayerSource,
    /// Captured at creation; later volume changes affect only
    /// subsequently created players.
    pub volume: f32,
    /// Start at a random point between 10% and 80% of the track,
    /// imitating tuning into an already-running broadcast.
    pub tune_in: bool,
}

/// Lifecycle notifications from a player.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Audio is flowing. Duration is known for decoded sources only.
    Started { duration: Option<Duration> },
    /// The source was exhausted or the stream ended.
    Ended,
    /// The source could not be loaded or started.
    LoadFailed { reason: String },
}

/// Handle to one playing source. Dropping it stops playback.
///
/// `Sync` because the handle lives inside the engine core's future,
/// which runs on a multi-threaded executor; all implementations hold
/// their mutable state behind atomics or locks anyway.
pub trait PlayerResource: Send + Sync {
    /// Playback position within the source. Advances only while real
    /// samples reach the device, so a stalled stream is observable.
    fn position(&self) -> Duration;

    /// Attach the processing graph. Idempotent per resource; a second
    /// call is ignored.
    fn attach_graph(&self, config: &GraphConfig);

    /// Reader for the analyzer tap (energy and spectrum).
    fn analyzer(&self) -> SpectrumReader;

    /// Stop playback and release the device.
    fn stop(&self);
}

/// Factory for player resources.
pub trait AudioBackend: Send + Sync {
    fn create_player(
        &self,
        spec: PlayerSpec,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Box<dyn PlayerResource>;
}

/// State shared between a player handle, its worker thread, and the
/// device callback.
struct PlayerShared {
    stop: AtomicBool,
    frames_played: AtomicU64,
    sample_rate: AtomicU32,
    graph: Mutex<GraphSlot>,
    tap: Mutex<AnalyzerTap>,
    reader: SpectrumReader,
}

impl PlayerShared {
    fn new() -> Arc<Self> {
        let (tap, reader) = AnalyzerTap::new();
        Arc::new(Self {
            stop: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            graph: Mutex::new(GraphSlot::new()),
            tap: Mutex::new(tap),
            reader,
        })
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

struct CpalPlayer {
    shared: Arc<PlayerShared>,
}

impl PlayerResource for CpalPlayer {
    fn position(&self) -> Duration {
        let rate = self.shared.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.shared.frames_played.load(Ordering::Relaxed);
        Duration::from_secs_f64(frames as f64 / rate as f64)
    }

    fn attach_graph(&self, config: &GraphConfig) {
        let rate = self.shared.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            warn!("graph attach before audio start; ignored");
            return;
        }
        match self.shared.graph.lock() {
            Ok(mut slot) => slot.attach(config, rate),
            Err(poisoned) => poisoned.into_inner().attach(config, rate),
        }
    }

    fn analyzer(&self) -> SpectrumReader {
        self.shared.reader.clone()
    }

    fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// cpal-backed audio, one OS thread per player.
pub struct CpalBackend {
    device: Option<String>,
}

impl CpalBackend {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl AudioBackend for CpalBackend {
    fn create_player(
        &self,
        spec: PlayerSpec,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Box<dyn PlayerResource> {
        let shared = PlayerShared::new();
        let thread_shared = shared.clone();
        let device = self.device.clone();
        let thread_events = events.clone();
        debug!(source = %spec.source.describe(), "creating player");

        let spawned = std::thread::Builder::new()
            .name("hopradio-player".into())
            .spawn(move || {
                let result = match spec.source {
                    PlayerSource::Bytes { data, hint } => run_decoded(
                        device,
                        data,
                        hint,
                        spec.volume,
                        spec.tune_in,
                        &thread_events,
                        &thread_shared,
                    ),
                    PlayerSource::StreamUrl { url } => {
                        run_stream(device, url, spec.volume, &thread_events, &thread_shared)
                    }
                };
                if let Err(reason) = result {
                    warn!(%reason, "player failed");
                    let _ = thread_events.send(PlayerEvent::LoadFailed { reason });
                }
            });
        if let Err(e) = spawned {
            // Without this the session would sit forever with no audio
            // and no fault for the watchdog to see.
            warn!(error = %e, "failed to spawn player thread");
            let _ = events.send(PlayerEvent::LoadFailed {
                reason: format!("player thread spawn failed: {e}"),
            });
        }

        Box::new(CpalPlayer { shared })
    }
}

/// Run the audio callback tail: per-player volume was already applied,
/// so process the graph (when attached) then feed the analyzer.
fn postprocess(shared: &PlayerShared, buf: &mut [f32]) {
    match shared.graph.lock() {
        Ok(mut slot) => slot.process(buf),
        Err(poisoned) => poisoned.into_inner().process(buf),
    }
    match shared.tap.lock() {
        Ok(mut tap) => tap.process(buf),
        Err(poisoned) => poisoned.into_inner().process(buf),
    }
}

fn run_decoded(
    device: Option<String>,
    data: Vec<u8>,
    hint: Option<String>,
    volume: f32,
    tune_in: bool,
    events: &mpsc::UnboundedSender<PlayerEvent>,
    shared: &Arc<PlayerShared>,
) -> std::result::Result<(), String> {
    let decoded = decode_bytes(data, hint.as_deref()).map_err(|e| e.to_string())?;
    let source_rate = decoded.sample_rate;

    let mut output =
        AudioOutput::open(device.as_deref(), source_rate).map_err(|e| e.to_string())?;
    let device_rate = output.sample_rate();
    let samples = if device_rate != source_rate {
        debug!(source_rate, device_rate, "resampling for device");
        resample_linear(&decoded.samples, source_rate, device_rate)
    } else {
        decoded.samples
    };
    shared.sample_rate.store(device_rate, Ordering::Relaxed);

    let total_frames = samples.len() / 2;
    let start_frame = if tune_in && total_frames > 0 {
        let fraction = rand::thread_rng().gen_range(0.1..0.8);
        let frame = (total_frames as f64 * fraction) as usize;
        info!(
            offset_secs = frame as f64 / device_rate as f64,
            "tuning in mid-track"
        );
        frame
    } else {
        0
    };
    shared
        .frames_played
        .store(start_frame as u64, Ordering::Relaxed);

    let duration = Duration::from_secs_f64(total_frames as f64 / device_rate as f64);
    let ended = Arc::new(AtomicBool::new(false));

    let cb_shared = shared.clone();
    let cb_ended = ended.clone();
    let mut index = start_frame * 2;
    output
        .start(move |buf: &mut [f32]| {
            for frame in buf.chunks_exact_mut(2) {
                if index + 1 < samples.len() {
                    frame[0] = samples[index] * volume;
                    frame[1] = samples[index + 1] * volume;
                    index += 2;
                    cb_shared.frames_played.fetch_add(1, Ordering::Relaxed);
                } else {
                    frame[0] = 0.0;
                    frame[1] = 0.0;
                    cb_ended.store(true, Ordering::Relaxed);
                }
            }
            postprocess(&cb_shared, buf);
        })
        .map_err(|e| e.to_string())?;

    let _ = events.send(PlayerEvent::Started {
        duration: Some(duration),
    });

    while !shared.stopped() {
        if ended.load(Ordering::Relaxed) {
            let _ = events.send(PlayerEvent::Ended);
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    output.stop();
    Ok(())
}

fn run_stream(
    device: Option<String>,
    url: String,
    volume: f32,
    events: &mpsc::UnboundedSender<PlayerEvent>,
    shared: &Arc<PlayerShared>,
) -> std::result::Result<(), String> {
    let response = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| format!("stream connect failed: {e}"))?;
    let hint = crate::net::hint_from_locator(&url);
    let mut decoder = StreamingDecoder::open(Box::new(ReadOnlySource::new(response)), hint.as_deref())
        .map_err(|e| e.to_string())?;
    let source_rate = decoder.sample_rate();

    let mut output =
        AudioOutput::open(device.as_deref(), source_rate).map_err(|e| e.to_string())?;
    let device_rate = output.sample_rate();
    shared.sample_rate.store(device_rate, Ordering::Relaxed);

    // A few seconds of buffered audio absorbs network jitter; when it
    // runs dry the callback emits silence and position stops advancing,
    // which is exactly what the stall watchdog looks for.
    let ring = HeapRb::<f32>::new(device_rate as usize * 2 * 4);
    let (mut producer, mut consumer) = ring.split();

    let cb_shared = shared.clone();
    output
        .start(move |buf: &mut [f32]| {
            for frame in buf.chunks_exact_mut(2) {
                if consumer.occupied_len() >= 2 {
                    frame[0] = consumer.try_pop().unwrap_or(0.0) * volume;
                    frame[1] = consumer.try_pop().unwrap_or(0.0) * volume;
                    cb_shared.frames_played.fetch_add(1, Ordering::Relaxed);
                } else {
                    frame[0] = 0.0;
                    frame[1] = 0.0;
                }
            }
            postprocess(&cb_shared, buf);
        })
        .map_err(|e| e.to_string())?;

    let _ = events.send(PlayerEvent::Started { duration: None });

    // Decode on this thread, pushing into the ring with backpressure.
    'decode: loop {
        if shared.stopped() {
            break;
        }
        match decoder.next_block() {
            Ok(Some(block)) => {
                let block = if source_rate != device_rate {
                    resample_linear(&block, source_rate, device_rate)
                } else {
                    block
                };
                for &sample in &block {
                    let mut pending = sample;
                    while let Err(rejected) = producer.try_push(pending) {
                        if shared.stopped() {
                            break 'decode;
                        }
                        pending = rejected;
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
            Ok(None) => {
                debug!("stream ended");
                let _ = events.send(PlayerEvent::Ended);
                break;
            }
            Err(e) => {
                warn!(error = %e, "stream decode failed");
                let _ = events.send(PlayerEvent::Ended);
                break;
            }
        }
    }
    output.stop();
    Ok(())
}
