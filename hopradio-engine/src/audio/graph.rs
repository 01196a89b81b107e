//! Audio processing graph and its attachment point.
//!
//! The graph is an ordered stage chain applied in the output callback:
//! EQ biquads, a soft-knee compressor, then master gain. The analyzer
//! tap is not part of the graph; it runs even when the graph is
//! bypassed, so silence detection keeps working.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dsp::{BiquadCoeffs, Compressor, StereoBiquad};

/// Declarative stage description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    HighPass { freq: f32, q: f32 },
    LowShelf { freq: f32, gain_db: f32 },
    Peaking { freq: f32, gain_db: f32, q: f32 },
    HighShelf { freq: f32, gain_db: f32 },
    Compressor {
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    },
    Gain { value: f32 },
}

/// Full graph description, buildable once the sample rate is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub stages: Vec<StageConfig>,
    pub bypass: bool,
}

impl GraphConfig {
    /// The station's broadcast chain: rumble removal, warmth, bass
    /// punch, mud cut, presence, air, glue compression, master gain.
    pub fn production(master_gain: f32) -> Self {
        Self {
            stages: vec![
                StageConfig::HighPass { freq: 28.0, q: 0.707 },
                StageConfig::LowShelf { freq: 95.0, gain_db: 7.0 },
                StageConfig::Peaking { freq: 60.0, gain_db: 3.5, q: 1.0 },
                StageConfig::Peaking { freq: 800.0, gain_db: -6.0, q: 1.0 },
                StageConfig::Peaking { freq: 2500.0, gain_db: 1.5, q: 1.0 },
                StageConfig::HighShelf { freq: 10000.0, gain_db: 9.0 },
                StageConfig::Compressor {
                    threshold_db: -14.0,
                    knee_db: 6.0,
                    ratio: 3.8,
                    attack_ms: 8.0,
                    release_ms: 120.0,
                },
                StageConfig::Gain { value: master_gain },
            ],
            bypass: false,
        }
    }

    /// No processing at all; audio passes straight to the device.
    pub fn bypassed() -> Self {
        Self {
            stages: Vec::new(),
            bypass: true,
        }
    }
}

enum Stage {
    Filter(StereoBiquad),
    Compressor(Compressor),
    Gain(f32),
}

/// A realized stage chain at a fixed sample rate.
pub struct AudioGraph {
    stages: Vec<Stage>,
}

impl AudioGraph {
    pub fn new(config: &GraphConfig, sample_rate: u32) -> Self {
        let rate = sample_rate as f32;
        let stages = if config.bypass {
            Vec::new()
        } else {
            config
                .stages
                .iter()
                .map(|s| match *s {
                    StageConfig::HighPass { freq, q } => {
                        Stage::Filter(StereoBiquad::new(BiquadCoeffs::high_pass(rate, freq, q)))
                    }
                    StageConfig::LowShelf { freq, gain_db } => {
                        Stage::Filter(StereoBiquad::new(BiquadCoeffs::low_shelf(rate, freq, gain_db)))
                    }
                    StageConfig::Peaking { freq, gain_db, q } => {
                        Stage::Filter(StereoBiquad::new(BiquadCoeffs::peaking(rate, freq, gain_db, q)))
                    }
                    StageConfig::HighShelf { freq, gain_db } => {
                        Stage::Filter(StereoBiquad::new(BiquadCoeffs::high_shelf(rate, freq, gain_db)))
                    }
                    StageConfig::Compressor {
                        threshold_db,
                        knee_db,
                        ratio,
                        attack_ms,
                        release_ms,
                    } => Stage::Compressor(Compressor::new(
                        rate,
                        threshold_db,
                        knee_db,
                        ratio,
                        attack_ms,
                        release_ms,
                    )),
                    StageConfig::Gain { value } => Stage::Gain(value),
                })
                .collect()
        };
        Self { stages }
    }

    /// Process a stereo interleaved buffer in place.
    pub fn process(&mut self, interleaved: &mut [f32]) {
        if self.stages.is_empty() {
            return;
        }
        for frame in interleaved.chunks_exact_mut(2) {
            for stage in &mut self.stages {
                match stage {
                    Stage::Filter(filter) => filter.process_frame(frame),
                    Stage::Compressor(comp) => comp.process_frame(frame),
                    Stage::Gain(g) => {
                        frame[0] *= *g;
                        frame[1] *= *g;
                    }
                }
            }
        }
    }
}

/// Attachment point shared between the engine and the audio callback.
///
/// Starts unattached; the engine attaches a graph after the first
/// successful start of each source. Attaching twice to the same slot is
/// a caller bug and is ignored with a warning rather than rebuilding a
/// chain that already carries filter state.
pub enum GraphSlot {
    Unattached,
    Attached(AudioGraph),
}

impl GraphSlot {
    pub fn new() -> Self {
        GraphSlot::Unattached
    }

    pub fn attach(&mut self, config: &GraphConfig, sample_rate: u32) {
        match self {
            GraphSlot::Unattached => {
                debug!(sample_rate, bypass = config.bypass, "processing graph attached");
                *self = GraphSlot::Attached(AudioGraph::new(config, sample_rate));
            }
            GraphSlot::Attached(_) => {
                warn!("processing graph already attached; ignoring re-attach");
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, GraphSlot::Attached(_))
    }

    pub fn process(&mut self, interleaved: &mut [f32]) {
        if let GraphSlot::Attached(graph) = self {
            graph.process(interleaved);
        }
    }
}

impl Default for GraphSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_sine(freq: f32, amplitude: f32, frames: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * 2);
        for n in 0..frames {
            let s = amplitude * (2.0 * std::f32::consts::PI * freq * n as f32 / 44100.0).sin();
            out.push(s);
            out.push(s);
        }
        out
    }

    #[test]
    fn bypassed_graph_is_a_passthrough() {
        let mut graph = AudioGraph::new(&GraphConfig::bypassed(), 44100);
        let original = stereo_sine(440.0, 0.5, 256);
        let mut buf = original.clone();
        graph.process(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn gain_only_graph_scales_samples() {
        let config = GraphConfig {
            stages: vec![StageConfig::Gain { value: 0.93 }],
            bypass: false,
        };
        let mut graph = AudioGraph::new(&config, 44100);
        let mut buf = vec![1.0f32; 8];
        graph.process(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.93).abs() < 1e-6));
    }

    #[test]
    fn production_chain_alters_the_signal() {
        let mut graph = AudioGraph::new(&GraphConfig::production(0.93), 44100);
        let original = stereo_sine(800.0, 0.5, 4096);
        let mut buf = original.clone();
        graph.process(&mut buf);
        assert_ne!(buf, original);
        assert!(buf.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn slot_attach_is_one_shot() {
        let mut slot = GraphSlot::new();
        assert!(!slot.is_attached());
        slot.attach(&GraphConfig::production(0.93), 44100);
        assert!(slot.is_attached());
        // Second attach is ignored, state machine stays attached.
        slot.attach(&GraphConfig::bypassed(), 48000);
        assert!(slot.is_attached());

        // Still the original (processing) graph, not the bypass.
        let mut buf = vec![0.5f32; 8];
        let original = buf.clone();
        slot.process(&mut buf);
        assert_ne!(buf, original);
    }

    #[test]
    fn unattached_slot_passes_audio_through() {
        let mut slot = GraphSlot::new();
        let mut buf = vec![0.25f32; 8];
        slot.process(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.25));
    }
}
