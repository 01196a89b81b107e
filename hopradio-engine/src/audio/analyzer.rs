//! Spectrum analyzer tap.
//!
//! The tap sits at the end of the audio callback path, downmixes to
//! mono, and runs a Hann-windowed FFT over fixed-size blocks. It
//! publishes two things through a lock-light shared snapshot: a smoothed
//! average energy (consumed by the silence detector) and folded
//! magnitude bins (for visualization consumers).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

const FFT_SIZE: usize = 1024;
const BIN_COUNT: usize = 32;
/// Exponential smoothing factor for the energy estimate.
const ENERGY_SMOOTHING: f32 = 0.7;

struct Snapshot {
    /// Smoothed mean-square energy, stored as f32 bits.
    energy: AtomicU32,
    bins: Mutex<Vec<f32>>,
}

/// Writer half, owned by the audio path.
pub struct AnalyzerTap {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    pending: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    snapshot: Arc<Snapshot>,
}

impl AnalyzerTap {
    pub fn new() -> (Self, SpectrumReader) {
        let snapshot = Arc::new(Snapshot {
            energy: AtomicU32::new(0.0f32.to_bits()),
            bins: Mutex::new(vec![0.0; BIN_COUNT]),
        });
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|n| {
                let x = n as f32 / (FFT_SIZE - 1) as f32;
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
            })
            .collect();
        let tap = Self {
            fft: FftPlanner::new().plan_fft_forward(FFT_SIZE),
            window,
            pending: Vec::with_capacity(FFT_SIZE * 2),
            scratch: vec![Complex::default(); FFT_SIZE],
            snapshot: snapshot.clone(),
        };
        (tap, SpectrumReader { snapshot })
    }

    /// Feed stereo interleaved samples.
    pub fn process(&mut self, interleaved: &[f32]) {
        for frame in interleaved.chunks_exact(2) {
            self.pending.push(0.5 * (frame[0] + frame[1]));
        }
        while self.pending.len() >= FFT_SIZE {
            self.analyze_block();
            self.pending.drain(..FFT_SIZE);
        }
    }

    fn analyze_block(&mut self) {
        let block = &self.pending[..FFT_SIZE];

        // Energy on the raw block, then exponential smoothing.
        let energy = block.iter().map(|s| s * s).sum::<f32>() / FFT_SIZE as f32;
        let previous = f32::from_bits(self.snapshot.energy.load(Ordering::Relaxed));
        let smoothed = ENERGY_SMOOTHING * previous + (1.0 - ENERGY_SMOOTHING) * energy;
        self.snapshot
            .energy
            .store(smoothed.to_bits(), Ordering::Relaxed);

        for (i, (&s, &w)) in block.iter().zip(&self.window).enumerate() {
            self.scratch[i] = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        // Fold the positive-frequency magnitudes into coarse bins.
        let per_bin = (FFT_SIZE / 2) / BIN_COUNT;
        let mut bins = match self.snapshot.bins.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (bin, out) in bins.iter_mut().enumerate() {
            let start = bin * per_bin;
            let sum: f32 = self.scratch[start..start + per_bin]
                .iter()
                .map(|c| c.norm())
                .sum();
            *out = sum / (per_bin as f32 * FFT_SIZE as f32);
        }
    }
}

/// Reader half, cheap to clone and safe to poll from any thread.
#[derive(Clone)]
pub struct SpectrumReader {
    snapshot: Arc<Snapshot>,
}

impl SpectrumReader {
    /// Smoothed mean-square energy of recent audio, 0.0 when silent.
    pub fn average_energy(&self) -> f32 {
        f32::from_bits(self.snapshot.energy.load(Ordering::Relaxed))
    }

    /// Current folded magnitude spectrum.
    pub fn bins(&self) -> Vec<f32> {
        match self.snapshot.bins.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
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
    fn silence_reports_zero_energy() {
        let (mut tap, reader) = AnalyzerTap::new();
        tap.process(&vec![0.0; FFT_SIZE * 4]);
        assert_eq!(reader.average_energy(), 0.0);
    }

    #[test]
    fn tone_raises_energy_above_silence_threshold() {
        let (mut tap, reader) = AnalyzerTap::new();
        // Several blocks so the smoothed estimate converges.
        for _ in 0..8 {
            tap.process(&stereo_sine(440.0, 0.5, FFT_SIZE));
        }
        // A 0.5 amplitude sine has mean-square energy 0.125.
        assert!(reader.average_energy() > 0.05);
    }

    #[test]
    fn tone_concentrates_spectrum_in_matching_bin() {
        let (mut tap, reader) = AnalyzerTap::new();
        // 4306 Hz lands in FFT bin 100 at 44.1 kHz, coarse bin 6.
        tap.process(&stereo_sine(4306.0, 0.8, FFT_SIZE));
        let bins = reader.bins();
        let loudest = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(loudest, Some(6));
    }

    #[test]
    fn partial_blocks_are_buffered_until_full() {
        let (mut tap, reader) = AnalyzerTap::new();
        tap.process(&stereo_sine(440.0, 0.5, FFT_SIZE / 2));
        assert_eq!(reader.average_energy(), 0.0);
        tap.process(&stereo_sine(440.0, 0.5, FFT_SIZE / 2));
        assert!(reader.average_energy() > 0.0);
    }
}
