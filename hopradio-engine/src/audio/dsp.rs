//! Signal-shaping primitives used by the processing graph.
//!
//! Biquad filters use the Audio EQ Cookbook (RBJ) coefficient formulas.
//! All processing is stereo interleaved f32 at the device sample rate.

use std::f32::consts::PI;

/// Normalized biquad coefficients (a0 divided out).
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    pub fn high_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos) / 2.0 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: -2.0 * cos / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// Low shelf with shelf slope S = 1.
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / 2.0 * 2.0_f32.sqrt();
        let beta = 2.0 * a.sqrt() * alpha;
        let a0 = (a + 1.0) + (a - 1.0) * cos + beta;
        Self {
            b0: a * ((a + 1.0) - (a - 1.0) * cos + beta) / a0,
            b1: 2.0 * a * ((a - 1.0) - (a + 1.0) * cos) / a0,
            b2: a * ((a + 1.0) - (a - 1.0) * cos - beta) / a0,
            a1: -2.0 * ((a - 1.0) + (a + 1.0) * cos) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos - beta) / a0,
        }
    }

    /// High shelf with shelf slope S = 1.
    pub fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / 2.0 * 2.0_f32.sqrt();
        let beta = 2.0 * a.sqrt() * alpha;
        let a0 = (a + 1.0) - (a - 1.0) * cos + beta;
        Self {
            b0: a * ((a + 1.0) + (a - 1.0) * cos + beta) / a0,
            b1: -2.0 * a * ((a - 1.0) + (a + 1.0) * cos) / a0,
            b2: a * ((a + 1.0) + (a - 1.0) * cos - beta) / a0,
            a1: 2.0 * ((a - 1.0) - (a + 1.0) * cos) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos - beta) / a0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &BiquadCoeffs, x: f32) -> f32 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// One biquad applied independently to both stereo channels.
#[derive(Debug, Clone)]
pub struct StereoBiquad {
    coeffs: BiquadCoeffs,
    state: [BiquadState; 2],
}

impl StereoBiquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: [BiquadState::default(); 2],
        }
    }

    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        frame[0] = self.state[0].process(&self.coeffs, frame[0]);
        frame[1] = self.state[1].process(&self.coeffs, frame[1]);
    }
}

/// Soft-knee downward compressor operating on the stereo peak level.
///
/// Gain computation happens in the dB domain with a one-pole envelope
/// follower; both channels receive the same gain so the image stays put.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32,
}

const SILENCE_FLOOR_DB: f32 = -96.0;

impl Compressor {
    pub fn new(
        sample_rate: f32,
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    ) -> Self {
        let coeff = |ms: f32| (-1.0 / (sample_rate * ms / 1000.0)).exp();
        Self {
            threshold_db,
            knee_db,
            ratio,
            attack_coeff: coeff(attack_ms.max(0.01)),
            release_coeff: coeff(release_ms.max(0.01)),
            envelope_db: SILENCE_FLOOR_DB,
        }
    }

    /// Gain reduction in dB (non-positive) for a given envelope level.
    fn gain_db(&self, level_db: f32) -> f32 {
        let slope = 1.0 - 1.0 / self.ratio;
        let half_knee = self.knee_db / 2.0;
        let over = level_db - self.threshold_db;
        if over <= -half_knee {
            0.0
        } else if over >= half_knee {
            -slope * over
        } else {
            // Quadratic interpolation across the knee.
            let t = over + half_knee;
            -slope * t * t / (2.0 * self.knee_db)
        }
    }

    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let peak = frame[0].abs().max(frame[1].abs());
        let level_db = if peak > 1e-5 {
            20.0 * peak.log10()
        } else {
            SILENCE_FLOOR_DB
        };
        let coeff = if level_db > self.envelope_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * level_db;

        let gain = 10.0_f32.powf(self.gain_db(self.envelope_db) / 20.0);
        frame[0] *= gain;
        frame[1] *= gain;
    }
}
