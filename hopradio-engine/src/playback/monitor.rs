//! Playback health detectors.
//!
//! Two independent pure state machines, fed once per health tick by the
//! engine core: a stall watchdog watching the playback position and a
//! silence detector watching analyzer energy. Keeping them free of
//! clocks and I/O makes the fault thresholds directly testable.

use std::time::Duration;

use crate::config::HealthConfig;

/// What the engine should do after a health observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthVerdict {
    /// Some(true) when buffering began, Some(false) when it cleared.
    pub buffering: Option<bool>,
    /// Playback position frozen past the fault threshold.
    pub stall_fault: bool,
    /// Decoded audio silent past the fault threshold.
    pub silence_fault: bool,
}

/// Detects a frozen playback position.
struct Watchdog {
    epsilon_secs: f64,
    buffering_after_secs: f64,
    fault_after_secs: f64,
    stalled_secs: f64,
    buffering: bool,
    last_position: Option<Duration>,
}

impl Watchdog {
    fn new(cfg: &HealthConfig) -> Self {
        Self {
            epsilon_secs: cfg.stall_epsilon_secs,
            buffering_after_secs: cfg.buffering_after_secs,
            fault_after_secs: cfg.stall_fault_secs,
            stalled_secs: 0.0,
            buffering: false,
            last_position: None,
        }
    }

    fn observe(&mut self, position: Duration, dt_secs: f64) -> (Option<bool>, bool) {
        let advanced = match self.last_position {
            Some(last) => {
                (position.as_secs_f64() - last.as_secs_f64()).abs() > self.epsilon_secs
            }
            // First observation establishes the baseline.
            None => true,
        };
        self.last_position = Some(position);

        if advanced {
            self.stalled_secs = 0.0;
            if self.buffering {
                self.buffering = false;
                return (Some(false), false);
            }
            return (None, false);
        }

        self.stalled_secs += dt_secs;
        let mut buffering_change = None;
        if !self.buffering && self.stalled_secs >= self.buffering_after_secs {
            self.buffering = true;
            buffering_change = Some(true);
        }
        if self.stalled_secs >= self.fault_after_secs {
            // One fault per accumulation; the counter restarts so a
            // still-frozen position takes another full threshold to
            // fault again.
            self.stalled_secs = 0.0;
            return (buffering_change, true);
        }
        (buffering_change, false)
    }

    fn reset(&mut self) {
        self.stalled_secs = 0.0;
        self.buffering = false;
        self.last_position = None;
    }
}

/// Detects sustained silence in decoded audio.
struct SilenceDetector {
    threshold: f32,
    fault_after_secs: f64,
    silent_secs: f64,
}

impl SilenceDetector {
    fn new(cfg: &HealthConfig) -> Self {
        Self {
            threshold: cfg.silence_threshold,
            fault_after_secs: cfg.silence_fault_secs,
            silent_secs: 0.0,
        }
    }

    fn observe(&mut self, energy: f32, dt_secs: f64) -> bool {
        if energy >= self.threshold {
            self.silent_secs = 0.0;
            return false;
        }
        self.silent_secs += dt_secs;
        if self.silent_secs >= self.fault_after_secs {
            self.silent_secs = 0.0;
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.silent_secs = 0.0;
    }
}

/// Combined health monitor fed by the engine's periodic tick.
pub struct HealthMonitor {
    watchdog: Watchdog,
    silence: SilenceDetector,
}

impl HealthMonitor {
    pub fn new(cfg: &HealthConfig) -> Self {
        Self {
            watchdog: Watchdog::new(cfg),
            silence: SilenceDetector::new(cfg),
        }
    }

    /// Feed one observation. `dt_secs` is the time since the previous
    /// observation for the same source.
    pub fn observe(&mut self, position: Duration, energy: f32, dt_secs: f64) -> HealthVerdict {
        let (buffering, stall_fault) = self.watchdog.observe(position, dt_secs);
        let silence_fault = self.silence.observe(energy, dt_secs);
        HealthVerdict {
            buffering,
            stall_fault,
            silence_fault,
        }
    }

    /// Clear all counters, called whenever the current source changes.
    pub fn reset(&mut self) {
        self.watchdog.reset();
        self.silence.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig::default())
    }

    const LOUD: f32 = 0.1;

    #[test]
    fn frozen_position_for_5_001_seconds_faults_exactly_once() {
        let mut m = monitor();
        let pos = Duration::from_secs(30);
        m.observe(pos, LOUD, 1.0); // baseline
        let mut faults = 0;
        for _ in 0..4 {
            faults += m.observe(pos, LOUD, 1.0).stall_fault as u32;
        }
        faults += m.observe(pos, LOUD, 0.999).stall_fault as u32;
        assert_eq!(faults, 0, "4.999s frozen must not fault");
        faults += m.observe(pos, LOUD, 0.002).stall_fault as u32;
        assert_eq!(faults, 1, "5.001s frozen must fault once");
        // Counters restarted: the next tick does not fault again.
        assert!(!m.observe(pos, LOUD, 1.0).stall_fault);
    }

    #[test]
    fn advancing_position_resets_the_stall_counter() {
        let mut m = monitor();
        let mut pos = Duration::from_secs(10);
        m.observe(pos, LOUD, 1.0);
        for _ in 0..3 {
            assert!(!m.observe(pos, LOUD, 1.0).stall_fault);
        }
        pos += Duration::from_secs(1);
        m.observe(pos, LOUD, 1.0);
        // Another 4 frozen seconds stay under the threshold.
        for _ in 0..4 {
            assert!(!m.observe(pos, LOUD, 1.0).stall_fault);
        }
    }

    #[test]
    fn sub_epsilon_movement_counts_as_frozen() {
        let mut m = monitor();
        let mut pos = Duration::from_millis(1000);
        m.observe(pos, LOUD, 1.0);
        let mut faulted = false;
        for _ in 0..6 {
            pos += Duration::from_millis(10); // below the 50ms epsilon
            faulted |= m.observe(pos, LOUD, 1.0).stall_fault;
        }
        assert!(faulted);
    }

    #[test]
    fn buffering_raises_at_one_second_and_clears_on_recovery() {
        let mut m = monitor();
        let pos = Duration::from_secs(5);
        m.observe(pos, LOUD, 1.0);
        let v = m.observe(pos, LOUD, 1.0);
        assert_eq!(v.buffering, Some(true));
        // No repeat notification while still stalled.
        assert_eq!(m.observe(pos, LOUD, 1.0).buffering, None);
        let v = m.observe(pos + Duration::from_secs(1), LOUD, 1.0);
        assert_eq!(v.buffering, Some(false));
    }

    #[test]
    fn silence_faults_after_threshold_and_only_once_per_accumulation() {
        let mut m = monitor();
        let mut pos = Duration::ZERO;
        let mut faults = 0;
        for _ in 0..5 {
            pos += Duration::from_secs(1); // position advances, audio silent
            faults += m.observe(pos, 0.0, 1.0).silence_fault as u32;
        }
        assert_eq!(faults, 1);
        pos += Duration::from_secs(1);
        assert!(!m.observe(pos, 0.0, 1.0).silence_fault);
    }

    #[test]
    fn audible_audio_resets_the_silence_counter() {
        let mut m = monitor();
        let mut pos = Duration::ZERO;
        for _ in 0..4 {
            pos += Duration::from_secs(1);
            assert!(!m.observe(pos, 0.0, 1.0).silence_fault);
        }
        pos += Duration::from_secs(1);
        m.observe(pos, LOUD, 1.0);
        for _ in 0..4 {
            pos += Duration::from_secs(1);
            assert!(!m.observe(pos, 0.0, 1.0).silence_fault);
        }
    }

    #[test]
    fn detectors_are_independent() {
        let mut m = monitor();
        let pos = Duration::from_secs(1);
        m.observe(pos, LOUD, 1.0);
        // Frozen *and* silent: both faults fire on the same tick.
        let mut verdicts = Vec::new();
        for _ in 0..5 {
            verdicts.push(m.observe(pos, 0.0, 1.0));
        }
        let last = verdicts.last().unwrap();
        assert!(last.stall_fault);
        assert!(last.silence_fault);
    }

    #[test]
    fn reset_clears_everything() {
        let mut m = monitor();
        let pos = Duration::from_secs(2);
        m.observe(pos, 0.0, 1.0);
        for _ in 0..4 {
            m.observe(pos, 0.0, 1.0);
        }
        m.reset();
        // Post-reset the first observation is a baseline again.
        let v = m.observe(pos, 0.0, 1.0);
        assert_eq!(v, HealthVerdict::default());
    }
}
