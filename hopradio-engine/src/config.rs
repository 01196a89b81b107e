//! Engine configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file
//! (or no file at all) yields a working engine. The defaults encode the
//! station's production tuning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scheduler::SchedulerConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub station: StationConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    pub retry: RetryPolicy,
    pub audio: AudioConfig,
    pub cache: CacheConfig,
    pub transport: TransportConfig,
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Where the catalog and station metadata come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Remote catalog JSON. Ignored when a local catalog path is given
    /// on the command line.
    pub catalog_url: Option<String>,
    /// Station metadata endpoint (listener count, now/next playing).
    pub metadata_url: Option<String>,
    /// Metadata poll interval.
    pub poll_interval_secs: u64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            catalog_url: None,
            metadata_url: None,
            poll_interval_secs: 10,
        }
    }
}

impl StationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Stall and silence detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Health check cadence in milliseconds.
    pub tick_ms: u64,
    /// Position delta below this (seconds) counts as frozen.
    pub stall_epsilon_secs: f64,
    /// Cumulative frozen time that forces a reconnect.
    pub stall_fault_secs: f64,
    /// Frozen time after which a buffering notification is raised.
    pub buffering_after_secs: f64,
    /// Average energy below this counts as silence.
    pub silence_threshold: f32,
    /// Cumulative silent time that triggers recovery.
    pub silence_fault_secs: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            stall_epsilon_secs: 0.05,
            stall_fault_secs: 5.0,
            buffering_after_secs: 1.0,
            silence_threshold: 1.0e-4,
            silence_fault_secs: 5.0,
        }
    }
}

impl HealthConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(100))
    }

    pub fn tick_secs(&self) -> f64 {
        self.tick().as_secs_f64()
    }
}

/// Reconnect back-off delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before retrying a failed source load.
    pub load_retry_ms: u64,
    /// Delay before reconnecting after an unexpected stream end.
    pub stream_end_ms: u64,
    /// Delay before reconnecting after a health fault.
    pub forced_reconnect_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            load_retry_ms: 2000,
            stream_end_ms: 1000,
            forced_reconnect_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn load_retry(&self) -> Duration {
        Duration::from_millis(self.load_retry_ms)
    }

    pub fn stream_end(&self) -> Duration {
        Duration::from_millis(self.stream_end_ms)
    }

    pub fn forced_reconnect(&self) -> Duration {
        Duration::from_millis(self.forced_reconnect_ms)
    }
}

/// Output device and processing graph settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name; `None` picks the system default.
    pub device: Option<String>,
    /// Skip the processing graph, keeping only the analyzer tap.
    pub bypass_graph: bool,
    /// Master output gain applied as the last graph stage.
    pub master_gain: f32,
    /// Join rotation tracks mid-song on the first connect, radio style.
    pub tune_in: bool,
    /// Initial volume for newly created sources.
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            bypass_graph: false,
            master_gain: 0.93,
            tune_in: true,
            volume: 1.0,
        }
    }
}

/// Offline cache location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database file for cached audio and the offline playlist.
    pub db_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: "hopradio.db".into(),
        }
    }
}

/// OS media key / now-playing integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub enabled: bool,
    pub display_name: String,
    pub dbus_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            display_name: "hopRadio".into(),
            dbus_name: "hopradio".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_production_defaults() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.health.stall_fault_secs, 5.0);
        assert_eq!(cfg.retry.load_retry_ms, 2000);
        assert_eq!(cfg.audio.master_gain, 0.93);
        assert_eq!(cfg.scheduler.ad_frequency, 4);
        assert!(cfg.transport.enabled);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [health]
            tick_ms = 500

            [station]
            metadata_url = "https://hop.example/status"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.health.tick_ms, 500);
        assert_eq!(cfg.health.stall_fault_secs, 5.0);
        assert_eq!(
            cfg.station.metadata_url.as_deref(),
            Some("https://hop.example/status")
        );
    }

    #[test]
    fn loads_config_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[audio]\nvolume = 0.5\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.audio.volume, 0.5);
        assert!(matches!(
            EngineConfig::load(&dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let cfg = StationConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }
}
