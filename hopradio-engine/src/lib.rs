//! # hopRadio Playback Engine
//!
//! Continuous internet-radio playback: weighted rotation with ads and
//! jingles, an optional continuous remote stream, a downloadable offline
//! mode, a fixed audio processing graph, and self-healing playback
//! (stall and silence detection with automatic reconnect).
//!
//! The public surface is [`engine::RadioEngine`]: a non-blocking handle
//! over a serialized core task, with results delivered as events on a
//! broadcast bus.

pub mod audio;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod playback;
pub mod scheduler;
pub mod state;
pub mod station;
pub mod transport;

pub use cache::OfflineCache;
pub use catalog::Catalog;
pub use config::EngineConfig;
pub use engine::RadioEngine;
pub use error::{Error, Result};
pub use state::SharedState;
