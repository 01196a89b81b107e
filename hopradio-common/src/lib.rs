//! Shared types for the hopRadio playback engine.
//!
//! This crate holds the pieces that more than one consumer needs: the
//! track catalog data model and the engine event bus. The engine crate
//! depends on it; so would any future UI or remote-control crate.

pub mod events;
pub mod track;

pub use events::{EngineEvent, EventBus, PlayMode, PlaybackState};
pub use track::{OfflineEntry, StationStatus, Track, TrackKind};
