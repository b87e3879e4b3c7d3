//! # Backbeat shared library (backbeat-common)
//!
//! Types and infrastructure shared between the Backbeat controller and any
//! companion services (stream server, roster service).
//!
//! Provides:
//! - Domain identifiers and the `Song` value type
//! - The `PlayerEvent` broadcast enum and `EventBus`
//! - Small formatting helpers for status rendering

pub mod events;
pub mod types;

pub use events::{EventBus, PlayerEvent};
pub use types::{human_duration, ListenerId, Song, SongId};
