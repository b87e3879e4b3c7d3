//! # Backbeat player (backbeat-player)
//!
//! Media controller for a shared listening session: a player state machine
//! that sequences DJ-queue songs, the autoplaylist and live streams, an
//! audio relay that paces decoder PCM into the output sinks at a fixed
//! frame cadence, and a credit renewal task for overplay protection.

pub mod config;
pub mod credit;
pub mod db;
pub mod error;
pub mod player;
pub mod relay;
pub mod sources;

pub use config::Config;
pub use error::{Error, Result};
