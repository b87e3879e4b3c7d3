//! Configuration for the Backbeat controller
//!
//! A single TOML file read once at startup; nothing here changes while the
//! controller runs. Command-line overrides are applied in `main`.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete controller configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the SQLite library database (songs, playlists, credit)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// State the player starts in: "stopped" or "djmode"
    #[serde(default = "default_initial_state")]
    pub initial_state: String,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub credit: CreditConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Player FSM tunables
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Fraction of listeners whose skip votes end the current song
    #[serde(default = "default_skip_ratio")]
    pub skip_ratio: f64,

    /// Seconds to wait after a stream ends before auto-switching to DJ mode.
    /// Zero disables the auto-transition.
    #[serde(default)]
    pub stream_end_transition_secs: u64,

    /// Pause inserted before falling back to the autoplaylist, to give
    /// human DJs a chance to queue
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Unrelated messages after which the status is reposted instead of
    /// edited in place, so it stays visible
    #[serde(default = "default_status_burial_threshold")]
    pub status_burial_threshold: u32,
}

/// PCM relay geometry
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u32,

    /// Frame duration in milliseconds; one frame is relayed per tick
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Capacity of the decoder → relay frame buffer, in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Initial relay volume in percent (100 = unity gain)
    #[serde(default = "default_volume_percent")]
    pub default_volume: u32,
}

/// Anti-overplay credit renewal
#[derive(Debug, Clone, Deserialize)]
pub struct CreditConfig {
    /// Maximum replay credit a song can accumulate
    #[serde(default = "default_credit_cap")]
    pub cap: i64,

    /// Hours of wall-clock time that grant one credit
    #[serde(default = "default_credit_renew_hours")]
    pub renew_hours: u32,
}

/// External decoder subprocess
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// Decoder executable
    #[serde(default = "default_decoder_program")]
    pub program: String,

    /// Argument template. `{url}`, `{rate}` and `{channels}` are substituted;
    /// the decoder must write raw s16le PCM to stdout.
    #[serde(default = "default_decoder_args")]
    pub args: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (tracing EnvFilter syntax)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("backbeat.db")
}

fn default_initial_state() -> String {
    "stopped".to_string()
}

fn default_skip_ratio() -> f64 {
    0.5
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_status_burial_threshold() -> u32 {
    3
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u32 {
    2
}

fn default_frame_ms() -> u32 {
    20
}

fn default_buffer_capacity() -> usize {
    1_048_576
}

fn default_volume_percent() -> u32 {
    100
}

fn default_credit_cap() -> i64 {
    3
}

fn default_credit_renew_hours() -> u32 {
    24
}

fn default_decoder_program() -> String {
    "ffmpeg".to_string()
}

fn default_decoder_args() -> Vec<String> {
    [
        "-reconnect",
        "1",
        "-reconnect_delay_max",
        "3",
        "-loglevel",
        "error",
        "-i",
        "{url}",
        "-vn",
        "-f",
        "s16le",
        "-ar",
        "{rate}",
        "-ac",
        "{channels}",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            skip_ratio: default_skip_ratio(),
            stream_end_transition_secs: 0,
            cooldown_secs: default_cooldown_secs(),
            status_burial_threshold: default_status_burial_threshold(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_ms: default_frame_ms(),
            buffer_capacity: default_buffer_capacity(),
            default_volume: default_volume_percent(),
        }
    }
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            cap: default_credit_cap(),
            renew_hours: default_credit_renew_hours(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: default_decoder_program(),
            args: default_decoder_args(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            initial_state: default_initial_state(),
            player: PlayerConfig::default(),
            audio: AudioConfig::default(),
            credit: CreditConfig::default(),
            decoder: DecoderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AudioConfig {
    /// Bytes in one frame of s16le PCM at the configured geometry.
    pub fn frame_len(&self) -> usize {
        (self.sample_rate as usize * self.channels as usize * 2 * self.frame_ms as usize) / 1000
    }

    /// Wall-clock duration of one frame (= the relay tick period).
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// Relay ticks in one second, rounded down.
    pub fn ticks_per_second(&self) -> u32 {
        1000 / self.frame_ms
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub async fn load(path: &PathBuf) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.player.skip_ratio) {
            return Err(Error::Config(format!(
                "skip_ratio must be in [0.0, 1.0], got {}",
                self.player.skip_ratio
            )));
        }
        if self.audio.frame_ms == 0 || self.audio.frame_ms > 1000 {
            return Err(Error::Config(format!(
                "frame_ms must be in [1, 1000], got {}",
                self.audio.frame_ms
            )));
        }
        if self.audio.buffer_capacity == 0 || self.audio.buffer_capacity > (1 << 31) {
            return Err(Error::Config(
                "buffer_capacity must be positive and below 2 GiB".to_string(),
            ));
        }
        if self.audio.buffer_capacity < self.audio.frame_len() {
            return Err(Error::Config(format!(
                "buffer_capacity {} is smaller than one frame ({})",
                self.audio.buffer_capacity,
                self.audio.frame_len()
            )));
        }
        if self.audio.default_volume > 200 {
            return Err(Error::Config(format!(
                "default_volume must be in [0, 200] percent, got {}",
                self.audio.default_volume
            )));
        }
        if self.credit.renew_hours == 0 {
            return Err(Error::Config("credit renew_hours must be positive".to_string()));
        }
        Ok(())
    }
}
