//! The media controller: state machine, decoder lifecycle, status text.

pub mod decoder;
pub mod fsm;
pub mod state;
pub mod status;

pub use decoder::{DecoderHandle, DecoderLauncher, FfmpegLauncher};
pub use fsm::{Player, PlayerDeps};
pub use state::{skip_threshold, PlayerState, SongContext, StreamContext};
pub use status::{render_status, StatusContent, StatusInput};
