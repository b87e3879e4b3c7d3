//! Player state and per-source contexts

use backbeat_common::events::PlaybackMode;
use backbeat_common::{ListenerId, Song};
use std::collections::HashSet;

/// Playback mode of the controller.
///
/// Exactly one current value exists, plus a pending "next" value written
/// before a transition is signalled. State only changes while the
/// transition gate is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing plays; the DJ queue is cleared on entry
    Stopped,
    /// DJ mode requested but no listener present yet
    Waiting,
    /// Brief pause before falling back to the autoplaylist
    Cooldown,
    /// Playing a DJ-queue or autoplaylist song
    Playing,
    /// Relaying a live stream
    Streaming,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Stopped => write!(f, "stopped"),
            PlayerState::Waiting => write!(f, "waiting"),
            PlayerState::Cooldown => write!(f, "cooldown"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Streaming => write!(f, "streaming"),
        }
    }
}

impl From<PlayerState> for PlaybackMode {
    fn from(state: PlayerState) -> Self {
        match state {
            PlayerState::Stopped => PlaybackMode::Stopped,
            PlayerState::Waiting => PlaybackMode::Waiting,
            PlayerState::Cooldown => PlaybackMode::Cooldown,
            PlayerState::Playing => PlaybackMode::Playing,
            PlayerState::Streaming => PlaybackMode::Streaming,
        }
    }
}

/// Number of skip votes needed at the given listener count.
pub fn skip_threshold(skip_ratio: f64, listeners: usize) -> usize {
    (skip_ratio * listeners as f64).ceil() as usize
}

/// What is currently playing in `Playing` mode.
///
/// Created when a song is selected, mutated only under the transition gate,
/// dropped when the player leaves `Playing`.
#[derive(Debug, Clone)]
pub struct SongContext {
    pub song: Song,
    /// The DJ who queued the song; `None` for autoplaylist picks
    pub dj: Option<ListenerId>,
    listener_snapshot: usize,
    skip_voters: HashSet<ListenerId>,
    skipped: bool,
}

impl SongContext {
    pub fn new(song: Song, dj: Option<ListenerId>) -> Self {
        Self {
            song,
            dj,
            listener_snapshot: 0,
            skip_voters: HashSet::new(),
            skipped: false,
        }
    }

    /// Record that this song ended by skip (quorum, DJ, or operator)
    /// rather than by running out.
    pub fn mark_skipped(&mut self) {
        self.skipped = true;
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped
    }

    /// Record a skip vote. Returns false if the vote was already standing.
    pub fn vote(&mut self, id: ListenerId) -> bool {
        self.skip_voters.insert(id)
    }

    /// Withdraw a skip vote. Returns false if no vote was standing.
    pub fn unvote(&mut self, id: ListenerId) -> bool {
        self.skip_voters.remove(&id)
    }

    /// Refresh the listener count the quorum is measured against.
    pub fn update_listeners(&mut self, count: usize) {
        self.listener_snapshot = count;
    }

    pub fn votes(&self) -> usize {
        self.skip_voters.len()
    }

    pub fn listeners(&self) -> usize {
        self.listener_snapshot
    }

    /// Whether the standing votes meet `ceil(skip_ratio × listeners)`.
    /// Never true with zero listeners.
    pub fn quorum_reached(&self, skip_ratio: f64) -> bool {
        self.listener_snapshot > 0
            && self.votes() >= skip_threshold(skip_ratio, self.listener_snapshot)
    }
}

/// What is currently playing in `Streaming` mode.
///
/// The URL is rewritten in place once the media resolver produces the
/// directly playable one. Dropped when the player leaves `Streaming`.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub url: String,
    pub title: Option<String>,
}

impl StreamContext {
    pub fn new(url: String, title: Option<String>) -> Self {
        Self { url, title }
    }

    /// Title for display, with the untitled fallback.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("<untitled stream>")
    }
}
