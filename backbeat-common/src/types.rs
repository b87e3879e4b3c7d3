//! Shared domain types

use serde::{Deserialize, Serialize};

/// Identifier of a listener (and potential DJ) in the shared session.
///
/// Assigned by the roster service; Backbeat never generates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a song in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(pub i64);

impl std::fmt::Display for SongId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A playable song as handed out by the playlist/autoplaylist source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    /// Directly playable URL (already resolved by the library).
    pub url: String,
    pub duration_secs: u32,
}

/// Format a duration in seconds as `M:SS` for status lines.
pub fn human_duration(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
