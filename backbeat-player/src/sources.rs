//! Collaborator interfaces of the player
//!
//! The controller core treats everything beyond the FSM and the relay as an
//! external collaborator behind a trait: where songs come from, who is
//! listening, where status text goes, and how user-supplied URLs become
//! playable ones. Shipped implementations live in `db` (library-backed
//! playlist source) and at the bottom of this module (in-process roster,
//! tracing-backed announcer, pass-through resolver).

use async_trait::async_trait;
use backbeat_common::{ListenerId, Song, SongId};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

/// Why the playlist source could not hand out a DJ's next song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSongError {
    /// The DJ's playlist has no more songs; the DJ leaves the rotation.
    PlaylistEmpty,

    /// The song exists but is flagged unplayable (failed download,
    /// blacklist). Skip-worthy: consumes one retry attempt.
    Unavailable { song_id: SongId, title: String },

    /// Transient failure preparing the song. Skip-worthy.
    Failed(String),
}

impl std::fmt::Display for NextSongError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextSongError::PlaylistEmpty => write!(f, "playlist is empty"),
            NextSongError::Unavailable { song_id, title } => {
                write!(f, "song [{}] {} is unavailable", song_id, title)
            }
            NextSongError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

/// Source of songs: per-DJ playlists plus the shared autoplaylist.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// Pop the head song of the given DJ's playlist.
    async fn next_song(&self, dj: ListenerId) -> Result<Song, NextSongError>;

    /// Pick a song from the autoplaylist, if any is eligible.
    ///
    /// `Unavailable` means a candidate was found but flagged; the caller
    /// logs it and may try again.
    async fn autoplaylist_song(&self) -> Result<Option<Song>, NextSongError>;

    /// Record that a song finished playing. Must complete before the next
    /// song is acquired so overplay protection sees up-to-date counts.
    async fn update_stats(
        &self,
        song: SongId,
        skipped: bool,
        skip_votes: usize,
    ) -> crate::Result<()>;
}

/// Read-only view of the session roster, for status rendering.
#[derive(Debug, Clone, Default)]
pub struct RosterView {
    /// Total listeners, direct and voice
    pub listener_count: usize,
    /// Listeners on the direct stream, with display names
    pub direct_listeners: Vec<(ListenerId, String)>,
    /// DJ rotation in play order, with display names
    pub dj_queue: Vec<(ListenerId, String)>,
}

/// The listener/DJ roster. Mutations here are limited to queue membership;
/// presence itself is tracked elsewhere and pushed into the player via
/// `Player::users_changed`.
#[async_trait]
pub trait ListenerRoster: Send + Sync {
    async fn listener_count(&self) -> usize;

    async fn is_listening(&self, id: ListenerId) -> bool;

    /// Pop the next DJ from the rotation.
    async fn next_dj(&self) -> Option<ListenerId>;

    /// Number of DJs waiting in the rotation.
    async fn queued_djs(&self) -> usize;

    /// Remove a DJ from the rotation (empty or broken playlist).
    async fn leave_queue(&self, id: ListenerId);

    /// Empty the DJ rotation.
    async fn clear_queue(&self);

    async fn display_name(&self, id: ListenerId) -> String;

    async fn display_info(&self) -> RosterView;
}

/// Status/notification surface.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Post a fresh status message, superseding any previous one.
    async fn post_status(&self, text: &str);

    /// Update the current status message in place.
    /// Returns false if there is no message to update.
    async fn update_status(&self, text: &str) -> bool;

    /// Push the stream metadata title (ICY-style).
    async fn set_stream_meta(&self, title: &str);

    /// Session-visible notice.
    async fn message(&self, text: &str);

    /// Private notice to one listener.
    async fn whisper(&self, id: ListenerId, text: &str);

    /// Operator log surface.
    async fn log(&self, text: &str);
}

/// Outcome of media resolution.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    /// Directly playable URL (may differ from what the user supplied)
    pub url: String,
    /// Best-effort title
    pub title: Option<String>,
}

/// Turns a user-supplied identifier/URL into a directly playable URL.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, String>;
}

/// In-process roster for standalone operation and tests.
///
/// Listeners and the DJ rotation are managed by whoever owns the roster;
/// the player only pops and evicts DJs.
#[derive(Default)]
pub struct InMemoryRoster {
    inner: Mutex<RosterInner>,
}

#[derive(Default)]
struct RosterInner {
    listeners: Vec<(ListenerId, String)>,
    direct: Vec<ListenerId>,
    dj_queue: VecDeque<ListenerId>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, id: ListenerId, name: &str, direct: bool) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.listeners.iter().any(|(l, _)| *l == id) {
            inner.listeners.push((id, name.to_string()));
        }
        if direct && !inner.direct.contains(&id) {
            inner.direct.push(id);
        }
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(l, _)| *l != id);
        inner.direct.retain(|l| *l != id);
        inner.dj_queue.retain(|l| *l != id);
    }

    pub fn join_queue(&self, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.dj_queue.contains(&id) {
            inner.dj_queue.push_back(id);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().unwrap().dj_queue.len()
    }
}

#[async_trait]
impl ListenerRoster for InMemoryRoster {
    async fn listener_count(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    async fn is_listening(&self, id: ListenerId) -> bool {
        self.inner.lock().unwrap().listeners.iter().any(|(l, _)| *l == id)
    }

    async fn next_dj(&self) -> Option<ListenerId> {
        self.inner.lock().unwrap().dj_queue.pop_front()
    }

    async fn queued_djs(&self) -> usize {
        self.inner.lock().unwrap().dj_queue.len()
    }

    async fn leave_queue(&self, id: ListenerId) {
        self.inner.lock().unwrap().dj_queue.retain(|l| *l != id);
    }

    async fn clear_queue(&self) {
        self.inner.lock().unwrap().dj_queue.clear();
    }

    async fn display_name(&self, id: ListenerId) -> String {
        self.inner
            .lock()
            .unwrap()
            .listeners
            .iter()
            .find(|(l, _)| *l == id)
            .map(|(_, n)| n.clone())
            .unwrap_or_else(|| id.to_string())
    }

    async fn display_info(&self) -> RosterView {
        let inner = self.inner.lock().unwrap();
        let name_of = |id: &ListenerId| {
            inner
                .listeners
                .iter()
                .find(|(l, _)| l == id)
                .map(|(_, n)| n.clone())
                .unwrap_or_else(|| id.to_string())
        };
        RosterView {
            listener_count: inner.listeners.len(),
            direct_listeners: inner.direct.iter().map(|id| (*id, name_of(id))).collect(),
            dj_queue: inner.dj_queue.iter().map(|id| (*id, name_of(id))).collect(),
        }
    }
}

/// Announcer that writes everything to the log. Default for standalone
/// operation, where no chat or stream-meta surface is attached.
#[derive(Default)]
pub struct LogAnnouncer;

#[async_trait]
impl Announcer for LogAnnouncer {
    async fn post_status(&self, text: &str) {
        info!(target: "backbeat::status", "{}", text);
    }

    async fn update_status(&self, _text: &str) -> bool {
        // No editable surface; force a fresh post
        false
    }

    async fn set_stream_meta(&self, title: &str) {
        info!(target: "backbeat::status", "stream meta: {}", title);
    }

    async fn message(&self, text: &str) {
        info!(target: "backbeat::announce", "{}", text);
    }

    async fn whisper(&self, id: ListenerId, text: &str) {
        info!(target: "backbeat::announce", "[to {}] {}", id, text);
    }

    async fn log(&self, text: &str) {
        info!(target: "backbeat::oplog", "{}", text);
    }
}

/// Resolver that trusts the supplied URL as already playable.
#[derive(Default)]
pub struct PassthroughResolver;

#[async_trait]
impl MediaResolver for PassthroughResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, String> {
        Ok(ResolvedMedia {
            url: url.to_string(),
            title: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roster_queue_rotation() {
        let roster = InMemoryRoster::new();
        roster.add_listener(ListenerId(1), "ada", true);
        roster.add_listener(ListenerId(2), "lin", false);
        roster.join_queue(ListenerId(1));
        roster.join_queue(ListenerId(2));

        assert_eq!(roster.next_dj().await, Some(ListenerId(1)));
        assert_eq!(roster.next_dj().await, Some(ListenerId(2)));
        assert_eq!(roster.next_dj().await, None);
    }

    #[tokio::test]
    async fn test_roster_leave_and_clear() {
        let roster = InMemoryRoster::new();
        roster.add_listener(ListenerId(1), "ada", false);
        roster.add_listener(ListenerId(2), "lin", false);
        roster.join_queue(ListenerId(1));
        roster.join_queue(ListenerId(2));

        roster.leave_queue(ListenerId(1)).await;
        assert_eq!(roster.queue_len(), 1);

        roster.clear_queue().await;
        assert_eq!(roster.next_dj().await, None);
    }

    #[tokio::test]
    async fn test_display_info_names() {
        let roster = InMemoryRoster::new();
        roster.add_listener(ListenerId(7), "grace", true);
        roster.join_queue(ListenerId(7));

        let view = roster.display_info().await;
        assert_eq!(view.listener_count, 1);
        assert_eq!(view.direct_listeners, vec![(ListenerId(7), "grace".to_string())]);
        assert_eq!(view.dj_queue, vec![(ListenerId(7), "grace".to_string())]);
    }
}
