//! Event types for the Backbeat event system
//!
//! Backbeat uses hybrid communication:
//! - **EventBus** (`tokio::broadcast`): one-to-many event broadcasting
//! - **Notification channels** (`tokio::mpsc`): relay → player signalling
//! - **Shared state** (`Arc<Mutex<T>>`): the player transition gate
//!
//! Events describe what the player did, for observers (status surfaces,
//! log sinks, companion services). They never carry control-flow decisions.

use crate::types::{ListenerId, SongId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Playback mode as observed from outside the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Stopped,
    Waiting,
    Cooldown,
    Playing,
    Streaming,
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackMode::Stopped => write!(f, "stopped"),
            PlaybackMode::Waiting => write!(f, "waiting"),
            PlaybackMode::Cooldown => write!(f, "cooldown"),
            PlaybackMode::Playing => write!(f, "playing"),
            PlaybackMode::Streaming => write!(f, "streaming"),
        }
    }
}

/// Backbeat event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for external
/// consumers. All events carry the time they were emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Player moved between playback modes
    ModeChanged {
        old_mode: PlaybackMode,
        new_mode: PlaybackMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A song from the DJ queue or autoplaylist started playing
    SongStarted {
        song_id: SongId,
        dj: Option<ListenerId>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current song finished or was skipped
    SongFinished {
        song_id: SongId,
        skipped: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A live stream relay started
    StreamStarted {
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Skip votes reached quorum, or an operator/DJ forced the skip
    SongSkipped {
        song_id: SongId,
        votes: usize,
        threshold: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Neither the DJ queue nor the autoplaylist produced a playable song
    NothingToPlay {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Relay volume changed
    VolumeChanged {
        volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// One-to-many broadcast bus for [`PlayerEvent`]s.
///
/// Subscribers that fall behind lose the oldest events; emitters never block.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if nobody is listening.
    pub fn emit(&self, event: PlayerEvent) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers.
    ///
    /// Used for events that are informational only (progress, volume).
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Channel capacity this bus was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(100);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(100);
        let event = PlayerEvent::ModeChanged {
            old_mode: PlaybackMode::Stopped,
            new_mode: PlaybackMode::Playing,
            timestamp: chrono::Utc::now(),
        };

        // Should return error when no subscribers
        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let event = PlayerEvent::ModeChanged {
            old_mode: PlaybackMode::Stopped,
            new_mode: PlaybackMode::Playing,
            timestamp: chrono::Utc::now(),
        };

        assert!(bus.emit(event).is_ok());

        let received = rx.recv().await.unwrap();
        match received {
            PlayerEvent::ModeChanged { old_mode, new_mode, .. } => {
                assert_eq!(old_mode, PlaybackMode::Stopped);
                assert_eq!(new_mode, PlaybackMode::Playing);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_eventbus_emit_lossy() {
        let bus = EventBus::new(100);
        let event = PlayerEvent::VolumeChanged {
            volume: 1.0,
            timestamp: chrono::Utc::now(),
        };

        // Should not panic even without subscribers
        bus.emit_lossy(event);
    }

    #[test]
    fn test_playback_mode_display() {
        assert_eq!(PlaybackMode::Cooldown.to_string(), "cooldown");
        assert_eq!(PlaybackMode::Streaming.to_string(), "streaming");
    }
}
