//! Status line rendering
//!
//! Every transition or listener change recomputes a one-line summary for
//! the announce surface plus a short stream-metadata title. Rendering is
//! pure; the posting/update-in-place decision lives in the FSM.

use crate::player::state::{skip_threshold, PlayerState, SongContext, StreamContext};
use crate::sources::RosterView;
use backbeat_common::human_duration;

/// Everything the renderer needs, snapshotted under the transition gate.
pub struct StatusInput<'a> {
    pub state: PlayerState,
    pub song: Option<&'a SongContext>,
    pub stream: Option<&'a StreamContext>,
    /// Display name of the current song's DJ, if any
    pub dj_name: Option<String>,
    pub skip_ratio: f64,
    /// Pending stream-end auto-transition delay (Stopped only)
    pub auto_transition_secs: Option<u64>,
}

/// Rendered status: the announce line and the stream-metadata title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusContent {
    pub status_line: String,
    pub stream_meta: String,
}

fn join_names(names: &[(backbeat_common::ListenerId, String)], separator: &str) -> String {
    names
        .iter()
        .map(|(_, name)| name.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn render_status(input: &StatusInput, view: &RosterView) -> StatusContent {
    let direct_names = join_names(&view.direct_listeners, ", ");

    match input.state {
        PlayerState::Stopped => {
            let mut line = "Player is stopped".to_string();
            if let Some(secs) = input.auto_transition_secs {
                line.push_str(&format!(
                    "\nAutomatic transition into DJ mode after {} seconds",
                    secs
                ));
            }
            StatusContent {
                status_line: line,
                stream_meta: "Awkward silence".to_string(),
            }
        }

        PlayerState::Waiting => StatusContent {
            status_line: "Waiting for the first listener".to_string(),
            stream_meta: "Hold on a second...".to_string(),
        },

        PlayerState::Cooldown => StatusContent {
            status_line: "Waiting for DJs, automatic playlist will start in a few seconds"
                .to_string(),
            stream_meta: "Waiting for DJs".to_string(),
        },

        PlayerState::Streaming => {
            let title = input
                .stream
                .map(StreamContext::display_title)
                .unwrap_or("<untitled stream>");
            StatusContent {
                status_line: format!(
                    "Playing stream: {} | direct listeners ({}/{}): {}",
                    title,
                    view.direct_listeners.len(),
                    view.listener_count,
                    direct_names
                ),
                stream_meta: title.to_string(),
            }
        }

        PlayerState::Playing => {
            let Some(song) = input.song else {
                // Transitional render before a song is acquired
                return StatusContent {
                    status_line: "Picking the next song...".to_string(),
                    stream_meta: "Up next...".to_string(),
                };
            };
            let queued_by = input
                .dj_name
                .as_deref()
                .map(|name| format!(", queued by {}", name))
                .unwrap_or_default();
            let threshold = skip_threshold(input.skip_ratio, view.listener_count);
            let queue_names = join_names(&view.dj_queue, " -> ");

            StatusContent {
                status_line: format!(
                    "Playing: [{}] {}, length {}{} | skip votes {}/{} | direct listeners ({}/{}): {} | queue: {}",
                    song.song.id,
                    song.song.title,
                    human_duration(song.song.duration_secs),
                    queued_by,
                    song.votes(),
                    threshold,
                    view.direct_listeners.len(),
                    view.listener_count,
                    direct_names,
                    queue_names,
                ),
                stream_meta: format!("{}{}", song.song.title, queued_by),
            }
        }
    }
}
