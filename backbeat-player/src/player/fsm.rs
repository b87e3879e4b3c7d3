//! Player finite-state machine
//!
//! One long-running task owns all mode transitions. Commands record a
//! desired next state (and any context it needs) under the transition gate
//! and raise a switch request, then wake the task; the task settles whatever
//! the old state owned before acting on the new one. The request itself is
//! state under the gate, so a wakeup is only ever a hint and a stale one is
//! harmless. Anything that arrives while a transition is in flight either
//! waits on the gate or, for the vote/skip commands, bounces with a busy
//! error rather than queueing up behind it.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::player::decoder::{DecoderHandle, DecoderLauncher};
use crate::player::state::{skip_threshold, PlayerState, SongContext, StreamContext};
use crate::player::status::{render_status, StatusInput};
use crate::relay::{FrameConsumer, FrameProducer, Volume};
use crate::sources::{Announcer, ListenerRoster, MediaResolver, NextSongError, PlaylistSource};
use backbeat_common::events::PlayerEvent;
use backbeat_common::{EventBus, ListenerId, Song};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// How many songs a DJ may fail to deliver before being evicted from
/// the rotation.
const SONG_FETCH_ATTEMPTS: usize = 3;

/// External collaborators of the player, injected at construction.
pub struct PlayerDeps {
    pub playlist: Arc<dyn PlaylistSource>,
    pub roster: Arc<dyn ListenerRoster>,
    pub announcer: Arc<dyn Announcer>,
    pub resolver: Arc<dyn MediaResolver>,
    pub decoder: Arc<dyn DecoderLauncher>,
}

/// Everything owned by the current state. Only touched under the gate.
struct Core {
    state: PlayerState,
    next_state: PlayerState,
    /// A transition has been requested since the loop last went to sleep.
    /// Cleared by the loop before it parks; the `Notify` is only the wakeup.
    switch_requested: bool,
    /// Insert a cooldown before falling back to the autoplaylist
    apply_cooldown: bool,
    song: Option<SongContext>,
    stream: Option<StreamContext>,
    /// Stream staged by `request_stream`, adopted on entering Streaming
    pending_stream: Option<StreamContext>,
    /// A status message exists and may be edited in place
    status_posted: bool,
    cooldown_timer: Option<JoinHandle<()>>,
    stream_end_timer: Option<JoinHandle<()>>,
    decoder: Option<Box<dyn DecoderHandle>>,
}

/// The media controller FSM.
pub struct Player {
    deps: PlayerDeps,
    events: EventBus,
    gate: Mutex<Core>,
    switch: Notify,
    producer: FrameProducer,
    consumer: FrameConsumer,
    volume: Volume,
    skip_ratio: f64,
    cooldown: Duration,
    stream_end_delay: Duration,
    status_burial_threshold: u32,
    /// Unrelated messages posted since the status message, lock-free so
    /// message handlers never touch the gate
    scroll_count: AtomicU32,
    state_tx: watch::Sender<PlayerState>,
}

impl Player {
    pub fn new(
        config: &Config,
        deps: PlayerDeps,
        events: EventBus,
        producer: FrameProducer,
        consumer: FrameConsumer,
        volume: Volume,
    ) -> Arc<Self> {
        let initial = match config.initial_state.as_str() {
            "djmode" => PlayerState::Playing,
            "stopped" => PlayerState::Stopped,
            other => {
                error!("unknown initial_state {:?}, starting stopped", other);
                PlayerState::Stopped
            }
        };
        let (state_tx, _) = watch::channel(PlayerState::Stopped);
        Arc::new(Self {
            deps,
            events,
            gate: Mutex::new(Core {
                state: PlayerState::Stopped,
                next_state: initial,
                switch_requested: false,
                apply_cooldown: true,
                song: None,
                stream: None,
                pending_stream: None,
                status_posted: false,
                cooldown_timer: None,
                stream_end_timer: None,
                decoder: None,
            }),
            switch: Notify::new(),
            producer,
            consumer,
            volume,
            skip_ratio: config.player.skip_ratio,
            cooldown: Duration::from_secs(config.player.cooldown_secs),
            stream_end_delay: Duration::from_secs(config.player.stream_end_transition_secs),
            status_burial_threshold: config.player.status_burial_threshold,
            scroll_count: AtomicU32::new(0),
            state_tx,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Watch the current state. Updated at every transition, including
    /// self-transitions (song to song within Playing).
    pub fn watch_state(&self) -> watch::Receiver<PlayerState> {
        self.state_tx.subscribe()
    }

    pub async fn state(&self) -> PlayerState {
        self.gate.lock().await.state
    }

    pub async fn current_song(&self) -> Option<Song> {
        self.gate.lock().await.song.as_ref().map(|ctx| ctx.song.clone())
    }

    /// Relay gain, linear. 1.0 is unity; clamped to [0.0, 2.0].
    pub fn set_volume(&self, gain: f32) {
        self.volume.set(gain);
        self.events.emit_lossy(PlayerEvent::VolumeChanged {
            volume: self.volume.get(),
            timestamp: Utc::now(),
        });
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Record a pending transition and wake the loop.
    fn request_switch(&self, core: &mut Core) {
        core.switch_requested = true;
        self.switch.notify_one();
    }

    /// Stop playback. Cancels a pending stream-end auto-transition.
    pub async fn request_stop(&self) -> Result<()> {
        let mut core = self.gate.lock().await;
        if core.state == PlayerState::Stopped && core.stream_end_timer.is_none() {
            return Ok(());
        }
        if let Some(timer) = core.stream_end_timer.take() {
            timer.abort();
            let _ = timer.await;
            self.deps
                .announcer
                .message("Automatic transition to DJ mode was cancelled")
                .await;
        }
        core.next_state = PlayerState::Stopped;
        self.request_switch(&mut core);
        Ok(())
    }

    /// Enter DJ mode (Playing, with Waiting/Cooldown handled internally).
    pub async fn request_dj_mode(&self) -> Result<()> {
        let mut core = self.gate.lock().await;
        if matches!(
            core.state,
            PlayerState::Playing | PlayerState::Waiting | PlayerState::Cooldown
        ) {
            return Err(Error::InvalidState("Already in DJ mode".to_string()));
        }
        core.next_state = PlayerState::Playing;
        self.request_switch(&mut core);
        Ok(())
    }

    /// Relay a live stream. Replaces whatever is playing, including a
    /// currently relayed stream.
    pub async fn request_stream(&self, url: &str, title: Option<String>) -> Result<()> {
        let mut core = self.gate.lock().await;
        core.pending_stream = Some(StreamContext::new(url.to_string(), title));
        core.next_state = PlayerState::Streaming;
        self.request_switch(&mut core);
        Ok(())
    }

    /// Override the title of the currently relayed stream.
    pub async fn set_stream_title(&self, title: &str) -> Result<()> {
        let mut core = self.gate.lock().await;
        if core.state != PlayerState::Streaming {
            return Err(Error::InvalidState(
                "The stream title can be changed only while a stream plays".to_string(),
            ));
        }
        if let Some(stream) = core.stream.as_mut() {
            stream.title = Some(title.to_string());
        }
        // force a fresh post so the stream metadata is pushed too
        core.status_posted = false;
        self.publish_status(&mut core).await;
        Ok(())
    }

    /// Cast a skip vote. The current DJ voting against their own song skips
    /// it immediately.
    pub async fn skip_vote(&self, user: ListenerId) -> Result<()> {
        let mut core = self
            .gate
            .try_lock()
            .map_err(|_| Error::Busy("Skip vote failed, please try again".to_string()))?;
        if core.state != PlayerState::Playing {
            return Err(Error::InvalidState(
                "Voting to skip works only when a song is playing in DJ mode".to_string(),
            ));
        }
        if !self.deps.roster.is_listening(user).await {
            return Err(Error::InvalidState(
                "Only current listeners may vote to skip".to_string(),
            ));
        }
        let Some(ctx) = core.song.as_mut() else {
            return Err(Error::InvalidState("No song is playing".to_string()));
        };
        let song_id = ctx.song.id;

        if ctx.dj == Some(user) {
            ctx.mark_skipped();
            let votes = ctx.votes();
            let threshold = skip_threshold(self.skip_ratio, ctx.listeners());
            self.deps.announcer.message("Song skipped by the DJ").await;
            self.events.emit_lossy(PlayerEvent::SongSkipped {
                song_id,
                votes,
                threshold,
                timestamp: Utc::now(),
            });
            self.request_switch(&mut core);
            return Ok(());
        }

        ctx.vote(user);
        let quorum = ctx.quorum_reached(self.skip_ratio);
        let votes = ctx.votes();
        let threshold = skip_threshold(self.skip_ratio, ctx.listeners());
        if quorum {
            ctx.mark_skipped();
            self.deps
                .announcer
                .message("Community vote passed, skipping the current song")
                .await;
            self.events.emit_lossy(PlayerEvent::SongSkipped {
                song_id,
                votes,
                threshold,
                timestamp: Utc::now(),
            });
            self.request_switch(&mut core);
        } else {
            self.publish_status(&mut core).await;
        }
        Ok(())
    }

    /// Withdraw a standing skip vote.
    pub async fn skip_unvote(&self, user: ListenerId) -> Result<()> {
        let mut core = self.gate.try_lock().map_err(|_| {
            Error::Busy("Removing the skip vote failed, please try again".to_string())
        })?;
        if core.state != PlayerState::Playing {
            return Err(Error::InvalidState("No song is playing".to_string()));
        }
        let removed = match core.song.as_mut() {
            Some(ctx) => ctx.unvote(user),
            None => false,
        };
        if !removed {
            return Err(Error::InvalidState(
                "You have no standing skip vote".to_string(),
            ));
        }
        self.publish_status(&mut core).await;
        Ok(())
    }

    /// Operator skip, bypassing the vote.
    pub async fn force_skip(&self) -> Result<()> {
        let mut core = self.gate.try_lock().map_err(|_| {
            Error::Busy("Skip failed, please try again if still applicable".to_string())
        })?;
        if core.state != PlayerState::Playing {
            return Err(Error::InvalidState(
                "Skipping works only when a song is playing in DJ mode".to_string(),
            ));
        }
        let Some(ctx) = core.song.as_mut() else {
            return Err(Error::InvalidState("No song is playing".to_string()));
        };
        ctx.mark_skipped();
        self.events.emit_lossy(PlayerEvent::SongSkipped {
            song_id: ctx.song.id,
            votes: ctx.votes(),
            threshold: skip_threshold(self.skip_ratio, ctx.listeners()),
            timestamp: Utc::now(),
        });
        self.request_switch(&mut core);
        Ok(())
    }

    /// The session roster changed. Re-evaluates the waiting/playing edge,
    /// the cooldown detour and the skip quorum against the new roster.
    ///
    /// An audience that drained to zero does not cut the current song off;
    /// the loop re-checks the listener count at the next song boundary.
    pub async fn users_changed(&self) {
        let mut core = self.gate.lock().await;
        if core.state == PlayerState::Stopped {
            // a stopped player has no status worth refreshing
            return;
        }
        let listeners = self.deps.roster.listener_count().await;
        let djs_waiting = self.deps.roster.queued_djs().await > 0;

        // while somebody sits in the rotation, a drained queue earns another
        // cooldown detour before the autoplaylist takes over
        if djs_waiting {
            core.apply_cooldown = true;
        }

        match core.state {
            PlayerState::Waiting if listeners > 0 => {
                core.next_state = PlayerState::Playing;
                self.request_switch(&mut core);
                return;
            }
            PlayerState::Cooldown if djs_waiting => {
                // no point waiting out the cooldown with a DJ ready
                self.request_switch(&mut core);
                return;
            }
            PlayerState::Playing => {
                // a shrinking audience can tip the standing votes over quorum
                let quorum = match core.song.as_mut() {
                    Some(ctx) => {
                        ctx.update_listeners(listeners);
                        ctx.quorum_reached(self.skip_ratio)
                    }
                    None => false,
                };
                if quorum {
                    if let Some(ctx) = core.song.as_mut() {
                        ctx.mark_skipped();
                        self.events.emit_lossy(PlayerEvent::SongSkipped {
                            song_id: ctx.song.id,
                            votes: ctx.votes(),
                            threshold: skip_threshold(self.skip_ratio, ctx.listeners()),
                            timestamp: Utc::now(),
                        });
                    }
                    self.deps
                        .announcer
                        .message("Community vote passed, skipping the current song")
                        .await;
                    self.request_switch(&mut core);
                    return;
                }
            }
            _ => {}
        }
        self.publish_status(&mut core).await;
    }

    /// An unrelated message scrolled the status message further away.
    pub fn note_unrelated_message(&self) {
        self.scroll_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Repost the status if it has been buried by unrelated messages.
    pub async fn reprint_status(&self) {
        if self.scroll_count.load(Ordering::Relaxed) < self.status_burial_threshold {
            return;
        }
        let mut core = self.gate.lock().await;
        core.status_posted = false;
        self.publish_status(&mut core).await;
    }

    /// The relay ran out of buffered input with no producer attached.
    ///
    /// Called from the relay's exhaustion channel. If the FSM is mid
    /// transition this is a stale signal for input it is already tearing
    /// down, so a held gate means there is nothing to do.
    pub fn playback_ended(self: &Arc<Self>) {
        let Ok(mut core) = self.gate.try_lock() else {
            trace!("playback end signal during a transition, ignored");
            return;
        };
        if !matches!(core.state, PlayerState::Playing | PlayerState::Streaming) {
            return;
        }
        if core.state == PlayerState::Streaming && !self.stream_end_delay.is_zero() {
            core.stream_end_timer = Some(self.arm_stream_end_timer());
        }
        self.request_switch(&mut core);
    }

    /// Forward relay exhaustion signals into [`Player::playback_ended`].
    pub fn spawn_exhaustion_listener(
        self: &Arc<Self>,
        mut exhausted_rx: mpsc::UnboundedReceiver<()>,
    ) -> JoinHandle<()> {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            while exhausted_rx.recv().await.is_some() {
                player.playback_ended();
            }
        })
    }

    fn arm_cooldown_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(player.cooldown).await;
            let mut core = player.gate.lock().await;
            // stale once the state moved on
            if core.state == PlayerState::Cooldown {
                player.request_switch(&mut core);
            }
        })
    }

    fn arm_stream_end_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(player.stream_end_delay).await;
            let mut core = player.gate.lock().await;
            if core.state == PlayerState::Stopped {
                core.next_state = PlayerState::Playing;
                player.request_switch(&mut core);
            }
        })
    }

    async fn spawn_decoder(&self, url: &str, core: &mut Core) -> Result<()> {
        let handle = self.deps.decoder.spawn(url, self.producer.clone()).await?;
        core.decoder = Some(handle);
        Ok(())
    }

    /// Pop songs from the DJ's playlist until one is playable. The DJ is
    /// evicted from the rotation on an empty playlist or after too many
    /// broken songs.
    async fn fetch_song(&self, dj: ListenerId) -> Option<SongContext> {
        for _ in 0..SONG_FETCH_ATTEMPTS {
            match self.deps.playlist.next_song(dj).await {
                Ok(song) => return Some(SongContext::new(song, Some(dj))),
                Err(NextSongError::PlaylistEmpty) => {
                    self.deps.roster.leave_queue(dj).await;
                    self.deps
                        .announcer
                        .whisper(
                            dj,
                            "Your playlist is empty, please add more songs and rejoin the DJ queue",
                        )
                        .await;
                    return None;
                }
                Err(err) => {
                    if let NextSongError::Unavailable { song_id, title } = &err {
                        self.deps
                            .announcer
                            .log(&format!("Song [{}] {} is marked unplayable", song_id, title))
                            .await;
                    }
                    let name = self.deps.roster.display_name(dj).await;
                    self.deps
                        .announcer
                        .message(&format!("{}: song skipped: {}", name, err))
                        .await;
                }
            }
        }
        self.deps.roster.leave_queue(dj).await;
        self.deps
            .announcer
            .whisper(dj, "Please try to fix your playlist and rejoin the DJ queue")
            .await;
        None
    }

    /// Resolve the staged stream URL into a playable one. On failure the
    /// stream context is discarded and the caller falls through to Stopped.
    async fn resolve_stream(&self, core: &mut Core) -> bool {
        let Some(stream) = core.stream.as_mut() else {
            warn!("entered streaming mode without a stream to play");
            return false;
        };
        match self.deps.resolver.resolve(&stream.url).await {
            Ok(resolved) => {
                stream.url = resolved.url;
                if stream.title.is_none() {
                    stream.title =
                        Some(resolved.title.unwrap_or_else(|| "<untitled stream>".to_string()));
                }
                true
            }
            Err(reason) => {
                self.deps
                    .announcer
                    .message(&format!("Failed to obtain stream information: {}", reason))
                    .await;
                core.stream = None;
                false
            }
        }
    }

    async fn publish_status(&self, core: &mut Core) {
        let view = self.deps.roster.display_info().await;
        let dj_name = match core.song.as_ref().and_then(|ctx| ctx.dj) {
            Some(dj) => Some(self.deps.roster.display_name(dj).await),
            None => None,
        };
        let auto_transition_secs = (core.state == PlayerState::Stopped
            && core.stream_end_timer.is_some())
        .then(|| self.stream_end_delay.as_secs());

        let content = render_status(
            &StatusInput {
                state: core.state,
                song: core.song.as_ref(),
                stream: core.stream.as_ref(),
                dj_name,
                skip_ratio: self.skip_ratio,
                auto_transition_secs,
            },
            &view,
        );

        if core.status_posted && self.deps.announcer.update_status(&content.status_line).await {
            trace!("status updated in place");
            return;
        }
        self.deps.announcer.post_status(&content.status_line).await;
        self.deps.announcer.set_stream_meta(&content.stream_meta).await;
        core.status_posted = true;
        self.scroll_count.store(0, Ordering::Relaxed);
        debug!("fresh status posted");
    }

    /// The transition loop. Runs until a fatal error (decoder binary
    /// missing); everything else is handled in place.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut nothing_to_play = false;
        let mut core = self.gate.lock().await;

        loop {
            if core.state != core.next_state {
                debug!("player: {} -> {}", core.state, core.next_state);
                self.events.emit_lossy(PlayerEvent::ModeChanged {
                    old_mode: core.state.into(),
                    new_mode: core.next_state.into(),
                    timestamp: Utc::now(),
                });
            }
            core.state = core.next_state;
            let _ = self.state_tx.send(core.state);

            match core.state {
                PlayerState::Stopped => {
                    self.deps.roster.clear_queue().await;
                    core.apply_cooldown = true;
                }

                PlayerState::Waiting => {
                    core.apply_cooldown = true;
                    core.next_state = PlayerState::Playing;
                }

                PlayerState::Cooldown => {
                    core.next_state = PlayerState::Playing;
                    core.apply_cooldown = false;
                    core.cooldown_timer = Some(self.arm_cooldown_timer());
                }

                PlayerState::Streaming => {
                    self.deps.roster.clear_queue().await;
                    core.apply_cooldown = true;
                    // a dying stream falls back to Stopped unless replaced
                    core.next_state = PlayerState::Stopped;
                    if let Some(stream) = core.pending_stream.take() {
                        core.stream = Some(stream);
                    }
                    if !self.resolve_stream(&mut core).await {
                        continue;
                    }
                    let Some((url, title)) = core
                        .stream
                        .as_ref()
                        .map(|s| (s.url.clone(), s.display_title().to_string()))
                    else {
                        continue;
                    };
                    match self.spawn_decoder(&url, &mut core).await {
                        Ok(()) => {
                            self.events.emit_lossy(PlayerEvent::StreamStarted {
                                title,
                                timestamp: Utc::now(),
                            });
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!("decoder start failed for stream: {}", e);
                            self.deps
                                .announcer
                                .message(&format!("Failed to start stream playback: {}", e))
                                .await;
                            core.stream = None;
                            continue;
                        }
                    }
                }

                PlayerState::Playing => {
                    let listeners = self.deps.roster.listener_count().await;
                    if listeners == 0 {
                        core.next_state = PlayerState::Waiting;
                        continue;
                    }

                    while core.song.is_none() {
                        let Some(dj) = self.deps.roster.next_dj().await else {
                            break;
                        };
                        core.song = self.fetch_song(dj).await;
                    }

                    if core.song.is_none() {
                        if core.apply_cooldown {
                            core.next_state = PlayerState::Cooldown;
                            continue;
                        }
                        match self.deps.playlist.autoplaylist_song().await {
                            Ok(Some(song)) => {
                                core.song = Some(SongContext::new(song, None));
                            }
                            Ok(None) => {
                                if !nothing_to_play {
                                    nothing_to_play = true;
                                    self.deps
                                        .announcer
                                        .message(
                                            "No suitable song found for the automatic playlist. \
                                             Join the DJ queue to play something!",
                                        )
                                        .await;
                                    self.events.emit_lossy(PlayerEvent::NothingToPlay {
                                        timestamp: Utc::now(),
                                    });
                                }
                                core.apply_cooldown = true;
                                core.next_state = PlayerState::Cooldown;
                                continue;
                            }
                            Err(NextSongError::Unavailable { song_id, title }) => {
                                self.deps
                                    .announcer
                                    .log(&format!(
                                        "Song [{}] {} is marked unplayable, picking another",
                                        song_id, title
                                    ))
                                    .await;
                                continue;
                            }
                            Err(err) => {
                                warn!("autoplaylist selection failed: {}", err);
                                core.apply_cooldown = true;
                                core.next_state = PlayerState::Cooldown;
                                continue;
                            }
                        }
                    }

                    nothing_to_play = false;
                    if let Some(ctx) = core.song.as_mut() {
                        ctx.update_listeners(listeners);
                    }
                    let Some((song_id, dj, url)) = core
                        .song
                        .as_ref()
                        .map(|ctx| (ctx.song.id, ctx.dj, ctx.song.url.clone()))
                    else {
                        continue;
                    };
                    match self.spawn_decoder(&url, &mut core).await {
                        Ok(()) => {
                            self.events.emit_lossy(PlayerEvent::SongStarted {
                                song_id,
                                dj,
                                timestamp: Utc::now(),
                            });
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!("decoder start failed for song [{}]: {}", song_id, e);
                            let who = match dj {
                                Some(dj) => self.deps.roster.display_name(dj).await,
                                None => "autoplaylist".to_string(),
                            };
                            self.deps
                                .announcer
                                .message(&format!("{}: song skipped: {}", who, e))
                                .await;
                            core.song = None;
                            continue;
                        }
                    }
                }
            }

            if !(nothing_to_play && core.state == PlayerState::Cooldown) {
                self.publish_status(&mut core).await;
            }

            // wait for the next transition request with the gate released.
            // The request flag is cleared here, under the gate, so a wakeup
            // raised before this point cannot settle the state just entered.
            core.switch_requested = false;
            trace!("player settled in state, waiting");
            while !core.switch_requested {
                let notified = self.switch.notified();
                drop(core);
                notified.await;
                core = self.gate.lock().await;
            }

            // leaving the current state: settle whatever it owned
            core.status_posted = false;
            match core.state {
                PlayerState::Playing => {
                    if let Some(ctx) = core.song.take() {
                        if let Err(e) = self
                            .deps
                            .playlist
                            .update_stats(ctx.song.id, ctx.was_skipped(), ctx.votes())
                            .await
                        {
                            warn!(
                                "failed to record playback stats for [{}]: {}",
                                ctx.song.id, e
                            );
                        }
                        self.events.emit_lossy(PlayerEvent::SongFinished {
                            song_id: ctx.song.id,
                            skipped: ctx.was_skipped(),
                            timestamp: Utc::now(),
                        });
                    }
                }
                PlayerState::Streaming => {
                    core.stream = None;
                }
                PlayerState::Cooldown => {
                    if let Some(timer) = core.cooldown_timer.take() {
                        timer.abort();
                        let _ = timer.await;
                    }
                }
                PlayerState::Stopped => {
                    if let Some(timer) = core.stream_end_timer.take() {
                        timer.abort();
                        let _ = timer.await;
                    }
                }
                PlayerState::Waiting => {}
            }
            if let Some(mut decoder) = core.decoder.take() {
                decoder.kill().await;
            }
            let flushed = self.consumer.flush();
            if flushed > 0 {
                trace!("flushed {} stale buffered bytes", flushed);
            }
        }
    }
}
