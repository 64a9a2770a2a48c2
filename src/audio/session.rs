use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::{debug, info};

use super::{error::PlaybackError, transport::ActivePlayback};
use crate::sources::{MediaArtifact, TrackRequest};

/// Where the request of an advancement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Queue,
    /// Position of the entry within the loop list.
    Loop(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Stopped,
}

/// The track currently owned by a guild's voice connection.
pub struct NowPlaying {
    pub token: u64,
    pub title: String,
    pub request: TrackRequest,
    pub origin: RequestOrigin,
    handle: Box<dyn ActivePlayback>,
    artifact: MediaArtifact,
    paused_at: Option<Instant>,
}

impl NowPlaying {
    pub fn new(
        token: u64,
        title: String,
        request: TrackRequest,
        origin: RequestOrigin,
        handle: Box<dyn ActivePlayback>,
        artifact: MediaArtifact,
    ) -> Self {
        Self {
            token,
            title,
            request,
            origin,
            handle,
            artifact,
            paused_at: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Holds the track where it is. Returns `false` if it already was.
    pub fn pause(&mut self) -> Result<bool, PlaybackError> {
        if self.is_paused() {
            return Ok(false);
        }
        self.handle.pause()?;
        self.paused_at = Some(Instant::now());
        Ok(true)
    }

    /// Continues a paused track. Returns `false` if it was not paused.
    pub fn resume(&mut self) -> Result<bool, PlaybackError> {
        if !self.is_paused() {
            return Ok(false);
        }
        self.handle.resume()?;
        self.paused_at = None;
        Ok(true)
    }

    /// Ends a track that already finished on its own, releasing its media.
    pub fn finish(self) {
        debug!(
            "Finished {} ({:?} entry `{}`, {})",
            self.title,
            self.origin,
            self.request,
            self.artifact.path().display()
        );
    }

    /// Cuts the track short, then releases its media.
    pub fn halt(self) {
        self.handle.stop();
        debug!("Halted {}", self.title);
    }
}

/// Playback state of one guild.
pub struct GuildSession {
    guild_id: GuildId,
    queue: VecDeque<TrackRequest>,
    loop_list: Vec<TrackRequest>,
    loop_cursor: usize,
    stopped: bool,
    last_connect_attempt: Option<Instant>,
    own_disconnect_until: Option<Instant>,
    idle_since: Instant,
    now_playing: Option<NowPlaying>,
    announce_channel: Option<ChannelId>,
    next_token: u64,
    closed: bool,
}

impl GuildSession {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            queue: VecDeque::new(),
            loop_list: Vec::new(),
            loop_cursor: 0,
            stopped: false,
            last_connect_attempt: None,
            own_disconnect_until: None,
            idle_since: Instant::now(),
            now_playing: None,
            announce_channel: None,
            next_token: 0,
            closed: false,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlaybackState {
        if self.now_playing.is_some() {
            PlaybackState::Playing
        } else if self.stopped {
            PlaybackState::Stopped
        } else {
            PlaybackState::Idle
        }
    }

    /// Appends to the queue and returns the 1-based position.
    pub fn enqueue(&mut self, request: TrackRequest) -> usize {
        info!("➕ Queued in guild {}: {}", self.guild_id, request);
        self.queue.push_back(request);
        self.queue.len()
    }

    /// Appends to the loop list and returns its new length.
    pub fn add_to_loop(&mut self, request: TrackRequest) -> usize {
        info!("🔁 Looping in guild {}: {}", self.guild_id, request);
        self.loop_list.push(request);
        self.loop_list.len()
    }

    pub fn queue(&self) -> &VecDeque<TrackRequest> {
        &self.queue
    }

    pub fn loop_list(&self) -> &[TrackRequest] {
        &self.loop_list
    }

    pub fn loop_cursor(&self) -> usize {
        self.loop_cursor
    }

    /// Removes the first queued occurrence of `request`.
    pub fn remove_from_queue(&mut self, request: &TrackRequest) -> bool {
        match self.queue.iter().position(|queued| queued == request) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the first loop list occurrence of `request`, keeping the
    /// cursor in range.
    pub fn remove_from_loop(&mut self, request: &TrackRequest) -> bool {
        let Some(index) = self.loop_list.iter().position(|looped| looped == request) else {
            return false;
        };

        self.loop_list.remove(index);
        self.loop_cursor = if self.loop_list.is_empty() {
            0
        } else {
            self.loop_cursor % self.loop_list.len()
        };
        true
    }

    /// Picks the next request: queue head first, then the loop list entry
    /// under the cursor.
    pub fn next_request(&mut self) -> Option<(TrackRequest, RequestOrigin)> {
        if let Some(request) = self.queue.pop_front() {
            return Some((request, RequestOrigin::Queue));
        }

        if self.loop_list.is_empty() {
            return None;
        }

        let position = self.loop_cursor;
        let request = self.loop_list[position].clone();
        self.loop_cursor = (position + 1) % self.loop_list.len();
        Some((request, RequestOrigin::Loop(position)))
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() || !self.loop_list.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    /// Hands out the token of the next playback.
    pub fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    pub fn now_playing_mut(&mut self) -> Option<&mut NowPlaying> {
        self.now_playing.as_mut()
    }

    /// Installs a new current track, halting any leftover one.
    pub fn begin(&mut self, playing: NowPlaying) {
        if let Some(previous) = self.now_playing.replace(playing) {
            previous.halt();
        }
    }

    pub fn take_now_playing(&mut self) -> Option<NowPlaying> {
        let playing = self.now_playing.take();
        if playing.is_some() {
            self.idle_since = Instant::now();
        }
        playing
    }

    /// Takes the current track only if `token` still identifies it.
    pub fn take_if_current(&mut self, token: u64) -> Option<NowPlaying> {
        match &self.now_playing {
            Some(playing) if playing.token == token => self.take_now_playing(),
            _ => None,
        }
    }

    /// How long the guild has been silent as of `now`, counting a paused
    /// track as silent. `None` while a track is audible.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        let since = match &self.now_playing {
            Some(playing) => playing.paused_at?,
            None => self.idle_since,
        };
        Some(now.saturating_duration_since(since))
    }

    #[cfg(test)]
    pub fn last_connect_attempt(&self) -> Option<Instant> {
        self.last_connect_attempt
    }

    pub fn mark_connect_attempt(&mut self, at: Instant) {
        self.last_connect_attempt = Some(at);
        if self.now_playing.is_none() {
            self.idle_since = at;
        }
    }

    /// Records that the bot is about to drop its own voice connection, so
    /// the disconnect Discord reports back until `until` is not mistaken
    /// for a kick.
    pub fn expect_own_disconnect(&mut self, until: Instant) {
        self.own_disconnect_until = Some(until);
    }

    /// Consumes a pending own-disconnect expectation still valid at `now`.
    pub fn take_own_disconnect(&mut self, now: Instant) -> bool {
        self.own_disconnect_until
            .take()
            .is_some_and(|until| now <= until)
    }

    /// Whether a connection attempt happened less than `window` before `now`.
    pub fn connect_throttled(&self, now: Instant, window: Duration) -> bool {
        self.last_connect_attempt
            .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    pub fn announce_channel(&self) -> Option<ChannelId> {
        self.announce_channel
    }

    pub fn set_announce_channel(&mut self, channel_id: ChannelId) {
        self.announce_channel = Some(channel_id);
    }

    /// Halts playback and forgets everything. The session is unusable after.
    pub fn close(&mut self) {
        if let Some(playing) = self.now_playing.take() {
            playing.halt();
        }
        self.queue.clear();
        self.loop_list.clear();
        self.loop_cursor = 0;
        self.stopped = false;
        self.last_connect_attempt = None;
        self.own_disconnect_until = None;
        self.announce_channel = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Guild id to session lookup.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Mutex<GuildSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<Mutex<GuildSession>> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildSession::new(guild_id))))
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildSession>>> {
        self.sessions.get(&guild_id).map(|session| session.clone())
    }

    /// Forgets the guild. A no-op for unknown guilds.
    pub fn remove(&self, guild_id: GuildId) {
        self.sessions.remove(&guild_id);
    }

    #[cfg(test)]
    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Locks the guild's live session, creating it on first use.
    pub async fn lock(&self, guild_id: GuildId) -> OwnedMutexGuard<GuildSession> {
        loop {
            let guard = self.get_or_create(guild_id).lock_owned().await;
            if !guard.is_closed() {
                return guard;
            }
            // Closed while we waited; the next lookup yields a fresh session
        }
    }

    /// Locks the guild's session only if one exists.
    pub async fn lock_existing(&self, guild_id: GuildId) -> Option<OwnedMutexGuard<GuildSession>> {
        let guard = self.get(guild_id)?.lock_owned().await;
        (!guard.is_closed()).then_some(guard)
    }

    /// Closes the session behind `guard` and drops it from the registry.
    pub fn retire(&self, guard: &mut GuildSession) {
        guard.close();
        self.remove(guard.guild_id());
        info!("🗑️ Session cleared for guild {}", guard.guild_id());
    }
}
