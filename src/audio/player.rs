use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    error::{MusicError, MusicResult, PlaybackError},
    session::{GuildSession, NowPlaying, PlaybackState, RequestOrigin, SessionRegistry},
    transport::{TrackEndSignal, TrackEnded, VoiceTransport},
};
use crate::{
    config::Config,
    sources::{ResolvedTrack, TrackRequest, TrackResolver},
};

/// Tunables of the playback controller.
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Consecutive unplayable tracks tolerated by one advancement.
    pub max_consecutive_failures: usize,
    pub connect_debounce: Duration,
    pub reconnect_settle: Duration,
    pub leave_grace: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            connect_debounce: Duration::from_secs(3),
            reconnect_settle: Duration::from_secs(2),
            leave_grace: Duration::from_millis(500),
        }
    }
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            connect_debounce: config.connect_debounce,
            reconnect_settle: config.reconnect_settle,
            leave_grace: config.leave_grace,
        }
    }
}

/// Result of one advancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Started {
        title: String,
        origin: RequestOrigin,
        /// Unplayable entries skipped on the way.
        skipped: usize,
    },
    /// Queue and loop list are both empty.
    Idle { skipped: usize },
    /// Playback is stopped, nothing was advanced.
    Suppressed,
    /// No voice connection to play on.
    Disconnected,
    /// Gave up after too many unplayable entries in a row.
    Exhausted { failures: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Started { title: String },
    Queued { position: usize },
    Advanced(AdvanceOutcome),
    AlreadyPlaying,
    QueueEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Loop list length after an addition.
    pub added: Option<usize>,
    pub advanced: Option<AdvanceOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped(AdvanceOutcome),
    Removed { from_queue: bool, from_loop: bool },
    NotListed,
    NothingPlaying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { title: String },
    NothingPlaying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused { title: String },
    Resumed { title: String },
    AlreadyPaused,
    NotPaused,
    NothingPlaying,
}

/// The track a guild is on, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTrack {
    pub title: String,
    pub origin: RequestOrigin,
    pub paused: bool,
}

/// Result of an automatic advancement, for announcing in chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEndReport {
    pub guild_id: GuildId,
    pub channel_id: Option<ChannelId>,
    pub outcome: AdvanceOutcome,
}

/// Loop list contents with the position that plays next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopListing {
    pub entries: Vec<TrackRequest>,
    pub cursor: usize,
}

/// Per-guild sequential playback over a shared voice transport.
///
/// Every operation holds the guild's session lock from start to finish,
/// resolution included, so a guild never advances twice for one event.
pub struct PlaybackController {
    pub(super) sessions: SessionRegistry,
    pub(super) resolver: Arc<dyn TrackResolver>,
    pub(super) transport: Arc<dyn VoiceTransport>,
    pub(super) settings: PlaybackSettings,
    track_events: mpsc::UnboundedSender<TrackEnded>,
}

impl PlaybackController {
    /// Creates the controller and the receiving end of its track events.
    ///
    /// The receiver must be drained into [`PlaybackController::handle_track_end`]
    /// for playback to advance on its own.
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        transport: Arc<dyn VoiceTransport>,
        settings: PlaybackSettings,
    ) -> (Self, mpsc::UnboundedReceiver<TrackEnded>) {
        let (track_events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            sessions: SessionRegistry::new(),
            resolver,
            transport,
            settings,
            track_events,
        };
        (controller, receiver)
    }

    /// Remembers where to announce automatic advancements for the guild.
    pub async fn set_announce_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.sessions
            .lock(guild_id)
            .await
            .set_announce_channel(channel_id);
    }

    /// Plays `request` now, or queues it behind what is already playing.
    /// Without a request, resumes from the queue, then the loop list.
    pub async fn play(
        &self,
        guild_id: GuildId,
        request: Option<TrackRequest>,
    ) -> MusicResult<PlayOutcome> {
        let mut session = self.sessions.lock(guild_id).await;

        let Some(request) = request else {
            return Ok(match session.state() {
                PlaybackState::Playing => PlayOutcome::AlreadyPlaying,
                _ if !session.has_pending() => PlayOutcome::QueueEmpty,
                _ => {
                    session.set_stopped(false);
                    PlayOutcome::Advanced(self.advance(&mut session).await)
                }
            });
        };

        if session.state() == PlaybackState::Playing {
            let position = session.enqueue(request);
            return Ok(PlayOutcome::Queued { position });
        }

        if !session.queue().is_empty() {
            // Earlier requests go first
            session.enqueue(request);
            session.set_stopped(false);
            return Ok(PlayOutcome::Advanced(self.advance(&mut session).await));
        }

        // Resolution errors must leave the session untouched
        let track = self.resolver.resolve(&request).await?;
        let title = self
            .start(&mut session, request, RequestOrigin::Queue, track)
            .await?;
        session.set_stopped(false);
        Ok(PlayOutcome::Started { title })
    }

    /// Adds `request` to the loop list, starting loop playback when idle.
    /// Without a request, resumes a stopped guild.
    pub async fn add_loop(
        &self,
        guild_id: GuildId,
        request: Option<TrackRequest>,
    ) -> LoopOutcome {
        let mut session = self.sessions.lock(guild_id).await;
        let added = request.map(|request| session.add_to_loop(request));

        let advanced = match session.state() {
            PlaybackState::Playing => None,
            PlaybackState::Idle if !session.loop_list().is_empty() => {
                Some(self.advance(&mut session).await)
            }
            PlaybackState::Idle => None,
            PlaybackState::Stopped => {
                session.set_stopped(false);
                if session.has_pending() {
                    Some(self.advance(&mut session).await)
                } else {
                    None
                }
            }
        };

        LoopOutcome { added, advanced }
    }

    /// Removes `request` from the loop list, returning how many remain.
    pub async fn remove_from_loop(&self, guild_id: GuildId, request: &TrackRequest) -> Option<usize> {
        let mut session = self.sessions.lock_existing(guild_id).await?;
        session
            .remove_from_loop(request)
            .then(|| session.loop_list().len())
    }

    /// Without a request, ends the current track early and advances.
    /// With one, drops it from the queue and the loop list instead.
    pub async fn skip(&self, guild_id: GuildId, request: Option<TrackRequest>) -> SkipOutcome {
        let Some(mut session) = self.sessions.lock_existing(guild_id).await else {
            return match request {
                Some(_) => SkipOutcome::NotListed,
                None => SkipOutcome::NothingPlaying,
            };
        };

        if let Some(request) = request {
            let from_queue = session.remove_from_queue(&request);
            let from_loop = session.remove_from_loop(&request);
            return if from_queue || from_loop {
                SkipOutcome::Removed {
                    from_queue,
                    from_loop,
                }
            } else {
                SkipOutcome::NotListed
            };
        }

        match session.take_now_playing() {
            Some(playing) => {
                info!("⏭️ Skipping {} in guild {}", playing.title, guild_id);
                playing.halt();
                SkipOutcome::Skipped(self.advance(&mut session).await)
            }
            None => SkipOutcome::NothingPlaying,
        }
    }

    /// Halts the current track and holds off advancement until resumed.
    pub async fn stop(&self, guild_id: GuildId) -> StopOutcome {
        let Some(mut session) = self.sessions.lock_existing(guild_id).await else {
            return StopOutcome::NothingPlaying;
        };

        match session.take_now_playing() {
            Some(playing) => {
                let title = playing.title.clone();
                playing.halt();
                session.set_stopped(true);
                info!("⏹️ Stopped playback in guild {}", guild_id);
                StopOutcome::Stopped { title }
            }
            None => StopOutcome::NothingPlaying,
        }
    }

    /// Holds the current track in place. The queue, loop list and stopped
    /// flag are left alone.
    pub async fn pause(&self, guild_id: GuildId) -> Result<PauseOutcome, PlaybackError> {
        let Some(mut session) = self.sessions.lock_existing(guild_id).await else {
            return Ok(PauseOutcome::NothingPlaying);
        };
        let Some(playing) = session.now_playing_mut() else {
            return Ok(PauseOutcome::NothingPlaying);
        };

        if !playing.pause()? {
            return Ok(PauseOutcome::AlreadyPaused);
        }
        info!("⏸️ Paused {} in guild {}", playing.title, guild_id);
        Ok(PauseOutcome::Paused {
            title: playing.title.clone(),
        })
    }

    /// Continues a track held by [`PlaybackController::pause`].
    pub async fn resume(&self, guild_id: GuildId) -> Result<PauseOutcome, PlaybackError> {
        let Some(mut session) = self.sessions.lock_existing(guild_id).await else {
            return Ok(PauseOutcome::NothingPlaying);
        };
        let Some(playing) = session.now_playing_mut() else {
            return Ok(PauseOutcome::NothingPlaying);
        };

        if !playing.resume()? {
            return Ok(PauseOutcome::NotPaused);
        }
        info!("▶️ Resumed {} in guild {}", playing.title, guild_id);
        Ok(PauseOutcome::Resumed {
            title: playing.title.clone(),
        })
    }

    /// Advances after the transport reported the end of a track.
    ///
    /// Returns `None` for signals that no longer match the current track:
    /// duplicates, or tracks already halted by skip, stop or leave.
    pub async fn handle_track_end(&self, ended: TrackEnded) -> Option<TrackEndReport> {
        let mut session = self.sessions.lock_existing(ended.guild_id).await?;

        let Some(playing) = session.take_if_current(ended.token) else {
            debug!(
                "Ignoring stale track end {} in guild {}",
                ended.token, ended.guild_id
            );
            return None;
        };
        playing.finish();

        let outcome = self.advance(&mut session).await;
        Some(TrackEndReport {
            guild_id: ended.guild_id,
            channel_id: session.announce_channel(),
            outcome,
        })
    }

    pub async fn state(&self, guild_id: GuildId) -> PlaybackState {
        match self.sessions.lock_existing(guild_id).await {
            Some(session) => session.state(),
            None => PlaybackState::Idle,
        }
    }

    pub async fn queue(&self, guild_id: GuildId) -> Vec<TrackRequest> {
        match self.sessions.lock_existing(guild_id).await {
            Some(session) => session.queue().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn loop_list(&self, guild_id: GuildId) -> LoopListing {
        match self.sessions.lock_existing(guild_id).await {
            Some(session) => LoopListing {
                entries: session.loop_list().to_vec(),
                cursor: session.loop_cursor(),
            },
            None => LoopListing {
                entries: Vec::new(),
                cursor: 0,
            },
        }
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<CurrentTrack> {
        let session = self.sessions.lock_existing(guild_id).await?;
        session.now_playing().map(|playing| CurrentTrack {
            title: playing.title.clone(),
            origin: playing.origin,
            paused: playing.is_paused(),
        })
    }

    /// Starts the next playable entry, skipping unplayable ones up to the
    /// failure limit.
    pub(super) async fn advance(&self, session: &mut GuildSession) -> AdvanceOutcome {
        let guild_id = session.guild_id();
        let mut failures = 0;

        loop {
            if session.is_stopped() {
                return AdvanceOutcome::Suppressed;
            }
            if self.transport.current_channel(guild_id).await.is_none() {
                debug!("No voice connection in guild {}, not advancing", guild_id);
                return AdvanceOutcome::Disconnected;
            }

            let Some((request, origin)) = session.next_request() else {
                info!("📭 Nothing left to play in guild {}", guild_id);
                return AdvanceOutcome::Idle { skipped: failures };
            };

            let started = match self.resolver.resolve(&request).await {
                Ok(track) => self
                    .start(session, request.clone(), origin, track)
                    .await
                    .map_err(MusicError::from),
                Err(e) => Err(MusicError::from(e)),
            };

            match started {
                Ok(title) => {
                    return AdvanceOutcome::Started {
                        title,
                        origin,
                        skipped: failures,
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        guild_id = %guild_id,
                        request = %request,
                        error = %e,
                        "Skipping unplayable track"
                    );
                    if failures >= self.settings.max_consecutive_failures {
                        warn!(
                            "Giving up in guild {} after {} unplayable tracks",
                            guild_id, failures
                        );
                        return AdvanceOutcome::Exhausted { failures };
                    }
                }
            }
        }
    }

    /// Hands a resolved track to the transport and records it as current.
    async fn start(
        &self,
        session: &mut GuildSession,
        request: TrackRequest,
        origin: RequestOrigin,
        track: ResolvedTrack,
    ) -> Result<String, PlaybackError> {
        let guild_id = session.guild_id();
        let token = session.issue_token();
        let signal = TrackEndSignal::new(guild_id, token, self.track_events.clone());
        let ResolvedTrack { title, artifact } = track;

        // On failure the artifact drops here, deleting the download
        let handle = self
            .transport
            .play(guild_id, artifact.path(), &title, signal)
            .await?;

        info!("🎵 Playing in guild {}: {}", guild_id, title);
        session.begin(NowPlaying::new(
            token,
            title.clone(),
            request,
            origin,
            handle,
            artifact,
        ));
        Ok(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        error::ResolutionError,
        testing::{harness, Harness, GUILD},
    };
    use pretty_assertions::assert_eq;

    async fn end_current(h: &mut Harness) -> Option<TrackEndReport> {
        h.transport.finish_last();
        let ended = h.events.recv().await.expect("track end signal");
        h.controller.handle_track_end(ended).await
    }

    async fn title(h: &Harness) -> Option<String> {
        h.controller.now_playing(GUILD).await.map(|current| current.title)
    }

    fn started(report: Option<TrackEndReport>) -> String {
        match report.map(|r| r.outcome) {
            Some(AdvanceOutcome::Started { title, .. }) => title,
            other => panic!("expected a started track, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queue_plays_in_order_then_idles() {
        let mut h = harness();

        let first = h.controller.play(GUILD, Some("a".into())).await.unwrap();
        assert_eq!(first, PlayOutcome::Started { title: "title:a".into() });
        let second = h.controller.play(GUILD, Some("b".into())).await.unwrap();
        assert_eq!(second, PlayOutcome::Queued { position: 1 });

        assert_eq!(started(end_current(&mut h).await), "title:b");

        let last = end_current(&mut h).await.unwrap();
        assert_eq!(last.outcome, AdvanceOutcome::Idle { skipped: 0 });
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Idle);
        assert_eq!(h.transport.played(), vec!["title:a", "title:b"]);
    }

    #[tokio::test]
    async fn test_loop_list_round_robin() {
        let mut h = harness();

        let outcome = h.controller.add_loop(GUILD, Some("x".into())).await;
        assert_eq!(outcome.added, Some(1));
        assert!(matches!(
            outcome.advanced,
            Some(AdvanceOutcome::Started { origin: RequestOrigin::Loop(0), .. })
        ));
        // A one-entry list wraps straight back to its start
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 0);

        let outcome = h.controller.add_loop(GUILD, Some("y".into())).await;
        assert_eq!(outcome, LoopOutcome { added: Some(2), advanced: None });
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 0);

        assert_eq!(started(end_current(&mut h).await), "title:x");
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 1);
        assert_eq!(started(end_current(&mut h).await), "title:y");
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 0);
        assert_eq!(started(end_current(&mut h).await), "title:x");
        assert_eq!(h.transport.played(), vec!["title:x", "title:x", "title:y", "title:x"]);
    }

    #[tokio::test]
    async fn test_queue_drains_before_loop() {
        let mut h = harness();
        {
            let mut session = h.controller.sessions.lock(GUILD).await;
            session.enqueue("a".into());
            session.add_to_loop("x".into());
        }

        let outcome = h.controller.play(GUILD, None).await.unwrap();
        assert!(matches!(
            outcome,
            PlayOutcome::Advanced(AdvanceOutcome::Started { ref title, origin: RequestOrigin::Queue, .. })
                if title == "title:a"
        ));

        assert_eq!(started(end_current(&mut h).await), "title:x");
        assert_eq!(started(end_current(&mut h).await), "title:x");
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 0);
    }

    #[tokio::test]
    async fn test_stop_then_play_resumes_with_next_item() {
        let h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("b".into())).await.unwrap();

        let stopped = h.controller.stop(GUILD).await;
        assert_eq!(stopped, StopOutcome::Stopped { title: "title:a".into() });
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Stopped);
        assert!(h.transport.was_stopped(0));

        // The halted track's own end signal must not advance
        let ended = h.transport.signal(0).event();
        assert_eq!(h.controller.handle_track_end(ended).await, None);
        assert_eq!(h.controller.queue(GUILD).await, vec![TrackRequest::from("b")]);

        let resumed = h.controller.play(GUILD, None).await.unwrap();
        assert!(matches!(
            resumed,
            PlayOutcome::Advanced(AdvanceOutcome::Started { ref title, .. }) if title == "title:b"
        ));
        assert_eq!(h.transport.played(), vec!["title:a", "title:b"]);
    }

    #[tokio::test]
    async fn test_stopped_guild_does_not_autostart_without_resume() {
        let h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.stop(GUILD).await;

        let outcome = h.controller.add_loop(GUILD, None).await;
        assert_eq!(outcome, LoopOutcome { added: None, advanced: None });
        // Resuming with nothing pending leaves the guild idle
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_loop_command_resumes_stopped_guild_with_pending_entries() {
        let mut h = harness();
        h.controller.add_loop(GUILD, Some("x".into())).await;
        h.controller.add_loop(GUILD, Some("y".into())).await;
        h.controller.stop(GUILD).await;
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Stopped);

        let outcome = h.controller.add_loop(GUILD, None).await;
        assert_eq!(
            outcome,
            LoopOutcome {
                added: None,
                advanced: Some(AdvanceOutcome::Started {
                    title: "title:x".into(),
                    origin: RequestOrigin::Loop(0),
                    skipped: 0,
                }),
            }
        );
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Playing);
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 1);

        // Automatic advancement is back on
        assert_eq!(started(end_current(&mut h).await), "title:y");
    }

    #[tokio::test]
    async fn test_pause_and_resume_keep_the_track() {
        let mut h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("b".into())).await.unwrap();

        assert_eq!(
            h.controller.pause(GUILD).await,
            Ok(PauseOutcome::Paused { title: "title:a".into() })
        );
        assert!(h.transport.is_paused(0));
        assert_eq!(h.controller.pause(GUILD).await, Ok(PauseOutcome::AlreadyPaused));
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Playing);
        assert_eq!(
            h.controller.now_playing(GUILD).await,
            Some(CurrentTrack {
                title: "title:a".into(),
                origin: RequestOrigin::Queue,
                paused: true,
            })
        );
        assert_eq!(h.controller.queue(GUILD).await, vec![TrackRequest::from("b")]);

        assert_eq!(
            h.controller.resume(GUILD).await,
            Ok(PauseOutcome::Resumed { title: "title:a".into() })
        );
        assert!(!h.transport.is_paused(0));
        assert_eq!(h.controller.resume(GUILD).await, Ok(PauseOutcome::NotPaused));

        assert_eq!(started(end_current(&mut h).await), "title:b");
    }

    #[tokio::test]
    async fn test_pause_with_nothing_playing() {
        let h = harness();
        assert_eq!(h.controller.pause(GUILD).await, Ok(PauseOutcome::NothingPlaying));
        assert_eq!(h.controller.resume(GUILD).await, Ok(PauseOutcome::NothingPlaying));

        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.stop(GUILD).await;
        assert_eq!(h.controller.resume(GUILD).await, Ok(PauseOutcome::NothingPlaying));
    }

    #[tokio::test]
    async fn test_play_while_stopped_resumes() {
        let h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.stop(GUILD).await;

        let outcome = h.controller.play(GUILD, Some("c".into())).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Started { title: "title:c".into() });
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_play_without_request_starts_loop_list() {
        let mut h = harness();
        {
            let mut session = h.controller.sessions.lock(GUILD).await;
            session.add_to_loop("x".into());
            session.add_to_loop("y".into());
        }

        let outcome = h.controller.play(GUILD, None).await.unwrap();
        assert!(matches!(
            outcome,
            PlayOutcome::Advanced(AdvanceOutcome::Started { origin: RequestOrigin::Loop(0), .. })
        ));
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 1);
        assert_eq!(started(end_current(&mut h).await), "title:y");
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 0);
        assert_eq!(started(end_current(&mut h).await), "title:x");
        assert_eq!(h.controller.loop_list(GUILD).await.cursor, 1);
    }

    #[tokio::test]
    async fn test_play_without_request() {
        let h = harness();
        assert_eq!(h.controller.play(GUILD, None).await.unwrap(), PlayOutcome::QueueEmpty);

        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        assert_eq!(h.controller.play(GUILD, None).await.unwrap(), PlayOutcome::AlreadyPlaying);
    }

    #[tokio::test]
    async fn test_explicit_play_failure_leaves_session_unchanged() {
        let h = harness();
        h.resolver.fail_on("broken");
        h.controller.add_loop(GUILD, Some("x".into())).await;
        h.controller.add_loop(GUILD, Some("y".into())).await;
        h.controller.stop(GUILD).await;

        let result = h.controller.play(GUILD, Some("broken".into())).await;
        assert_eq!(
            result,
            Err(MusicError::Resolution(ResolutionError::NotFound("broken".into())))
        );
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Stopped);
        assert!(h.controller.queue(GUILD).await.is_empty());
        let looped = h.controller.loop_list(GUILD).await;
        assert_eq!(looped.entries.len(), 2);
        assert_eq!(looped.cursor, 0);
    }

    #[tokio::test]
    async fn test_bad_queue_entries_are_skipped_silently() {
        let mut h = harness();
        h.resolver.fail_on("bad");
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("bad".into())).await.unwrap();
        h.controller.play(GUILD, Some("c".into())).await.unwrap();

        let report = end_current(&mut h).await.unwrap();
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Started {
                title: "title:c".into(),
                origin: RequestOrigin::Queue,
                skipped: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_all_bad_loop_list_is_bounded() {
        let h = harness();
        h.resolver.fail_on("bad1");
        h.resolver.fail_on("bad2");
        h.controller.add_loop(GUILD, Some("bad1".into())).await;
        // First addition already went through the failure guard
        assert_eq!(h.resolver.calls().len(), 5);

        let outcome = h.controller.add_loop(GUILD, Some("bad2".into())).await;
        assert_eq!(outcome.advanced, Some(AdvanceOutcome::Exhausted { failures: 5 }));
        assert_eq!(h.resolver.calls().len(), 10);
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_transport_failure_releases_artifact() {
        let h = harness();
        h.transport.fail_next_play();

        let result = h.controller.play(GUILD, Some("a".into())).await;
        assert!(matches!(result, Err(MusicError::Playback(_))));
        assert!(h.resolver.artifacts_left().is_empty());
        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_skip_advances_once() {
        let h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("b".into())).await.unwrap();
        h.controller.play(GUILD, Some("c".into())).await.unwrap();

        let skipped = h.controller.skip(GUILD, None).await;
        assert!(matches!(
            skipped,
            SkipOutcome::Skipped(AdvanceOutcome::Started { ref title, .. }) if title == "title:b"
        ));
        assert!(h.transport.was_stopped(0));

        // The skipped track's end arrives late and is ignored
        assert_eq!(h.controller.handle_track_end(h.transport.signal(0).event()).await, None);
        assert_eq!(h.controller.queue(GUILD).await, vec![TrackRequest::from("c")]);
        assert_eq!(title(&h).await.as_deref(), Some("title:b"));
    }

    #[tokio::test]
    async fn test_skip_when_idle() {
        let h = harness();
        assert_eq!(h.controller.skip(GUILD, None).await, SkipOutcome::NothingPlaying);
        assert_eq!(h.controller.stop(GUILD).await, StopOutcome::NothingPlaying);
    }

    #[tokio::test]
    async fn test_skip_request_removes_from_queue_and_loop() {
        let h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("b".into())).await.unwrap();
        h.controller.add_loop(GUILD, Some("b".into())).await;
        h.controller.add_loop(GUILD, Some("x".into())).await;

        assert_eq!(
            h.controller.skip(GUILD, Some("b".into())).await,
            SkipOutcome::Removed { from_queue: true, from_loop: true }
        );
        assert_eq!(h.controller.skip(GUILD, Some("b".into())).await, SkipOutcome::NotListed);
        assert_eq!(h.controller.remove_from_loop(GUILD, &"x".into()).await, Some(0));
        assert_eq!(h.controller.remove_from_loop(GUILD, &"x".into()).await, None);
        assert_eq!(title(&h).await.as_deref(), Some("title:a"));
    }

    #[tokio::test]
    async fn test_duplicate_end_signals_advance_once() {
        let mut h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("b".into())).await.unwrap();
        h.controller.play(GUILD, Some("c".into())).await.unwrap();

        let signal = h.transport.signal(0);
        signal.fire();
        signal.fire();
        let first = h.events.recv().await.unwrap();
        let second = h.events.recv().await.unwrap();

        assert!(h.controller.handle_track_end(first).await.is_some());
        assert!(h.controller.handle_track_end(second).await.is_none());
        assert_eq!(h.controller.queue(GUILD).await, vec![TrackRequest::from("c")]);
    }

    #[tokio::test]
    async fn test_artifact_released_once_when_stop_races_natural_end() {
        let h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        let media = h.transport.media(0);
        assert!(media.exists());

        let natural = {
            let controller = h.controller.clone();
            let ended = h.transport.signal(0).event();
            tokio::spawn(async move { controller.handle_track_end(ended).await })
        };
        let forced = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.stop(GUILD).await })
        };
        let natural = natural.await.unwrap();
        let forced = forced.await.unwrap();

        // Exactly one of the two owned the track
        assert!(natural.is_some() != matches!(forced, StopOutcome::Stopped { .. }));
        assert!(!media.exists());
        assert!(h.resolver.artifacts_left().is_empty());
    }

    #[tokio::test]
    async fn test_no_advance_without_voice_connection() {
        let mut h = harness();
        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(GUILD, Some("b".into())).await.unwrap();
        h.transport.drop_connection();

        let report = end_current(&mut h).await.unwrap();
        assert_eq!(report.outcome, AdvanceOutcome::Disconnected);
        assert_eq!(h.controller.queue(GUILD).await, vec![TrackRequest::from("b")]);
    }

    #[tokio::test]
    async fn test_report_carries_announce_channel() {
        let mut h = harness();
        h.controller
            .set_announce_channel(GUILD, ChannelId::new(55))
            .await;
        h.controller.play(GUILD, Some("a".into())).await.unwrap();

        let report = end_current(&mut h).await.unwrap();
        assert_eq!(report.channel_id, Some(ChannelId::new(55)));
        assert_eq!(report.guild_id, GUILD);
    }

    #[tokio::test]
    async fn test_guilds_are_independent() {
        let h = harness();
        let other = GuildId::new(2);
        h.transport.connect_guild(other);

        h.controller.play(GUILD, Some("a".into())).await.unwrap();
        h.controller.play(other, Some("z".into())).await.unwrap();
        h.controller.stop(GUILD).await;

        assert_eq!(h.controller.state(GUILD).await, PlaybackState::Stopped);
        assert_eq!(h.controller.state(other).await, PlaybackState::Playing);
    }
}
