use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{
    error::ConnectError,
    player::PlaybackController,
    session::GuildSession,
};

/// How long after dropping our own connection the disconnect Discord
/// reports back is still attributed to us.
const OWN_DISCONNECT_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Connected,
    AlreadyConnected,
    Moved { from: ChannelId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// There was no voice connection; the session was cleared anyway.
    NotConnected,
}

/// Voice connection lifecycle of the controller.
impl PlaybackController {
    pub async fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.transport.current_channel(guild_id).await
    }

    pub async fn is_connected(&self, guild_id: GuildId) -> bool {
        self.voice_channel(guild_id).await.is_some()
    }

    /// Connects to `channel_id`, moving from another channel if needed.
    ///
    /// Attempts closer together than the connect debounce fail with
    /// [`ConnectError::TooSoon`] before the transport is touched.
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<JoinOutcome, ConnectError> {
        let mut session = self.sessions.lock(guild_id).await;

        let now = Instant::now();
        if session.connect_throttled(now, self.settings.connect_debounce) {
            info!("⏳ Ignoring rapid join in guild {}", guild_id);
            return Err(ConnectError::TooSoon);
        }

        let current = self.transport.current_channel(guild_id).await;
        if current == Some(channel_id) {
            return Ok(JoinOutcome::AlreadyConnected);
        }
        session.mark_connect_attempt(now);

        match current {
            Some(from) => {
                info!(
                    "🔀 Moving from channel {} to {} in guild {}",
                    from, channel_id, guild_id
                );
                self.drop_connection(&mut session).await?;
                self.transport.connect(guild_id, channel_id).await?;
                Ok(JoinOutcome::Moved { from })
            }
            None => {
                self.transport.connect(guild_id, channel_id).await?;
                Ok(JoinOutcome::Connected)
            }
        }
    }

    /// Drops and re-establishes the connection to the current channel.
    pub async fn reconnect(&self, guild_id: GuildId) -> Result<ChannelId, ConnectError> {
        let mut session = self.sessions.lock(guild_id).await;

        let now = Instant::now();
        if session.connect_throttled(now, self.settings.connect_debounce) {
            return Err(ConnectError::TooSoon);
        }
        let channel_id = self
            .transport
            .current_channel(guild_id)
            .await
            .ok_or(ConnectError::NotConnected)?;
        session.mark_connect_attempt(now);

        info!("🔄 Reconnecting to channel {} in guild {}", channel_id, guild_id);
        self.drop_connection(&mut session).await?;
        self.transport.connect(guild_id, channel_id).await?;
        Ok(channel_id)
    }

    /// Halts playback, disconnects and forgets the guild's session.
    pub async fn leave(&self, guild_id: GuildId) -> Result<LeaveOutcome, ConnectError> {
        let mut session = self.sessions.lock(guild_id).await;
        self.leave_session(&mut session).await
    }

    /// Reacts to the bot's own voice state losing its channel.
    ///
    /// Disconnects caused by our own move or reconnect are ignored and
    /// return `None`. Anything else, a kick or a dropped connection, clears
    /// the guild like [`PlaybackController::leave`].
    pub async fn handle_disconnect(
        &self,
        guild_id: GuildId,
    ) -> Result<Option<LeaveOutcome>, ConnectError> {
        let mut session = self.sessions.lock(guild_id).await;

        if session.take_own_disconnect(Instant::now()) {
            debug!("Ignoring our own voice disconnect in guild {}", guild_id);
            return Ok(None);
        }

        info!("🔌 Bot disconnected in guild {}", guild_id);
        self.leave_session(&mut session).await.map(Some)
    }

    /// Leaves every guild with a session, returning how many were connected.
    pub async fn leave_all(&self) -> usize {
        let guild_ids = self.sessions.guild_ids();
        let results = join_all(guild_ids.iter().map(|guild_id| self.leave(*guild_id))).await;

        results
            .into_iter()
            .zip(guild_ids)
            .filter(|(result, guild_id)| match result {
                Ok(LeaveOutcome::Left) => true,
                Ok(LeaveOutcome::NotConnected) => false,
                Err(e) => {
                    warn!("Failed to leave guild {}: {}", guild_id, e);
                    false
                }
            })
            .count()
    }

    /// Leaves when nobody but bots is left listening.
    pub async fn leave_if_abandoned(&self, guild_id: GuildId, listeners: usize) -> bool {
        if listeners > 0 || !self.is_connected(guild_id).await {
            return false;
        }

        info!("🚪 Channel empty, leaving guild {}", guild_id);
        match self.leave(guild_id).await {
            Ok(outcome) => outcome == LeaveOutcome::Left,
            Err(e) => {
                warn!("Auto-leave failed in guild {}: {}", guild_id, e);
                false
            }
        }
    }

    /// Leaves the guild once it has been silent for `idle_timeout`, paused
    /// tracks included.
    pub async fn leave_if_idle(&self, guild_id: GuildId, idle_timeout: Duration) -> bool {
        let Some(mut session) = self.sessions.lock_existing(guild_id).await else {
            return false;
        };

        let idle = session
            .idle_for(Instant::now())
            .is_some_and(|idle| idle >= idle_timeout);
        if !idle || self.transport.current_channel(guild_id).await.is_none() {
            return false;
        }

        info!(
            "💤 Silent for {}, leaving guild {}",
            humantime::format_duration(idle_timeout),
            guild_id
        );
        match self.leave_session(&mut session).await {
            Ok(outcome) => outcome == LeaveOutcome::Left,
            Err(e) => {
                warn!("Idle leave failed in guild {}: {}", guild_id, e);
                false
            }
        }
    }

    /// Runs [`PlaybackController::leave_if_idle`] for every guild, returning
    /// how many were left.
    pub async fn leave_idle(&self, idle_timeout: Duration) -> usize {
        let guild_ids = self.sessions.guild_ids();
        join_all(
            guild_ids
                .iter()
                .map(|guild_id| self.leave_if_idle(*guild_id, idle_timeout)),
        )
        .await
        .into_iter()
        .filter(|left| *left)
        .count()
    }

    async fn leave_session(&self, session: &mut GuildSession) -> Result<LeaveOutcome, ConnectError> {
        let guild_id = session.guild_id();

        if self.transport.current_channel(guild_id).await.is_none() {
            self.sessions.retire(session);
            return Ok(LeaveOutcome::NotConnected);
        }

        if let Some(playing) = session.take_now_playing() {
            playing.halt();
            sleep(self.settings.leave_grace).await;
        }

        let disconnected = self.transport.disconnect(guild_id).await;
        self.sessions.retire(session);
        disconnected?;

        info!("👋 Left voice in guild {}", guild_id);
        Ok(LeaveOutcome::Left)
    }

    /// Halts playback and disconnects, then waits for the voice server to
    /// settle before the caller connects again.
    async fn drop_connection(&self, session: &mut GuildSession) -> Result<(), ConnectError> {
        if let Some(playing) = session.take_now_playing() {
            playing.halt();
        }
        session.expect_own_disconnect(Instant::now() + OWN_DISCONNECT_WINDOW);
        self.transport.disconnect(session.guild_id()).await?;
        sleep(self.settings.reconnect_settle).await;
        Ok(())
    }
}
