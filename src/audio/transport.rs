use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::File as FileInput,
    tracks::TrackHandle,
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{path::Path, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{ConnectError, PlaybackError};

/// A track ending, for whatever reason, identified by its playback token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEnded {
    pub guild_id: GuildId,
    pub token: u64,
}

/// Handed to the transport with every track; fired when that track ends.
///
/// Firing more than once is harmless, the controller only honours the first
/// signal for a token that is still current.
#[derive(Debug, Clone)]
pub struct TrackEndSignal {
    ended: TrackEnded,
    sender: mpsc::UnboundedSender<TrackEnded>,
}

impl TrackEndSignal {
    pub fn new(guild_id: GuildId, token: u64, sender: mpsc::UnboundedSender<TrackEnded>) -> Self {
        Self {
            ended: TrackEnded { guild_id, token },
            sender,
        }
    }

    pub fn event(&self) -> TrackEnded {
        self.ended
    }

    pub fn fire(&self) {
        if self.sender.send(self.ended).is_err() {
            debug!("Track event loop closed, dropping end of token {}", self.ended.token);
        }
    }
}

/// Control over a track the transport is currently playing.
pub trait ActivePlayback: Send + Sync {
    fn stop(&self);

    fn pause(&self) -> Result<(), PlaybackError>;

    fn resume(&self) -> Result<(), PlaybackError>;
}

/// Voice connection and audio output for guilds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Voice channel the bot is connected to in the guild, if any.
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), ConnectError>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), ConnectError>;

    /// Starts `media` as the only track of the guild's voice connection.
    async fn play(
        &self,
        guild_id: GuildId,
        media: &Path,
        title: &str,
        on_end: TrackEndSignal,
    ) -> Result<Box<dyn ActivePlayback>, PlaybackError>;
}

/// [`VoiceTransport`] backed by songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild_id)?;
        let call = call.lock().await;
        call.current_channel().map(|channel| ChannelId::from(channel.0))
    }

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), ConnectError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(connect_error)?;

        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("Could not self-deafen in guild {}: {:?}", guild_id, e);
        }

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), ConnectError> {
        match self.manager.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Disconnected from voice in guild {}", guild_id);
                Ok(())
            }
            Err(e) => Err(connect_error(e)),
        }
    }

    async fn play(
        &self,
        guild_id: GuildId,
        media: &Path,
        title: &str,
        on_end: TrackEndSignal,
    ) -> Result<Box<dyn ActivePlayback>, PlaybackError> {
        let call = self
            .manager
            .get(guild_id)
            .ok_or_else(|| PlaybackError::TransportFailure("no voice call for guild".into()))?;

        let input = FileInput::new(media.to_path_buf());
        let handle = call.lock().await.play_only_input(input.into());

        // Errored tracks do not always emit End, listen for both
        for event in [TrackEvent::End, TrackEvent::Error] {
            let notifier = TrackEndNotifier {
                signal: on_end.clone(),
            };
            if let Err(e) = handle.add_event(Event::Track(event), notifier) {
                let _ = handle.stop();
                return Err(PlaybackError::TransportFailure(e.to_string()));
            }
        }

        debug!("▶️ Transport playing {} in guild {}", title, guild_id);
        Ok(Box::new(handle))
    }
}

impl ActivePlayback for TrackHandle {
    fn stop(&self) {
        if let Err(e) = TrackHandle::stop(self) {
            debug!("Track already finished: {:?}", e);
        }
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        TrackHandle::pause(self).map_err(|e| PlaybackError::TransportFailure(e.to_string()))
    }

    fn resume(&self) -> Result<(), PlaybackError> {
        TrackHandle::play(self).map_err(|e| PlaybackError::TransportFailure(e.to_string()))
    }
}

fn connect_error(error: JoinError) -> ConnectError {
    match error {
        JoinError::TimedOut => ConnectError::Timeout,
        other => ConnectError::TransportClosed(other.to_string()),
    }
}

/// Forwards songbird track events to the controller.
struct TrackEndNotifier {
    signal: TrackEndSignal,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in *tracks {
                debug!(
                    "Track event in guild {}: {:?}",
                    self.signal.event().guild_id,
                    state.playing
                );
            }
        }

        self.signal.fire();
        None
    }
}
