//! # Bot Module
//!
//! Discord side of the jukebox.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It registers the slash
//! commands, turns them into [`PlaybackController`] calls and watches voice
//! states to leave channels that only bots remain in.

use anyhow::Result;
use parking_lot::Mutex;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{player::PlaybackController, transport::TrackEnded},
    config::Config,
    downloads::{self, DownloadDir},
};

/// How often silent voice channels are looked for.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub struct MusicBot {
    /// Bot configuration loaded from environment variables
    pub config: Arc<Config>,
    pub controller: Arc<PlaybackController>,
    pub downloads: Arc<DownloadDir>,
    /// Taken by the first `ready`; reconnects must not start a second loop.
    track_events: Mutex<Option<mpsc::UnboundedReceiver<TrackEnded>>>,
    shutdown: CancellationToken,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        controller: Arc<PlaybackController>,
        track_events: mpsc::UnboundedReceiver<TrackEnded>,
        downloads: Arc<DownloadDir>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            controller,
            downloads,
            track_events: Mutex::new(Some(track_events)),
            shutdown,
        }
    }

    /// Registers slash commands with Discord, in one guild when `GUILD_ID`
    /// is set and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Guild command registration failed: {:?}", e);
                        anyhow::anyhow!("Could not register guild commands. Check that the bot has 'applications.commands' in the guild.")
                    })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Global command registration failed: {:?}", e);
                    anyhow::anyhow!("Could not register global commands.")
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    /// Starts the track event loop, the download sweeper and the idle
    /// monitor, once.
    fn start_background_tasks(&self, ctx: &Context) {
        let Some(events) = self.track_events.lock().take() else {
            return;
        };

        tokio::spawn(events::run_track_events(
            ctx.http.clone(),
            self.controller.clone(),
            events,
            self.shutdown.clone(),
        ));

        tokio::spawn(downloads::run_sweeper(
            self.downloads.clone(),
            self.config.sweep_interval,
            self.config.sweep_min_bytes,
            self.config.sweep_stale_after,
            self.shutdown.clone(),
        ));

        if let Some(idle_timeout) = self.config.idle_timeout {
            tokio::spawn(events::run_idle_monitor(
                self.controller.clone(),
                idle_timeout,
                IDLE_CHECK_INTERVAL.min(idle_timeout),
                self.shutdown.clone(),
            ));
        }
    }

    /// Non-bot members in the voice channel the bot is connected to.
    async fn listeners(&self, ctx: &Context, guild_id: GuildId) -> Option<usize> {
        let channel_id = self.controller.voice_channel(guild_id).await?;
        let guild = ctx.cache.guild(guild_id)?;

        let occupants = guild.voice_states.values().map(|state| Occupant {
            channel_id: state.channel_id,
            bot: state
                .member
                .as_ref()
                .map(|member| member.user.bot)
                .or_else(|| guild.members.get(&state.user_id).map(|m| m.user.bot)),
        });

        Some(count_listeners(occupants, channel_id))
    }
}

/// One cached voice state, reduced to what auto-leave looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Occupant {
    channel_id: Option<ChannelId>,
    /// `None` when the member is not cached.
    bot: Option<bool>,
}

/// Occupants of `channel_id` that are not known to be bots.
fn count_listeners(occupants: impl IntoIterator<Item = Occupant>, channel_id: ChannelId) -> usize {
    occupants
        .into_iter()
        .filter(|occupant| occupant.channel_id == Some(channel_id))
        .filter(|occupant| occupant.bot != Some(true))
        .count()
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }

        self.start_background_tasks(&ctx);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    /// Clears the guild when the bot gets disconnected from outside, and
    /// leaves channels where no listeners remain.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|s| s.guild_id)) else {
            return;
        };

        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id {
            if old.is_some() && new.channel_id.is_none() {
                match self.controller.handle_disconnect(guild_id).await {
                    Ok(Some(_)) => info!("🧹 Cleared guild {} after losing voice", guild_id),
                    Ok(None) => {}
                    Err(e) => warn!("Cleanup after disconnect failed in guild {}: {}", guild_id, e),
                }
            }
            return;
        }

        if let Some(listeners) = self.listeners(&ctx, guild_id).await {
            self.controller.leave_if_abandoned(guild_id, listeners).await;
        }
    }
}
