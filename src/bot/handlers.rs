use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    audio::{
        connection::JoinOutcome,
        error::{ConnectError, MusicError},
    },
    bot::MusicBot,
    sources::TrackRequest,
    ui::{embeds, messages},
};

/// A slash command with its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Join,
    Leave,
    Play(Option<TrackRequest>),
    Loop(Option<TrackRequest>),
    Deloop(TrackRequest),
    Skip(Option<TrackRequest>),
    Stop,
    Pause,
    Resume,
    NowPlaying,
    Queue,
    LoopList,
    Reconnect,
    Cleanup,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("unknown command /{0}")]
    Unknown(String),
    #[error("/{0} needs a query")]
    MissingQuery(&'static str),
}

impl ChatCommand {
    /// Parses a command name and its optional `query`. Blank queries count
    /// as absent.
    pub fn parse(name: &str, query: Option<&str>) -> Result<Self, CommandParseError> {
        let request = query
            .map(TrackRequest::new)
            .filter(|request| !request.as_str().is_empty());

        Ok(match name {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "play" => Self::Play(request),
            "loop" => Self::Loop(request),
            "deloop" => Self::Deloop(request.ok_or(CommandParseError::MissingQuery("deloop"))?),
            "skip" => Self::Skip(request),
            "stop" => Self::Stop,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "nowplaying" => Self::NowPlaying,
            "queue" => Self::Queue,
            "looplist" => Self::LoopList,
            "reconnect" => Self::Reconnect,
            "cleanup" => Self::Cleanup,
            "help" => Self::Help,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        })
    }
}

enum Reply {
    Text(String),
    Embed(CreateEmbed),
}

/// Handles a slash command: defers, runs it, then edits in the reply.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside a guild"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str());

    let parsed = match ChatCommand::parse(&command.data.name, query) {
        Ok(parsed) => parsed,
        Err(e) => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content(format!("❌ {}", e))
                            .ephemeral(true),
                    ),
                )
                .await?;
            return Ok(());
        }
    };

    // Resolution can take far longer than the interaction deadline
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    bot.controller
        .set_announce_channel(guild_id, command.channel_id)
        .await;

    let reply = run(ctx, &command, bot, guild_id, parsed).await;

    let edit = match reply {
        Reply::Text(text) => EditInteractionResponse::new().content(text),
        Reply::Embed(embed) => EditInteractionResponse::new().embed(embed),
    };
    command.edit_response(&ctx.http, edit).await?;

    Ok(())
}

async fn run(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
    parsed: ChatCommand,
) -> Reply {
    let controller = &bot.controller;

    let text = match parsed {
        ChatCommand::Join => {
            let channel_id = match user_voice_channel(ctx, guild_id, command.user.id) {
                Ok(channel_id) => channel_id,
                Err(reply) => return Reply::Text(reply),
            };
            let outcome = match ensure_can_connect(ctx, guild_id, channel_id) {
                Ok(()) => controller.join(guild_id, channel_id).await,
                Err(e) => Err(e),
            };
            messages::join(&outcome, channel_id)
        }
        ChatCommand::Leave => messages::leave(&controller.leave(guild_id).await),
        ChatCommand::Reconnect => messages::reconnect(&controller.reconnect(guild_id).await),
        ChatCommand::Play(request) => {
            if request.is_some() {
                if let Err(reply) = join_if_needed(ctx, command, bot, guild_id).await {
                    return Reply::Text(reply);
                }
            }
            messages::play(&controller.play(guild_id, request).await)
        }
        ChatCommand::Loop(request) => {
            if request.is_some() {
                if let Err(reply) = join_if_needed(ctx, command, bot, guild_id).await {
                    return Reply::Text(reply);
                }
            }
            let outcome = controller.add_loop(guild_id, request.clone()).await;
            messages::add_loop(&outcome, request.as_ref())
        }
        ChatCommand::Deloop(request) => {
            let remaining = controller.remove_from_loop(guild_id, &request).await;
            messages::deloop(&request, remaining)
        }
        ChatCommand::Skip(request) => {
            let outcome = controller.skip(guild_id, request.clone()).await;
            messages::skip(&outcome, request.as_ref())
        }
        ChatCommand::Stop => messages::stop(&controller.stop(guild_id).await),
        ChatCommand::Pause => messages::pause(&controller.pause(guild_id).await),
        ChatCommand::Resume => messages::pause(&controller.resume(guild_id).await),
        ChatCommand::NowPlaying => {
            let current = controller.now_playing(guild_id).await;
            return Reply::Embed(embeds::now_playing_embed(current.as_ref()));
        }
        ChatCommand::Queue => {
            let current = controller.now_playing(guild_id).await;
            let queue = controller.queue(guild_id).await;
            let title = current.as_ref().map(|current| current.title.as_str());
            return Reply::Embed(embeds::queue_embed(title, &queue));
        }
        ChatCommand::LoopList => {
            let listing = controller.loop_list(guild_id).await;
            return Reply::Embed(embeds::loop_list_embed(&listing));
        }
        ChatCommand::Cleanup => {
            if !is_admin(command) {
                return Reply::Text("❌ Only administrators can do that.".to_string());
            }
            let left = controller.leave_all().await;
            let swept = match bot
                .downloads
                .sweep(bot.config.sweep_min_bytes, Duration::ZERO)
                .await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Cleanup sweep failed: {}", e);
                    None
                }
            };
            messages::cleanup(left, swept)
        }
        ChatCommand::Help => return Reply::Embed(embeds::help_embed()),
    };

    Reply::Text(text)
}

/// Joins the caller's voice channel unless already connected somewhere.
async fn join_if_needed(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<(), String> {
    if bot.controller.is_connected(guild_id).await {
        return Ok(());
    }

    let channel_id = user_voice_channel(ctx, guild_id, command.user.id)?;
    ensure_can_connect(ctx, guild_id, channel_id)
        .map_err(|e| messages::music_error(&MusicError::from(e)))?;

    let outcome = bot
        .controller
        .join(guild_id, channel_id)
        .await
        .map_err(|e| messages::connect_error(&e))?;
    if outcome == JoinOutcome::Connected {
        info!("🔊 Joined {} to play in guild {}", channel_id, guild_id);
    }
    Ok(())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId, String> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| "❌ This server is not cached yet, try again shortly.".to_string())?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| "❌ You need to be in a voice channel.".to_string())
}

/// Checks the CONNECT permission of the bot in `channel_id`. Unknown
/// channels or members are left for the transport to reject.
fn ensure_can_connect(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Result<(), ConnectError> {
    let bot_id = ctx.cache.current_user().id;
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        return Ok(());
    };
    let (Some(channel), Some(member)) = (guild.channels.get(&channel_id), guild.members.get(&bot_id)) else {
        return Ok(());
    };

    if guild.user_permissions_in(channel, member).connect() {
        Ok(())
    } else {
        Err(ConnectError::Forbidden)
    }
}

fn is_admin(command: &CommandInteraction) -> bool {
    command
        .member
        .as_ref()
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| permissions.administrator())
}
