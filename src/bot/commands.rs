use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId, permissions::Permissions},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        leave_command(),
        play_command(),
        loop_command(),
        deloop_command(),
        skip_command(),
        stop_command(),
        pause_command(),
        resume_command(),
        nowplaying_command(),
        queue_command(),
        looplist_command(),
        reconnect_command(),
        cleanup_command(),
        help_command(),
    ]
}

/// Registers the commands in every guild. Updates can take a while to show.
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers the commands in a single guild, replacing what was there.
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn query_option(description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "query", description)
}

// Connection

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel and clear the queue")
}

fn reconnect_command() -> CreateCommand {
    CreateCommand::new("reconnect").description("Drop and rejoin the current voice channel")
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a URL or search result, or continue the queue")
        .add_option(query_option("URL or search terms"))
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Add to the loop list, or continue playback")
        .add_option(query_option("URL or search terms"))
}

fn deloop_command() -> CreateCommand {
    CreateCommand::new("deloop")
        .description("Remove an entry from the loop list")
        .add_option(query_option("Entry exactly as it was added").required(true))
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Skip the current track, or remove an entry from the lists")
        .add_option(query_option("Entry to remove instead of skipping"))
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback until the next /play")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current track")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume a paused track")
}

// Info

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the current track")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the queue")
}

fn looplist_command() -> CreateCommand {
    CreateCommand::new("looplist").description("Show the loop list")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Show the available commands")
}

// Admin

fn cleanup_command() -> CreateCommand {
    CreateCommand::new("cleanup")
        .description("Leave every voice channel and sweep leftover downloads")
        .default_member_permissions(Permissions::ADMINISTRATOR)
}
