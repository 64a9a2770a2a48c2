use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod downloads;
mod sources;
mod ui;

use crate::audio::{
    player::{PlaybackController, PlaybackSettings},
    transport::SongbirdTransport,
};
use crate::bot::MusicBot;
use crate::config::Config;
use crate::downloads::DownloadDir;
use crate::sources::YtDlpResolver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Open Jukebox v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());
    let config = Arc::new(config);

    let downloads = Arc::new(DownloadDir::new(config.download_dir.as_deref())?);
    let shutdown = CancellationToken::new();

    let songbird = Songbird::serenity();
    let resolver = YtDlpResolver::new(
        config.ytdlp_path.clone(),
        downloads.path(),
        config.resolve_timeout,
        config.max_concurrent_downloads,
    );
    let (controller, track_events) = PlaybackController::new(
        Arc::new(resolver),
        Arc::new(SongbirdTransport::new(songbird.clone())),
        PlaybackSettings::from(&*config),
    );
    let controller = Arc::new(controller);

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = MusicBot::new(
        config.clone(),
        controller.clone(),
        track_events,
        downloads.clone(),
        shutdown.clone(),
    );

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shutdown.cancel();
        let left = controller.leave_all().await;
        info!("👋 Left {} voice channels", left);
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("{} is not working", config.ytdlp_path);
    }
}
