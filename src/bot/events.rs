use serenity::http::Http;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    audio::{
        player::{PlaybackController, TrackEndReport},
        transport::TrackEnded,
    },
    ui::messages,
};

/// Feeds track end signals to the controller until shutdown, announcing
/// automatic advancements in the guild's command channel.
///
/// Each signal gets its own task so a slow resolution in one guild does not
/// hold up the others.
pub async fn run_track_events(
    http: Arc<Http>,
    controller: Arc<PlaybackController>,
    mut events: mpsc::UnboundedReceiver<TrackEnded>,
    shutdown: CancellationToken,
) {
    info!("🎧 Track event loop started");

    loop {
        let ended = tokio::select! {
            _ = shutdown.cancelled() => break,
            ended = events.recv() => match ended {
                Some(ended) => ended,
                None => break,
            },
        };

        let http = http.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Some(report) = controller.handle_track_end(ended).await {
                announce(&http, report).await;
            }
        });
    }

    debug!("Track event loop stopped");
}

/// Leaves voice channels that stayed silent for `idle_timeout`, checking
/// every `check_every` until shutdown.
pub async fn run_idle_monitor(
    controller: Arc<PlaybackController>,
    idle_timeout: Duration,
    check_every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(check_every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let left = controller.leave_idle(idle_timeout).await;
                if left > 0 {
                    info!("💤 Left {} idle voice channel(s)", left);
                }
            }
        }
    }

    debug!("Idle monitor stopped");
}

async fn announce(http: &Http, report: TrackEndReport) {
    let Some(text) = messages::advance_announcement(&report.outcome) else {
        return;
    };
    let Some(channel_id) = report.channel_id else {
        debug!("No announce channel in guild {}: {}", report.guild_id, text);
        return;
    };

    if let Err(e) = channel_id.say(http, text).await {
        error!("Could not announce in guild {}: {:?}", report.guild_id, e);
    }
}
