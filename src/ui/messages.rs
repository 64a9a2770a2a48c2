use serenity::model::id::ChannelId;

use crate::{
    audio::{
        connection::{JoinOutcome, LeaveOutcome},
        error::{ConnectError, MusicError, PlaybackError, ResolutionError},
        player::{
            AdvanceOutcome, LoopOutcome, PauseOutcome, PlayOutcome, SkipOutcome, StopOutcome,
        },
        session::RequestOrigin,
    },
    downloads::SweepReport,
    sources::TrackRequest,
};

pub fn connect_error(error: &ConnectError) -> String {
    match error {
        ConnectError::TooSoon => "⏳ Slow down, I just tried to connect. Try again in a few seconds.".to_string(),
        ConnectError::Timeout => "❌ Timed out connecting to the voice channel.".to_string(),
        ConnectError::Forbidden => "❌ I don't have permission to join that voice channel.".to_string(),
        ConnectError::NotConnected => "❌ I'm not connected to a voice channel.".to_string(),
        ConnectError::TransportClosed(reason) => format!("❌ Voice connection failed: {}", reason),
    }
}

pub fn music_error(error: &MusicError) -> String {
    match error {
        MusicError::Resolution(ResolutionError::NotFound(request)) => {
            format!("❌ Couldn't find anything playable for `{}`.", request)
        }
        MusicError::Resolution(ResolutionError::NetworkFailure(_)) => {
            "❌ Download failed, the source could not be reached. Try again later.".to_string()
        }
        MusicError::Resolution(ResolutionError::EmptyMedia) => {
            "❌ The download came back empty.".to_string()
        }
        MusicError::Connect(e) => connect_error(e),
        MusicError::Playback(e) => format!("❌ Playback failed: {}", e),
    }
}

pub fn join(outcome: &Result<JoinOutcome, ConnectError>, channel_id: ChannelId) -> String {
    match outcome {
        Ok(JoinOutcome::Connected) => format!("🔊 Joined <#{}>", channel_id),
        Ok(JoinOutcome::AlreadyConnected) => format!("✅ Already in <#{}>", channel_id),
        Ok(JoinOutcome::Moved { from }) => format!("🔀 Moved from <#{}> to <#{}>", from, channel_id),
        Err(e) => connect_error(e),
    }
}

pub fn leave(outcome: &Result<LeaveOutcome, ConnectError>) -> String {
    match outcome {
        Ok(LeaveOutcome::Left) => "👋 Left the voice channel.".to_string(),
        Ok(LeaveOutcome::NotConnected) => connect_error(&ConnectError::NotConnected),
        Err(e) => connect_error(e),
    }
}

pub fn reconnect(outcome: &Result<ChannelId, ConnectError>) -> String {
    match outcome {
        Ok(channel_id) => format!("🔄 Reconnected to <#{}>", channel_id),
        Err(e) => connect_error(e),
    }
}

pub fn play(outcome: &Result<PlayOutcome, MusicError>) -> String {
    match outcome {
        Ok(PlayOutcome::Started { title }) => now_playing(title),
        Ok(PlayOutcome::Queued { position }) => format!("➕ Added to the queue at position {}", position),
        Ok(PlayOutcome::Advanced(advance)) => advance_reply(advance),
        Ok(PlayOutcome::AlreadyPlaying) => "🎵 Already playing.".to_string(),
        Ok(PlayOutcome::QueueEmpty) => "📭 Nothing is queued or looping. Use `/play <query>` to add something.".to_string(),
        Err(e) => music_error(e),
    }
}

pub fn add_loop(outcome: &LoopOutcome, request: Option<&TrackRequest>) -> String {
    let mut lines = Vec::new();

    if let (Some(length), Some(request)) = (outcome.added, request) {
        lines.push(format!("🔁 Added `{}` to the loop list ({} total)", request, length));
    }
    match &outcome.advanced {
        Some(advance) => lines.push(advance_reply(advance)),
        None if outcome.added.is_none() => lines.push("▶️ Playback resumed.".to_string()),
        None => {}
    }

    lines.join("\n")
}

pub fn deloop(request: &TrackRequest, remaining: Option<usize>) -> String {
    match remaining {
        Some(remaining) => format!("🗑️ Removed `{}` from the loop list ({} left)", request, remaining),
        None => format!("❌ `{}` is not in the loop list.", request),
    }
}

pub fn skip(outcome: &SkipOutcome, request: Option<&TrackRequest>) -> String {
    match outcome {
        SkipOutcome::Skipped(advance) => format!("⏭️ Skipped.\n{}", advance_reply(advance)),
        SkipOutcome::Removed {
            from_queue,
            from_loop,
        } => {
            let places = match (from_queue, from_loop) {
                (true, true) => "the queue and the loop list",
                (true, false) => "the queue",
                _ => "the loop list",
            };
            format!("🗑️ Removed `{}` from {}", display_request(request), places)
        }
        SkipOutcome::NotListed => format!(
            "❌ `{}` is not in the queue or the loop list.",
            display_request(request)
        ),
        SkipOutcome::NothingPlaying => "❌ Nothing is playing.".to_string(),
    }
}

pub fn stop(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::Stopped { title } => {
            format!("⏹️ Stopped **{}**. Use `/play` to continue.", title)
        }
        StopOutcome::NothingPlaying => "❌ Nothing is playing.".to_string(),
    }
}

pub fn pause(outcome: &Result<PauseOutcome, PlaybackError>) -> String {
    match outcome {
        Ok(PauseOutcome::Paused { title }) => format!("⏸️ Paused **{}**. Use `/resume` to continue.", title),
        Ok(PauseOutcome::Resumed { title }) => format!("▶️ Resumed **{}**", title),
        Ok(PauseOutcome::AlreadyPaused) => "⏸️ Already paused.".to_string(),
        Ok(PauseOutcome::NotPaused) => "▶️ Not paused.".to_string(),
        Ok(PauseOutcome::NothingPlaying) => "❌ Nothing is playing.".to_string(),
        Err(e) => format!("❌ Playback failed: {}", e),
    }
}

pub fn cleanup(guilds_left: usize, swept: Option<SweepReport>) -> String {
    let mut reply = format!("🧹 Left {} voice channel(s).", guilds_left);
    if let Some(report) = swept {
        reply.push_str(&format!(
            "\nRemoved {} leftover download(s), freed {:.1} KiB.",
            report.removed,
            report.freed_bytes as f64 / 1024.0
        ));
    }
    reply
}

pub fn now_playing(title: &str) -> String {
    format!("▶️ Now playing: **{}**", title)
}

/// Reply for an advancement the user asked for.
fn advance_reply(outcome: &AdvanceOutcome) -> String {
    match outcome {
        AdvanceOutcome::Started { title, .. } => now_playing(title),
        AdvanceOutcome::Idle { .. } => "📭 Nothing left to play.".to_string(),
        AdvanceOutcome::Suppressed => "⏹️ Playback is stopped.".to_string(),
        AdvanceOutcome::Disconnected => connect_error(&ConnectError::NotConnected),
        AdvanceOutcome::Exhausted { failures } => exhausted(*failures),
    }
}

/// Chat message for an advancement that happened on its own, if any.
///
/// Loop list tracks replay quietly; queue tracks get announced.
pub fn advance_announcement(outcome: &AdvanceOutcome) -> Option<String> {
    match outcome {
        AdvanceOutcome::Started {
            title,
            origin: RequestOrigin::Queue,
            ..
        } => Some(now_playing(title)),
        AdvanceOutcome::Exhausted { failures } => Some(exhausted(*failures)),
        _ => None,
    }
}

fn exhausted(failures: usize) -> String {
    format!(
        "⚠️ Stopped advancing after {} tracks in a row failed to play.",
        failures
    )
}

fn display_request(request: Option<&TrackRequest>) -> &str {
    request.map_or("", TrackRequest::as_str)
}
