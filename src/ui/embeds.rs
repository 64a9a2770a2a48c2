use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{
        player::{CurrentTrack, LoopListing},
        session::RequestOrigin,
    },
    sources::TrackRequest,
};

/// Colours shared by every embed.
pub mod colors {
    use serenity::all::Colour;

    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Open Jukebox";

/// Entries listed before the rest is summarized.
const MAX_LISTED: usize = 15;

pub fn queue_embed(now_playing: Option<&str>, queue: &[TrackRequest]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if let Some(title) = now_playing {
        embed = embed.field("▶️ Now playing", format!("**{}**", title), false);
    }

    if queue.is_empty() {
        return embed
            .description("😴 **The queue is empty**\n\n💡 Use `/play <query>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    embed
        .description(numbered(queue, None))
        .footer(CreateEmbedFooter::new(format!(
            "{} queued • {}",
            queue.len(),
            STANDARD_FOOTER
        )))
        .timestamp(Timestamp::now())
}

pub fn now_playing_embed(current: Option<&CurrentTrack>) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("🎵 Now playing")
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now());

    match current {
        Some(current) => embed
            .description(now_playing_line(current))
            .color(colors::MUSIC_PURPLE),
        None => embed
            .description("😴 **Nothing is playing**\n\n💡 Use `/play <query>` to start")
            .color(colors::NEUTRAL_GRAY),
    }
}

fn now_playing_line(current: &CurrentTrack) -> String {
    let source = match current.origin {
        RequestOrigin::Queue => "from the queue".to_string(),
        RequestOrigin::Loop(position) => format!("loop list entry {}", position + 1),
    };
    let state = if current.paused { "⏸️ Paused" } else { "▶️ Playing" };
    format!("**{}**\n{} • {}", current.title, state, source)
}

pub fn loop_list_embed(listing: &LoopListing) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("🔁 Loop list")
        .color(colors::MUSIC_PURPLE);

    if listing.entries.is_empty() {
        return embed
            .description("😴 **The loop list is empty**\n\n💡 Use `/loop <query>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    embed
        .description(numbered(&listing.entries, Some(listing.cursor)))
        .footer(CreateEmbedFooter::new(format!(
            "{} looping • {}",
            listing.entries.len(),
            STANDARD_FOOTER
        )))
        .timestamp(Timestamp::now())
}

pub fn help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Open Jukebox")
        .color(colors::INFO_BLUE)
        .description("Queue music from a URL or a search, or keep a list looping.")
        .field(
            "🔊 Connection",
            "• `/join` - Join your voice channel\n\
            • `/leave` - Leave and clear everything\n\
            • `/reconnect` - Drop and rejoin the current channel",
            false,
        )
        .field(
            "🎵 Queue",
            "• `/play [query]` - Play now or queue; without a query, continue\n\
            • `/skip [query]` - Skip the current track, or remove `query`\n\
            • `/stop` - Stop playback until the next `/play`\n\
            • `/pause` / `/resume` - Hold and continue the current track\n\
            • `/nowplaying` - Show the current track\n\
            • `/queue` - Show the queue",
            false,
        )
        .field(
            "🔁 Loop list",
            "• `/loop [query]` - Add to the loop list; without a query, continue\n\
            • `/deloop <query>` - Remove from the loop list\n\
            • `/looplist` - Show the loop list",
            false,
        )
        .field(
            "🛠️ Admin",
            "• `/cleanup` - Leave every channel and sweep leftover downloads",
            false,
        )
        .footer(CreateEmbedFooter::new(
            "Queued tracks always play before the loop list",
        ))
        .timestamp(Timestamp::now())
}

/// Numbered lines, marking the entry at `next` as the one that plays next.
fn numbered(entries: &[TrackRequest], next: Option<usize>) -> String {
    let mut description = String::new();

    for (i, entry) in entries.iter().take(MAX_LISTED).enumerate() {
        let marker = if Some(i) == next { " ⬅️ next" } else { "" };
        description.push_str(&format!("**{}**. {}{}\n", i + 1, entry, marker));
    }

    if entries.len() > MAX_LISTED {
        description.push_str(&format!("…and {} more", entries.len() - MAX_LISTED));
    }

    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_numbered_marks_cursor() {
        let entries: Vec<TrackRequest> = vec!["x".into(), "y".into()];
        assert_eq!(numbered(&entries, Some(1)), "**1**. x\n**2**. y ⬅️ next\n");
    }

    #[test]
    fn test_now_playing_line() {
        let current = CurrentTrack {
            title: "Song".into(),
            origin: RequestOrigin::Loop(1),
            paused: true,
        };
        assert_eq!(now_playing_line(&current), "**Song**\n⏸️ Paused • loop list entry 2");

        let current = CurrentTrack {
            origin: RequestOrigin::Queue,
            paused: false,
            ..current
        };
        assert_eq!(now_playing_line(&current), "**Song**\n▶️ Playing • from the queue");
    }

    #[test]
    fn test_numbered_truncates_long_lists() {
        let entries: Vec<TrackRequest> = (0..20).map(|i| TrackRequest::new(i.to_string())).collect();
        let text = numbered(&entries, None);
        assert_eq!(text.lines().count(), MAX_LISTED + 1);
        assert!(text.ends_with("…and 5 more"));
    }
}
