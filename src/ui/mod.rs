pub mod embeds;
pub mod messages;
