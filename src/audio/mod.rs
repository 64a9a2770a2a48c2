//! # Audio Module
//!
//! Per-guild playback sequencing and voice connection handling.
//!
//! ## Architecture
//!
//! ### [`player`] - Playback Controller
//! - Owns one [`session::GuildSession`] per guild behind a lock
//! - Plays a FIFO queue first, then cycles the loop list
//! - Advances exactly once per track end, skipping unplayable entries up to a limit
//!
//! ### [`connection`] - Connection Lifecycle
//! - Join, leave and reconnect with a connect debounce
//! - Settle delay when moving between channels
//! - Auto-leave once only bots remain
//!
//! ### [`transport`] - Voice Transport
//! - Songbird implementation of [`transport::VoiceTransport`]
//! - Track end and error events turned into [`transport::TrackEnded`] signals
//!
//! ## Concurrency
//!
//! Guilds never share state beyond the session map. Operations on a single
//! guild run one at a time, including media resolution, so a track end that
//! races a skip or a stop is applied at most once.

pub mod connection;
pub mod error;
pub mod player;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
