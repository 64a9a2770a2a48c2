use thiserror::Error;

/// Why a track request could not be turned into playable media.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no playable media found for `{0}`")]
    NotFound(String),

    #[error("network failure while fetching media: {0}")]
    NetworkFailure(String),

    #[error("downloaded media was empty or missing")]
    EmptyMedia,
}

/// Failures of the voice connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// A connection attempt for the guild happened too recently.
    #[error("a connection attempt was made moments ago")]
    TooSoon,

    #[error("timed out while connecting to the voice channel")]
    Timeout,

    #[error("voice connection closed: {0}")]
    TransportClosed(String),

    #[error("missing permission to connect to that voice channel")]
    Forbidden,

    #[error("not connected to a voice channel")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("voice transport failed: {0}")]
    TransportFailure(String),
}

/// Error surfaced by user-facing controller operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MusicError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

pub type MusicResult<T> = Result<T, MusicError>;
