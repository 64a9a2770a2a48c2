//! # Sources Module
//!
//! Turns what a user typed into something the voice transport can play.
//!
//! A [`TrackRequest`] stays an opaque string while it waits in a queue or
//! loop list. Only right before playback does a [`TrackResolver`] fetch it,
//! producing a [`ResolvedTrack`] whose [`MediaArtifact`] owns the downloaded
//! file for as long as the track is playing.

pub mod ytdlp;

use async_trait::async_trait;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tempfile::{TempDir, TempPath};
use tracing::debug;

use crate::audio::error::ResolutionError;

pub use ytdlp::YtDlpResolver;

/// A URL or free-text search query, exactly as a user supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRequest(String);

impl TrackRequest {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackRequest {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Fetches playable media for a request.
///
/// Implementations never panic on bad input: every failure comes back as a
/// [`ResolutionError`].
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolutionError>;
}

/// Output of a successful resolution.
#[derive(Debug)]
pub struct ResolvedTrack {
    pub title: String,
    pub artifact: MediaArtifact,
}

/// A media file materialized on local disk for one playback.
///
/// The file is deleted when the artifact is dropped, so whoever holds it
/// last releases it, whether playback finished, failed or was cut short.
/// An artifact may also own the private directory it was downloaded into,
/// which goes with it.
#[derive(Debug)]
pub struct MediaArtifact {
    file: TempPath,
    workspace: Option<TempDir>,
}

impl MediaArtifact {
    #[cfg(test)]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: TempPath::from_path(path),
            workspace: None,
        }
    }

    /// An artifact for `path` inside `workspace`, removing both on drop.
    pub fn in_workspace(workspace: TempDir, path: impl Into<PathBuf>) -> Self {
        Self {
            file: TempPath::from_path(path),
            workspace: Some(workspace),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}

impl Drop for MediaArtifact {
    fn drop(&mut self) {
        match &self.workspace {
            Some(workspace) => debug!("🧹 Releasing {}", workspace.path().display()),
            None => debug!("🧹 Releasing {}", self.file.display()),
        }
    }
}
