use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::TempDir;
use tokio::{sync::Semaphore, time::timeout};
use tracing::{debug, info, warn};
use url::Url;

use super::{MediaArtifact, ResolvedTrack, TrackRequest, TrackResolver};
use crate::audio::error::ResolutionError;

/// Output template, relative to the workspace of one resolution.
const OUTPUT_TEMPLATE: &str = "%(extractor)s-%(id)s-%(title)s.%(ext)s";

/// Prefix of the per-resolution directories under the download directory.
const WORKSPACE_PREFIX: &str = "track-";

/// Stderr fragments that point at the network rather than the media.
const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection",
    "network is unreachable",
    "temporary failure in name resolution",
    "getaddrinfo",
    "unable to download webpage",
    "http error 5",
    "ssl",
];

/// Resolver that downloads media with the `yt-dlp` binary.
pub struct YtDlpResolver {
    binary: String,
    download_dir: PathBuf,
    timeout: Duration,
    // Limit concurrent downloads to avoid rate limiting
    rate_limiter: Semaphore,
}

impl YtDlpResolver {
    pub fn new(
        binary: impl Into<String>,
        download_dir: impl Into<PathBuf>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            binary: binary.into(),
            download_dir: download_dir.into(),
            timeout,
            rate_limiter: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// A fresh directory for one download, so concurrent resolutions of the
    /// same media never share a file.
    fn workspace(&self) -> Result<TempDir, ResolutionError> {
        tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.download_dir)
            .map_err(|e| {
                ResolutionError::NetworkFailure(format!(
                    "could not create a download directory in {}: {}",
                    self.download_dir.display(),
                    e
                ))
            })
    }

    async fn download(
        &self,
        workspace: &Path,
        target: &str,
    ) -> Result<std::process::Output, ResolutionError> {
        let template = workspace.join(OUTPUT_TEMPLATE);

        let mut command = Command::new(&self.binary);
        command
            .args([
                "--no-playlist",
                "--playlist-items",
                "1",
                "--format",
                "bestaudio/best",
                "--restrict-filenames",
                "--no-check-certificates",
                "--force-ipv4",
                "--no-warnings",
                "--no-simulate",
                "--print-json",
                "--output",
            ])
            .arg(&template)
            .arg(target)
            .kill_on_drop(true);

        match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ResolutionError::NetworkFailure(format!(
                "could not run {}: {}",
                self.binary, e
            ))),
            Err(_) => Err(ResolutionError::NetworkFailure(format!(
                "download did not finish within {}",
                humantime::format_duration(self.timeout)
            ))),
        }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolutionError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| ResolutionError::NetworkFailure("resolver is shutting down".into()))?;

        let target = extraction_target(request);
        info!("🔍 Resolving: {}", target);

        // Dropping the workspace on any error below removes partial files
        let workspace = self.workspace()?;
        let output = self.download(workspace.path(), &target).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = classify_failure(request, &stderr);
            warn!(request = %request, error = %error, "yt-dlp failed");
            return Err(error);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info = parse_first_entry(&stdout)
            .ok_or_else(|| ResolutionError::NotFound(request.to_string()))?;
        let path = info.downloaded_path().ok_or(ResolutionError::EmptyMedia)?;
        check_artifact(&path).await?;

        let title = info.title.unwrap_or_else(|| request.to_string());
        debug!("📥 Downloaded {} to {}", title, path.display());

        Ok(ResolvedTrack {
            title,
            artifact: MediaArtifact::in_workspace(workspace, path),
        })
    }
}

/// What yt-dlp is asked to fetch: URLs as-is, anything else as a search.
pub fn extraction_target(request: &TrackRequest) -> String {
    match Url::parse(request.as_str()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => request.as_str().to_string(),
        _ => format!("ytsearch1:{}", request),
    }
}

/// Info JSON printed by `--print-json`.
#[derive(Debug, Deserialize)]
struct ExtractedInfo {
    title: Option<String>,
    #[serde(rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    entries: Vec<ExtractedInfo>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    filepath: Option<String>,
    #[serde(rename = "_filename")]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    filepath: Option<String>,
}

impl ExtractedInfo {
    /// Final path of the downloaded file, after any post-processing.
    fn downloaded_path(&self) -> Option<PathBuf> {
        self.requested_downloads
            .iter()
            .find_map(|d| d.filepath.clone())
            .or_else(|| self.filepath.clone())
            .or_else(|| self.filename.clone())
            .map(PathBuf::from)
    }
}

/// First usable entry of the output. Playlists shrink to their first item.
fn parse_first_entry(stdout: &str) -> Option<ExtractedInfo> {
    let info = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .find_map(|line| serde_json::from_str::<ExtractedInfo>(line).ok())?;

    if info.kind.as_deref() == Some("playlist") {
        return info.entries.into_iter().next();
    }
    Some(info)
}

fn classify_failure(request: &TrackRequest, stderr: &str) -> ResolutionError {
    let lower = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("yt-dlp exited with an error")
        .trim()
        .to_string();

    if NETWORK_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ResolutionError::NetworkFailure(detail)
    } else {
        ResolutionError::NotFound(request.to_string())
    }
}

async fn check_artifact(path: &Path) -> Result<(), ResolutionError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Could not remove empty download {}: {}", path.display(), e);
            }
            Err(ResolutionError::EmptyMedia)
        }
        Err(_) => Err(ResolutionError::EmptyMedia),
    }
}
