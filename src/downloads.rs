use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extensions yt-dlp leaves behind for interrupted downloads.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl"];

/// Directory that materialized media is downloaded into.
///
/// Without a configured path a fresh temp directory is used, removed along
/// with everything in it when this value is dropped.
pub enum DownloadDir {
    Temporary(TempDir),
    Configured(PathBuf),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub freed_bytes: u64,
}

impl DownloadDir {
    pub fn new(configured: Option<&Path>) -> Result<Self> {
        let dir = match configured {
            Some(path) => {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Could not create {}", path.display()))?;
                Self::Configured(path.to_path_buf())
            }
            None => Self::Temporary(
                tempfile::Builder::new()
                    .prefix("open-jukebox-")
                    .tempdir()
                    .context("Could not create temp download dir")?,
            ),
        };

        info!("📁 Downloads go to {}", dir.path().display());
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Temporary(dir) => dir.path(),
            Self::Configured(path) => path,
        }
    }

    /// Deletes leftovers of failed downloads: partial files and files
    /// smaller than `min_bytes`, once untouched for `stale_after`. Stale
    /// per-track directories are swept too, and removed once empty.
    pub async fn sweep(&self, min_bytes: u64, stale_after: Duration) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let workspaces = sweep_files(self.path(), min_bytes, stale_after, &mut report).await?;

        for workspace in workspaces {
            if let Err(e) = sweep_files(&workspace, min_bytes, stale_after, &mut report).await {
                warn!("Could not sweep {}: {}", workspace.display(), e);
                continue;
            }
            // Only succeeds once nothing worth keeping is left inside
            if fs::remove_dir(&workspace).await.is_ok() {
                debug!("🧹 Removed {}", workspace.display());
            }
        }

        Ok(report)
    }
}

/// Sweeps the files directly in `dir`, returning its stale subdirectories.
async fn sweep_files(
    dir: &Path,
    min_bytes: u64,
    stale_after: Duration,
    report: &mut SweepReport,
) -> Result<Vec<PathBuf>> {
    let mut stale_dirs = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    let now = SystemTime::now();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };

        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < stale_after {
            continue;
        }

        if meta.is_dir() {
            stale_dirs.push(path);
            continue;
        }
        if !meta.is_file() || (meta.len() >= min_bytes && !is_partial(&path)) {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("🧹 Swept {} ({} bytes)", path.display(), meta.len());
                report.removed += 1;
                report.freed_bytes += meta.len();
            }
            Err(e) => warn!("Could not sweep {}: {}", path.display(), e),
        }
    }

    Ok(stale_dirs)
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PARTIAL_EXTENSIONS.contains(&ext))
}

/// Sweeps `dir` every `interval` until `shutdown` is cancelled.
pub async fn run_sweeper(
    dir: std::sync::Arc<DownloadDir>,
    interval: Duration,
    min_bytes: u64,
    stale_after: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Download sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                match dir.sweep(min_bytes, stale_after).await {
                    Ok(report) if report.removed > 0 => info!(
                        "🧹 Swept {} leftover downloads, freed {} bytes",
                        report.removed, report.freed_bytes
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("Download sweep failed: {}", e),
                }
            }
        }
    }
}
