//! In-memory resolver and transport for controller tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::{
    error::{ConnectError, PlaybackError, ResolutionError},
    player::{PlaybackController, PlaybackSettings},
    transport::{ActivePlayback, TrackEndSignal, TrackEnded, VoiceTransport},
};
use crate::sources::{MediaArtifact, ResolvedTrack, TrackRequest, TrackResolver};

pub const GUILD: GuildId = GuildId::new(1);
pub const VOICE: ChannelId = ChannelId::new(10);

/// Writes a small file per request and titles it `title:<request>`.
pub struct FakeResolver {
    dir: TempDir,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, request: &str) {
        self.failing.lock().insert(request.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Media files still on disk.
    pub fn artifacts_left(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path())
            .expect("read temp dir")
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect()
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolutionError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(request.to_string());
            calls.len()
        };

        if self.failing.lock().contains(request.as_str()) {
            return Err(ResolutionError::NotFound(request.to_string()));
        }

        let path = self.dir.path().join(format!("{}.opus", call));
        std::fs::write(&path, b"audio").expect("write media");
        Ok(ResolvedTrack {
            title: format!("title:{}", request),
            artifact: MediaArtifact::new(path),
        })
    }
}

struct FakePlay {
    title: String,
    media: PathBuf,
    signal: TrackEndSignal,
    stopped: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

struct FakeHandle {
    stopped: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl ActivePlayback for FakeHandle {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), PlaybackError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Records connections and plays; tracks only end when a test says so.
pub struct FakeTransport {
    channels: Mutex<HashMap<GuildId, ChannelId>>,
    plays: Mutex<Vec<FakePlay>>,
    fail_next_play: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            plays: Mutex::new(Vec::new()),
            fail_next_play: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn connect_guild(&self, guild_id: GuildId) {
        self.channels.lock().insert(guild_id, VOICE);
    }

    /// Simulates the connection of [`GUILD`] going away underneath.
    pub fn drop_connection(&self) {
        self.channels.lock().remove(&GUILD);
    }

    pub fn fail_next_play(&self) {
        self.fail_next_play.store(true, Ordering::SeqCst);
    }

    /// Lets the most recent track end naturally.
    pub fn finish_last(&self) {
        let plays = self.plays.lock();
        plays.last().expect("nothing played").signal.fire();
    }

    pub fn signal(&self, index: usize) -> TrackEndSignal {
        self.plays.lock()[index].signal.clone()
    }

    pub fn media(&self, index: usize) -> PathBuf {
        self.plays.lock()[index].media.clone()
    }

    pub fn was_stopped(&self, index: usize) -> bool {
        self.plays.lock()[index].stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self, index: usize) -> bool {
        self.plays.lock()[index].paused.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> Vec<String> {
        self.plays.lock().iter().map(|play| play.title.clone()).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.channels.lock().get(&guild_id).copied()
    }

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().insert(guild_id, channel_id);
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), ConnectError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().remove(&guild_id);
        Ok(())
    }

    async fn play(
        &self,
        _guild_id: GuildId,
        media: &Path,
        title: &str,
        on_end: TrackEndSignal,
    ) -> Result<Box<dyn ActivePlayback>, PlaybackError> {
        if self.fail_next_play.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::TransportFailure("decoder refused input".into()));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        self.plays.lock().push(FakePlay {
            title: title.to_string(),
            media: media.to_path_buf(),
            signal: on_end,
            stopped: stopped.clone(),
            paused: paused.clone(),
        });
        Ok(Box::new(FakeHandle { stopped, paused }))
    }
}

pub struct Harness {
    pub controller: Arc<PlaybackController>,
    pub resolver: Arc<FakeResolver>,
    pub transport: Arc<FakeTransport>,
    pub events: mpsc::UnboundedReceiver<TrackEnded>,
}

/// Controller with default settings, already connected in [`GUILD`].
pub fn harness() -> Harness {
    harness_with(PlaybackSettings::default())
}

pub fn harness_with(settings: PlaybackSettings) -> Harness {
    let resolver = Arc::new(FakeResolver::new());
    let transport = Arc::new(FakeTransport::new());
    transport.connect_guild(GUILD);

    let (controller, events) =
        PlaybackController::new(resolver.clone(), transport.clone(), settings);
    Harness {
        controller: Arc::new(controller),
        resolver,
        transport,
        events,
    }
}
