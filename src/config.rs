use anyhow::{Context, Result};
use std::{fmt::Display, path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Registers commands in one guild only

    // Extraction
    pub ytdlp_path: String,
    pub download_dir: Option<PathBuf>, // Temp dir when unset
    pub resolve_timeout: Duration,
    pub max_concurrent_downloads: usize,

    // Playback and voice
    pub connect_debounce: Duration,
    pub reconnect_settle: Duration,
    pub leave_grace: Duration,
    pub max_consecutive_failures: usize,
    pub idle_timeout: Option<Duration>, // Never leaves on idleness when unset

    // Download sweeper
    pub sweep_interval: Duration,
    pub sweep_min_bytes: u64,
    pub sweep_stale_after: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from an arbitrary variable source, falling
    /// back to defaults for everything but the token.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: lookup("GUILD_ID")
                .map(|raw| parse_value("GUILD_ID", &raw))
                .transpose()?,

            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            download_dir: lookup("DOWNLOAD_DIR").map(PathBuf::from),
            resolve_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RESOLVE_TIMEOUT_SECS",
                defaults.resolve_timeout.as_secs(),
            )?),
            max_concurrent_downloads: parse_or(
                &lookup,
                "MAX_CONCURRENT_DOWNLOADS",
                defaults.max_concurrent_downloads,
            )?,

            connect_debounce: millis_or(&lookup, "CONNECT_DEBOUNCE_MS", defaults.connect_debounce)?,
            reconnect_settle: millis_or(&lookup, "RECONNECT_SETTLE_MS", defaults.reconnect_settle)?,
            leave_grace: millis_or(&lookup, "LEAVE_GRACE_MS", defaults.leave_grace)?,
            max_consecutive_failures: parse_or(
                &lookup,
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            idle_timeout: {
                let default = defaults.idle_timeout.map_or(0, |timeout| timeout.as_secs());
                let secs = parse_or(&lookup, "IDLE_TIMEOUT_SECS", default)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            },

            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            sweep_min_bytes: parse_or(&lookup, "SWEEP_MIN_BYTES", defaults.sweep_min_bytes)?,
            sweep_stale_after: Duration::from_secs(parse_or(
                &lookup,
                "SWEEP_STALE_SECS",
                defaults.sweep_stale_after.as_secs(),
            )?),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The token must not be empty
    /// - Download concurrency and the failure limit must be at least 1
    /// - Resolution timeout and sweep interval must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.max_concurrent_downloads == 0 {
            anyhow::bail!("Max concurrent downloads must be greater than 0");
        }

        if self.max_consecutive_failures == 0 {
            anyhow::bail!("Max consecutive failures must be greater than 0");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.sweep_interval.is_zero() {
            anyhow::bail!("Sweep interval must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Extraction: {} into {}, {} timeout, {} at once\n  \
            Voice: {} debounce, {} settle, {} leave grace\n  \
            Playback: give up after {} failures, leave when idle for {}\n  \
            Sweeper: every {}, files under {} bytes older than {}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("in guild {}", id)),
            self.ytdlp_path,
            self.download_dir
                .as_ref()
                .map_or("a temp dir".to_string(), |dir| dir.display().to_string()),
            humantime::format_duration(self.resolve_timeout),
            self.max_concurrent_downloads,
            humantime::format_duration(self.connect_debounce),
            humantime::format_duration(self.reconnect_settle),
            humantime::format_duration(self.leave_grace),
            self.max_consecutive_failures,
            self.idle_timeout
                .map_or("never".to_string(), |timeout| humantime::format_duration(timeout).to_string()),
            humantime::format_duration(self.sweep_interval),
            self.sweep_min_bytes,
            humantime::format_duration(self.sweep_stale_after),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            ytdlp_path: "yt-dlp".to_string(),
            download_dir: None,
            resolve_timeout: Duration::from_secs(180),
            max_concurrent_downloads: 3,

            connect_debounce: Duration::from_millis(3000),
            reconnect_settle: Duration::from_millis(2000),
            leave_grace: Duration::from_millis(500),
            max_consecutive_failures: 5,
            idle_timeout: Some(Duration::from_secs(300)),

            sweep_interval: Duration::from_secs(300),
            sweep_min_bytes: 1024,
            sweep_stale_after: Duration::from_secs(600),
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", key, raw, e))
}

fn parse_or<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn millis_or(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let millis = parse_or(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
