// src/config.rs
use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::catalog::spotify::SpotifyConfig;
use crate::ingest::client::{FeedConfig, DEFAULT_FEED_ENDPOINT, DEFAULT_USER_AGENT};
use crate::scheduler::{SchedulerConfig, DEFAULT_JITTER_MAX};

pub const ENV_CONFIG_PATH: &str = "SYNC_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/sync.toml";
pub const DEFAULT_SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1/";

fn default_endpoint() -> String {
    DEFAULT_FEED_ENDPOINT.to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_api_base() -> String {
    DEFAULT_SPOTIFY_API_BASE.to_string()
}
fn default_market() -> String {
    "US".to_string()
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_min_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_endpoint")]
    pub api_endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            api_endpoint: default_endpoint(),
            http_timeout_secs: default_timeout_secs(),
            timezone: default_timezone(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpotifySection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Pre-issued bearer token. Obtaining it is left to the caller.
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_market")]
    pub market: String,
    /// Empty means "use the first existing playlist".
    #[serde(default)]
    pub playlist_name_prefix: String,
}

impl Default for SpotifySection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            access_token: String::new(),
            market: default_market(),
            playlist_name_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncSection {
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            continuous: false,
            interval_secs: default_interval_secs(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub spotify: SpotifySection,
    #[serde(default)]
    pub sync: SyncSection,
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing sync config TOML")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sync config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load order:
    /// 1) `.env` (if present)
    /// 2) $SYNC_CONFIG_PATH, else config/sync.toml, else defaults
    /// 3) environment variables override file values
    pub fn load_from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::load_from(&pb)?
            }
            Err(_) => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::load_from(&fallback)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env()?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        let mut errors = Vec::new();

        set_string(&mut self.feed.api_endpoint, "FEED_API_ENDPOINT");
        set_parsed(&mut self.feed.http_timeout_secs, "FEED_HTTP_TIMEOUT_SECS", &mut errors);
        set_string(&mut self.feed.timezone, "FEED_TIMEZONE");
        set_string(&mut self.feed.user_agent, "FEED_USER_AGENT");

        set_string(&mut self.spotify.api_base, "SPOTIFY_API_BASE");
        set_string(&mut self.spotify.access_token, "SPOTIFY_ACCESS_TOKEN");
        set_string(&mut self.spotify.market, "SPOTIFY_MARKET");
        // empty is meaningful here, so an empty var still overrides
        if let Ok(v) = std::env::var("SPOTIFY_PLAYLIST_NAME_PREFIX") {
            self.spotify.playlist_name_prefix = v.trim().to_string();
        }

        if let Ok(v) = std::env::var("SYNC_CONTINUOUS") {
            match parse_bool(&v) {
                Some(b) => self.sync.continuous = b,
                None => errors.push(format!("SYNC_CONTINUOUS: not a boolean: {v:?}")),
            }
        }
        set_parsed(&mut self.sync.interval_secs, "SYNC_INTERVAL_SECS", &mut errors);
        set_parsed(&mut self.sync.min_confidence, "SYNC_MIN_CONFIDENCE", &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid environment: {}", errors.join("; ")))
        }
    }

    fn normalize(&mut self) {
        self.sync.min_confidence = self.sync.min_confidence.clamp(0.0, 1.0);
        self.spotify.market = self.spotify.market.trim().to_uppercase();
    }

    /// Every problem is reported in one error.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.feed.api_endpoint.trim().is_empty() {
            errors.push("feed endpoint is empty".to_string());
        } else if let Err(e) = Url::parse(&self.feed.api_endpoint) {
            errors.push(format!("feed endpoint is not a URL: {e}"));
        }
        if self.feed.http_timeout_secs == 0 {
            errors.push("feed timeout must be > 0".to_string());
        }
        if let Err(e) = self.timezone() {
            errors.push(e.to_string());
        }
        if let Err(e) = Url::parse(&self.spotify.api_base) {
            errors.push(format!("catalog API base is not a URL: {e}"));
        }
        if self.sync.interval_secs == 0 {
            errors.push("sync interval must be > 0".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid configuration: {}", errors.join("; ")))
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.feed
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("unknown feed timezone {:?}: {e}", self.feed.timezone))
    }

    pub fn feed_config(&self) -> Result<FeedConfig> {
        let endpoint = Url::parse(&self.feed.api_endpoint).context("feed endpoint")?;
        let mut cfg = FeedConfig::new(endpoint);
        cfg.timeout = Duration::from_secs(self.feed.http_timeout_secs);
        cfg.timezone = self.timezone()?;
        cfg.user_agent = self.feed.user_agent.clone();
        Ok(cfg)
    }

    pub fn spotify_config(&self) -> Result<SpotifyConfig> {
        if self.spotify.access_token.trim().is_empty() {
            return Err(anyhow!("SPOTIFY_ACCESS_TOKEN is not set"));
        }
        Ok(SpotifyConfig {
            api_base: Url::parse(&self.spotify.api_base).context("catalog API base")?,
            access_token: self.spotify.access_token.trim().to_string(),
            market: self.spotify.market.clone(),
            timeout: Duration::from_secs(self.feed.http_timeout_secs),
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_confidence: self.sync.min_confidence,
            base_interval: Duration::from_secs(self.sync.interval_secs),
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }
}

fn set_string(slot: &mut String, key: &str) {
    if let Ok(v) = std::env::var(key) {
        let v = v.trim();
        if !v.is_empty() {
            *slot = v.to_string();
        }
    }
}

fn set_parsed<T>(slot: &mut T, key: &str, errors: &mut Vec<String>)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(v) = std::env::var(key) {
        let v = v.trim();
        if v.is_empty() {
            return;
        }
        match v.parse::<T>() {
            Ok(x) => *slot = x,
            Err(e) => errors.push(format!("{key}: {e}")),
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
