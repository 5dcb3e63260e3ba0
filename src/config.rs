//! Process configuration.
//!
//! Everything is read from the environment (a `.env` file is honoured by the
//! binary). Only the bot token is required; every other knob has a default.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::types::Snowflake;

pub const DEFAULT_FACTS_URL: &str = "https://dogapi.dog/api/v2/facts?limit=1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Bounds for the random delay between scheduler passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnInterval {
    pub min: Duration,
    pub max: Duration,
}

impl SpawnInterval {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::Invalid {
                key: "SPAWN_MIN_SECS",
                value: min.as_secs().to_string(),
                reason: format!("greater than SPAWN_MAX_SECS ({})", max.as_secs()),
            });
        }
        if max.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SPAWN_MAX_SECS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self { min, max })
    }

    /// A delay drawn uniformly from `[min, max]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for SpawnInterval {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(60),
            max: Duration::from_secs(300),
        }
    }
}

/// Reaction-threshold repost settings. Absent when no board channel is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub channel_id: Snowflake,
    /// Only reactions in this guild count; any guild when `None`.
    pub guild_id: Option<Snowflake>,
    /// Emoji markup, e.g. `<:staring_dog:1285440635117113344>` or `⭐`.
    pub emoji: String,
    pub threshold: u32,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub catalog_path: PathBuf,
    pub achievements_path: PathBuf,
    pub database_path: PathBuf,
    pub spawn_interval: SpawnInterval,
    pub facts_url: String,
    /// Icon attached to "Achievement Unlocked!" embeds.
    pub achievement_icon: PathBuf,
    /// Directory holding the easter-egg images.
    pub media_dir: PathBuf,
    pub board: Option<BoardConfig>,
}

impl BotConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let path = |key: &str, default: &str| {
            PathBuf::from(get(key).unwrap_or_else(|| default.to_string()))
        };

        let min = parse_secs(&get, "SPAWN_MIN_SECS", 60)?;
        let max = parse_secs(&get, "SPAWN_MAX_SECS", 300)?;
        let spawn_interval = SpawnInterval::new(min, max)?;

        let board = match get("DOGBOARD_CHANNEL_ID") {
            Some(channel_id) => Some(BoardConfig {
                channel_id,
                guild_id: get("DOGBOARD_GUILD_ID"),
                emoji: get("DOGBOARD_EMOJI").unwrap_or_else(|| "⭐".to_string()),
                threshold: parse_u32(&get, "DOGBOARD_THRESHOLD", 5)?,
            }),
            None => None,
        };

        Ok(Self {
            token,
            catalog_path: path("CATALOG_PATH", "config/dogs.json"),
            achievements_path: path("ACHIEVEMENTS_PATH", "config/achievements.json"),
            database_path: path("DATABASE_PATH", "databases/database.db"),
            spawn_interval,
            facts_url: get("FACTS_URL").unwrap_or_else(|| DEFAULT_FACTS_URL.to_string()),
            achievement_icon: path("ACHIEVEMENT_ICON", "media/achievements.png"),
            media_dir: path("MEDIA_DIR", "media"),
            board,
        })
    }
}

fn parse_secs<G>(get: &G, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw,
                reason: e.to_string(),
            }),
    }
}

fn parse_u32<G>(get: &G, key: &'static str, default: u32) -> Result<u32, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
