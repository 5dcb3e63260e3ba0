//! Achievements: a static catalog, pure rule evaluation, and the
//! grant-then-announce side effect.
//!
//! Deciding *which* achievements a catch earns is pure ([`evaluate_catch`]);
//! recording and announcing them is a separate step ([`grant`], [`award`]),
//! so the rules can be tested without a store or a chat client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bot::BotContext;
use crate::chat::{ChatClient, FileUpload};
use crate::store::{Store, StoreError};
use crate::types::{CreateMessage, Embed, User};

/// Embed colour of "Achievement Unlocked!" announcements.
pub const ACHIEVEMENT_COLOR: u32 = 0x265526;

/// Catches faster than this earn `fast_dog`.
pub const FAST_CATCH: Duration = Duration::from_secs(5);

/// Owning this many of one dog earns `ZOO_WEE_MAMA`.
pub const HOARDER_TOTAL: u64 = 1000;

#[derive(Debug, Error)]
pub enum AchievementError {
    #[error("failed to read achievements {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse achievements: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("achievement id {0:?} appears more than once")]
    DuplicateId(String),
    #[error("achievement id {0:?} is not in the catalog")]
    UnknownId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    /// Announcement title, defaults to `name`.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AchievementDefinition {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AchievementCatalog {
    defs: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    pub fn new(defs: Vec<AchievementDefinition>) -> Result<Self, AchievementError> {
        for (i, def) in defs.iter().enumerate() {
            if defs[..i].iter().any(|d| d.id == def.id) {
                return Err(AchievementError::DuplicateId(def.id.clone()));
            }
        }
        Ok(Self { defs })
    }

    pub fn from_json(json: &str) -> Result<Self, AchievementError> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AchievementError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| AchievementError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.defs.iter().find(|d| d.id == id)
    }

    /// Map stored ids to definitions. Any unknown id is an error.
    pub fn resolve<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<Vec<&AchievementDefinition>, AchievementError> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.get(id)
                    .ok_or_else(|| AchievementError::UnknownId(id.to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// What the rules may look at after a catch.
#[derive(Debug, Clone, Copy)]
pub struct CatchFacts<'a> {
    pub entity: &'a str,
    pub elapsed: Duration,
    /// The catcher's count of `entity` after the catch.
    pub new_total: u64,
}

/// Achievement ids a catch qualifies for, in announcement order.
pub fn evaluate_catch(facts: &CatchFacts<'_>) -> Vec<&'static str> {
    let mut earned = Vec::new();
    match facts.entity {
        "eboy" => earned.push("professional_gamer"),
        "sparkle dog" => earned.push("pretty_scene_girl"),
        _ => {}
    }
    if facts.elapsed < FAST_CATCH {
        earned.push("fast_dog");
    }
    if facts.new_total >= HOARDER_TOTAL {
        earned.push("ZOO_WEE_MAMA");
    }
    earned
}

// ---------------------------------------------------------------------------
// Granting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyClaimed,
}

/// Record a claim. Repeats are reported, not treated as errors.
pub fn grant(
    store: &Store,
    guild_id: &str,
    user_id: &str,
    achievement_id: &str,
) -> Result<GrantOutcome, StoreError> {
    match store.claim_achievement(guild_id, user_id, achievement_id) {
        Ok(()) => Ok(GrantOutcome::Granted),
        Err(StoreError::AlreadyClaimed) => Ok(GrantOutcome::AlreadyClaimed),
        Err(e) => Err(e),
    }
}

/// The "Achievement Unlocked!" embed. `icon` is the author icon URL.
pub fn announcement(def: &AchievementDefinition, unlocked_by: &str, icon: Option<String>) -> Embed {
    let mut embed = Embed::new()
        .color(ACHIEVEMENT_COLOR)
        .title(def.title())
        .author("Achievement Unlocked!", icon)
        .footer(format!("Unlocked by {}", unlocked_by));
    if let Some(desc) = &def.description {
        embed = embed.description(desc.clone());
    }
    embed
}

/// Grant `achievement_id` and announce it in `channel_id` the first time.
///
/// Errors are logged; the return value is `None` when nothing could be
/// recorded.
pub async fn award<C: ChatClient>(
    ctx: &BotContext<C>,
    guild_id: &str,
    channel_id: &str,
    user: &User,
    achievement_id: &str,
) -> Option<GrantOutcome> {
    let outcome = match grant(&ctx.store, guild_id, &user.id, achievement_id) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, achievement = achievement_id, user_id = %user.id, "failed to record achievement");
            return None;
        }
    };
    if outcome == GrantOutcome::AlreadyClaimed {
        return Some(outcome);
    }

    info!(achievement = achievement_id, user_id = %user.id, guild_id, "achievement unlocked");

    let fallback;
    let def = match ctx.achievements.get(achievement_id) {
        Some(def) => def,
        None => {
            warn!(achievement = achievement_id, "granted achievement missing from catalog");
            fallback = AchievementDefinition {
                id: achievement_id.to_string(),
                name: achievement_id.replace('_', " "),
                title: None,
                description: None,
            };
            &fallback
        }
    };

    let result = match FileUpload::read(&ctx.config.achievement_icon).await {
        Ok(icon) => {
            let embed = announcement(def, &user.username, Some(format!("attachment://{}", icon.filename)));
            let msg = CreateMessage::new().embed(embed);
            ctx.chat.send_message_with_file(channel_id, &msg, &icon).await
        }
        Err(e) => {
            warn!(error = %e, path = %ctx.config.achievement_icon.display(), "achievement icon unavailable");
            let msg = CreateMessage::new().embed(announcement(def, &user.username, None));
            ctx.chat.send_message(channel_id, &msg).await
        }
    };
    if let Err(e) = result {
        warn!(error = %e, channel_id, "failed to announce achievement");
    }

    Some(outcome)
}
