//! Core bot infrastructure: the shared context, gateway bridge, and async
//! event loop.
//!
//! This module owns the "engine" of the bot: loading the static catalogs and
//! the store, connecting to Discord's gateway, and dispatching each event to a
//! handler in [`crate::handlers`]. Everything the handlers share lives in one
//! [`BotContext`], which is generic over the chat client so tests can run the
//! same handlers against [`crate::chat::MemoryChat`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_lock::Mutex;
use tracing::{error, info, warn};

use crate::achievements::AchievementCatalog;
use crate::battle::MessageWaiters;
use crate::catalog::Catalog;
use crate::chat::ChatClient;
use crate::config::BotConfig;
use crate::events::GatewayEvent;
use crate::facts::FactClient;
use crate::gateway::{self, GatewayConfig};
use crate::handlers;
use crate::http::DiscordHttpClient;
use crate::spawn::SpawnTable;
use crate::store::Store;
use crate::types::Snowflake;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Core bot identity and lifecycle state.
#[derive(Debug)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<String>,
    /// The application ID (set on READY).
    pub application_id: Option<String>,
    /// Whether slash commands have been registered this session.
    pub commands_registered: bool,
    /// The spawn scheduler runs once per process, not once per READY.
    pub scheduler_started: bool,
    /// Guilds the bot is in: seeded on READY, grown by GUILD_CREATE.
    pub guilds: HashSet<Snowflake>,
    /// Timestamp of when the bot started.
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            bot_user_id: None,
            application_id: None,
            commands_registered: false,
            scheduler_started: false,
            guilds: HashSet::new(),
            start_time: Instant::now(),
        }
    }
}

/// Everything a handler can touch.
pub struct BotContext<C> {
    pub chat: C,
    pub store: Store,
    pub spawns: SpawnTable,
    pub catalog: Catalog,
    pub achievements: AchievementCatalog,
    pub waiters: MessageWaiters,
    pub facts: FactClient,
    pub config: BotConfig,
    pub state: Mutex<BotState>,
}

impl<C: ChatClient> BotContext<C> {
    pub fn new(
        chat: C,
        store: Store,
        catalog: Catalog,
        achievements: AchievementCatalog,
        facts: FactClient,
        config: BotConfig,
    ) -> Self {
        Self {
            chat,
            store,
            spawns: SpawnTable::new(),
            catalog,
            achievements,
            waiters: MessageWaiters::new(),
            facts,
            config,
            state: Mutex::new(BotState::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway intents
// ---------------------------------------------------------------------------

/// Build the gateway intents bitmask.
///
/// GUILDS(1) | GUILD_MESSAGES(512) | GUILD_MESSAGE_REACTIONS(1024) |
/// MESSAGE_CONTENT(32768)
fn gateway_intents() -> u32 {
    1 | 512 | 1024 | 32768
}

// ---------------------------------------------------------------------------
// Bot entry point
// ---------------------------------------------------------------------------

/// Load everything, connect, and run the event loop until the gateway gives
/// up.
///
/// Configuration, catalog, and database errors are returned before any
/// network traffic happens.
pub async fn start(config: BotConfig) -> Result<(), BoxError> {
    let catalog = Catalog::load(&config.catalog_path)?;
    let achievements = AchievementCatalog::load(&config.achievements_path)?;
    let store = Store::open(&config.database_path)?;
    let facts = FactClient::new(config.facts_url.clone())?;
    let http = DiscordHttpClient::new(&config.token)?;

    info!(
        dogs = catalog.len(),
        achievements = achievements.len(),
        database = %config.database_path.display(),
        "loaded catalogs and store"
    );

    let gateway_config = GatewayConfig {
        token: config.token.clone(),
        intents: gateway_intents(),
        shard: None,
    };
    let ctx = Arc::new(BotContext::new(
        http,
        store,
        catalog,
        achievements,
        facts,
        config,
    ));

    let mut gw = gateway::connect(gateway_config).await.map_err(|e| {
        error!(error = %e, "failed to start gateway");
        e
    })?;

    info!("gateway connected, entering event loop");

    // ----- Main event loop -----
    while let Some(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => {
                handlers::on_ready(&ctx, &gw.sender, ready).await;
            }

            GatewayEvent::GuildCreate(guild) => {
                handlers::on_guild_create(&ctx, &gw.sender, guild).await;
            }

            GatewayEvent::MessageCreate(msg) => {
                handlers::on_message(&ctx, msg).await;
            }

            GatewayEvent::MessageReactionAdd(reaction) => {
                handlers::on_reaction_add(&ctx, reaction).await;
            }

            GatewayEvent::InteractionCreate(interaction) => {
                if let Err(e) = handlers::on_interaction(&ctx, &interaction).await {
                    error!(error = %e, "failed to handle interaction");
                }
            }

            // Session plumbing is handled inside the gateway driver.
            GatewayEvent::HeartbeatAck
            | GatewayEvent::HeartbeatRequest
            | GatewayEvent::Reconnect
            | GatewayEvent::InvalidSession(_) => {}

            unknown @ GatewayEvent::Unknown { .. } => {
                tracing::trace!(event = unknown.name(), "unhandled gateway event");
            }
        }
    }

    warn!("event stream ended, bot shutting down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
