//! A Discord bot that spawns dogs in registered channels for members to
//! catch, collect, trade blows over and brag about.
//!
//! Transport lives in [`gateway`] (WebSocket) and [`http`] (REST); the game
//! logic only sees the [`chat::ChatClient`] capability, and [`bot::start`]
//! wires the two together.

pub mod achievements;
pub mod battle;
pub mod board;
pub mod bot;
pub mod catalog;
pub mod catch;
pub mod chat;
pub mod commands;
pub mod config;
pub mod events;
pub mod facts;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod permissions;
pub mod phrases;
pub mod scheduler;
pub mod spawn;
pub mod store;
pub mod types;

use bot::BoxError;
use config::BotConfig;

/// Load `.env`, read configuration and run the bot until the gateway gives
/// up.
pub async fn run() -> Result<(), BoxError> {
    dotenv::dotenv().ok();
    let config = BotConfig::from_env()?;
    bot::start(config).await
}
