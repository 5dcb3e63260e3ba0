//! Event handlers for the bot.
//!
//! Each public function handles one category of gateway event. Handlers take
//! the shared [`BotContext`]; the gateway sender is passed where a handler
//! needs to push a payload (presence) back on the socket.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::board::{self, BoardOutcome};
use crate::bot::{BotContext, BoxError};
use crate::catch::CatchResolver;
use crate::chat::ChatClient;
use crate::commands;
use crate::gateway::presence_payload;
use crate::phrases::handle_phrase;
use crate::scheduler::SpawnScheduler;
use crate::types::*;

// ---------------------------------------------------------------------------
// READY handler
// ---------------------------------------------------------------------------

/// Store identity, show the guild count, start the spawn scheduler (once per
/// process) and register slash commands (once per process).
pub async fn on_ready<C: ChatClient + 'static>(
    ctx: &Arc<BotContext<C>>,
    gateway: &mpsc::Sender<Value>,
    ready: ReadyEvent,
) {
    let (guild_count, start_scheduler, register) = {
        let mut state = ctx.state.lock().await;
        state.bot_user_id = Some(ready.user.id.clone());
        state.application_id = Some(ready.application.id.clone());
        state.guilds.extend(ready.guilds.iter().map(|g| g.id.clone()));
        let start_scheduler = !state.scheduler_started;
        state.scheduler_started = true;
        info!(
            user = %ready.user.username,
            guilds = state.guilds.len(),
            uptime_secs = state.start_time.elapsed().as_secs(),
            "bot is ready!"
        );
        (state.guilds.len(), start_scheduler, !state.commands_registered)
    };

    send_presence(gateway, guild_count).await;

    if start_scheduler {
        tokio::spawn(SpawnScheduler::new(Arc::clone(ctx)).run());
    }

    if register {
        let cmds = commands::definitions();
        match ctx.chat.register_commands(&ready.application.id, &cmds).await {
            Ok(()) => {
                info!(count = cmds.len(), "registered global slash commands");
                ctx.state.lock().await.commands_registered = true;
            }
            Err(e) => warn!(error = %e, "failed to register global commands"),
        }
    }
}

// ---------------------------------------------------------------------------
// GUILD_CREATE handler
// ---------------------------------------------------------------------------

/// Track the guild; a guild we hadn't seen means we joined one, so the
/// presence count goes up.
pub async fn on_guild_create<C: ChatClient>(
    ctx: &BotContext<C>,
    gateway: &mpsc::Sender<Value>,
    guild: Guild,
) {
    let joined = {
        let mut state = ctx.state.lock().await;
        state
            .guilds
            .insert(guild.id.clone())
            .then(|| state.guilds.len())
    };
    debug!(guild_id = %guild.id, name = %guild.name, "guild available");

    if let Some(count) = joined {
        info!(guild_id = %guild.id, name = %guild.name, guilds = count, "joined guild");
        send_presence(gateway, count).await;
    }
}

// ---------------------------------------------------------------------------
// MESSAGE_CREATE handler
// ---------------------------------------------------------------------------

/// Feed pending battle prompts, try a catch, and only if nothing was caught
/// look for an easter-egg phrase.
pub async fn on_message<C: ChatClient>(ctx: &BotContext<C>, msg: Message) {
    if msg.author.bot {
        return;
    }

    if ctx.waiters.dispatch(&msg) {
        debug!(message_id = %msg.id, "message answered a pending prompt");
    }

    let outcome = CatchResolver::new(ctx).handle(&msg).await;
    if outcome.is_caught() {
        return;
    }
    handle_phrase(ctx, &msg).await;
}

// ---------------------------------------------------------------------------
// MESSAGE_REACTION_ADD handler
// ---------------------------------------------------------------------------

pub async fn on_reaction_add<C: ChatClient>(ctx: &BotContext<C>, reaction: ReactionAdd) {
    let outcome = board::handle_reaction(ctx, &reaction).await;
    if outcome != BoardOutcome::Ignored {
        debug!(message_id = %reaction.message_id, ?outcome, "board reaction handled");
    }
}

// ---------------------------------------------------------------------------
// INTERACTION_CREATE handler
// ---------------------------------------------------------------------------

/// Route an interaction by type.
pub async fn on_interaction<C: ChatClient + 'static>(
    ctx: &Arc<BotContext<C>>,
    interaction: &Interaction,
) -> Result<(), BoxError> {
    match interaction.kind {
        InteractionType::ApplicationCommand => commands::handle_command(ctx, interaction).await,
        InteractionType::MessageComponent => commands::handle_component(ctx, interaction).await,
        InteractionType::Ping => {
            ctx.chat.respond(interaction, &InteractionResponse::pong()).await?;
            Ok(())
        }
        InteractionType::ApplicationCommandAutocomplete | InteractionType::ModalSubmit => {
            debug!(kind = ?interaction.kind, "ignoring interaction");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn send_presence(gateway: &mpsc::Sender<Value>, guild_count: usize) {
    if gateway.send(presence_payload(guild_count)).await.is_err() {
        warn!("gateway closed, presence not updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::memory_context;
    use crate::chat::MemoryChat;
    use crate::spawn::{ActiveSpawn, Scope};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn alice() -> User {
        User {
            id: "5".into(),
            username: "alice".into(),
            discriminator: None,
            avatar: None,
            bot: false,
            global_name: None,
        }
    }

    fn ready(guilds: &[&str]) -> ReadyEvent {
        serde_json::from_value(json!({
            "v": 10,
            "user": { "id": "42", "username": "dogbot", "bot": true },
            "session_id": "abc",
            "resume_gateway_url": "wss://resume.discord.gg",
            "guilds": guilds.iter().map(|id| json!({ "id": id, "unavailable": true })).collect::<Vec<_>>(),
            "application": { "id": "77" }
        }))
        .expect("valid READY")
    }

    fn guild(id: &str) -> Guild {
        Guild {
            id: id.into(),
            name: format!("guild {}", id),
            owner_id: None,
        }
    }

    fn spawn_mutt(ctx: &BotContext<MemoryChat>) -> Scope {
        let scope = Scope::new("1", "10");
        let at = Utc::now() - Duration::seconds(30);
        let announcement = ctx.chat.incoming("1", "10", alice(), "A dog has spawned!", at);
        ctx.chat.insert_message(announcement.clone());
        ctx.spawns.replace(
            &scope,
            ActiveSpawn {
                entity: ctx.catalog.find("mutt").unwrap().clone(),
                spawned_at: at,
                channel_id: "10".into(),
                message_id: announcement.id,
            },
        );
        scope
    }

    // -- ready / guilds ----------------------------------------------------

    #[tokio::test]
    async fn ready_registers_commands_and_sets_presence_once() {
        let ctx = memory_context();
        let (tx, mut rx) = mpsc::channel(8);

        on_ready(&ctx, &tx, ready(&["1", "2"])).await;
        let presence = rx.try_recv().unwrap();
        assert_eq!(presence["d"]["activities"][0]["name"], "in 2 servers!");
        assert_eq!(ctx.chat.registered_commands().len(), commands::definitions().len());

        {
            let state = ctx.state.lock().await;
            assert_eq!(state.bot_user_id.as_deref(), Some("42"));
            assert_eq!(state.application_id.as_deref(), Some("77"));
            assert!(state.commands_registered);
            assert!(state.scheduler_started);
        }

        // A resumed session reports the same guilds; nothing grows.
        on_ready(&ctx, &tx, ready(&["1", "2"])).await;
        assert_eq!(rx.try_recv().unwrap()["d"]["activities"][0]["name"], "in 2 servers!");
    }

    #[tokio::test]
    async fn joining_a_guild_bumps_the_presence() {
        let ctx = memory_context();
        let (tx, mut rx) = mpsc::channel(8);
        on_ready(&ctx, &tx, ready(&["1"])).await;
        let _ = rx.try_recv();

        on_guild_create(&ctx, &tx, guild("1")).await;
        assert!(rx.try_recv().is_err(), "known guild must not re-announce");

        on_guild_create(&ctx, &tx, guild("3")).await;
        assert_eq!(rx.try_recv().unwrap()["d"]["activities"][0]["name"], "in 2 servers!");
    }

    // -- messages ----------------------------------------------------------

    #[tokio::test]
    async fn claim_catches_and_skips_phrases() {
        let ctx = memory_context();
        let scope = spawn_mutt(&ctx);

        on_message(&ctx, ctx.chat.incoming("1", "10", alice(), "dog", Utc::now())).await;

        assert!(!ctx.spawns.is_occupied(&scope));
        assert_eq!(ctx.store.count("5", "1", "mutt").unwrap(), 1);
    }

    #[tokio::test]
    async fn phrase_fires_when_nothing_was_caught() {
        let ctx = memory_context();
        on_message(&ctx, ctx.chat.incoming("1", "10", alice(), "sog", Utc::now())).await;
        assert_eq!(ctx.store.achievement_ids("1", "5").unwrap(), vec!["sog"]);
    }

    #[tokio::test]
    async fn bot_messages_are_ignored() {
        let ctx = memory_context();
        let scope = spawn_mutt(&ctx);
        let mut bot = alice();
        bot.bot = true;

        on_message(&ctx, ctx.chat.incoming("1", "10", bot, "dog", Utc::now())).await;
        assert!(ctx.spawns.is_occupied(&scope));
    }

    #[tokio::test]
    async fn pending_prompt_receives_the_message() {
        let ctx = memory_context();
        let rx = ctx.waiters.wait_for("10", "5");
        on_message(&ctx, ctx.chat.incoming("1", "10", alice(), "mutt", Utc::now())).await;
        assert_eq!(rx.await.unwrap().content, "mutt");
    }

    // -- interactions ------------------------------------------------------

    #[tokio::test]
    async fn ping_interaction_gets_pong() {
        let ctx = memory_context();
        let ping: Interaction = serde_json::from_value(json!({
            "id": "1",
            "application_id": "77",
            "type": 1,
            "token": "tok"
        }))
        .unwrap();

        on_interaction(&ctx, &ping).await.unwrap();
        assert_eq!(ctx.chat.responses()[0].kind, InteractionCallbackType::Pong);
    }
}
