//! Slash-command definitions and handlers, plus the buttons they create.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::battle::{self, Challenge, ANSWER_TIMEOUT};
use crate::bot::{BotContext, BoxError};
use crate::chat::ChatClient;
use crate::scheduler::announce_spawn;
use crate::spawn::Scope;
use crate::store::Leaderboard;
use crate::types::*;

const INFO_COLOR: u32 = 0xFFA500;
const INVENTORY_COLOR: u32 = 0x3498DB;
const ACHIEVEMENTS_COLOR: u32 = 0xF1C40F;
const MUTT_ICON: &str = "https://github.com/NotRealAz/DogBot/blob/main/media/dogs/mutt.png?raw=true";

const DM_REFUSAL: &str = "This command cannot be used in DMs, try it in a server instead.";
const NOT_ADMIN: &str = "You don't have permission to run this command.";
const NOT_MODERATOR: &str = "You need to be a moderator to use this command.";

// ---------------------------------------------------------------------------
// Slash command definitions
// ---------------------------------------------------------------------------

/// Returns the list of slash commands to register with Discord.
pub fn definitions() -> Vec<ApplicationCommand> {
    vec![
        ApplicationCommand::guild_slash("ping", "Check bot latency"),
        ApplicationCommand::guild_slash("rate", "Rate a user on a scale.")
            .option(OptionKind::User, "target", "The user to rate", true)
            .option(OptionKind::String, "rate", "The scale to rate them on", true),
        ApplicationCommand::guild_slash("fact", "Get a random dog fact"),
        ApplicationCommand::guild_slash("inventory", "See all of your dawgs").option(
            OptionKind::User,
            "member",
            "Whose dogs to show",
            false,
        ),
        ApplicationCommand::guild_slash("achievements", "See your achievements").option(
            OptionKind::User,
            "member",
            "Whose achievements to show",
            false,
        ),
        ApplicationCommand::guild_slash("leaderboard", "Shows the leaderboard"),
        ApplicationCommand::guild_slash("info", "Shows info about DogBot."),
        ApplicationCommand::guild_slash("help", "Shows how to use DogBot."),
        ApplicationCommand::guild_slash("setup", "Set up configuration for catching"),
        ApplicationCommand::guild_slash("setup_catching", "Make a channel a catching channel")
            .option(OptionKind::Channel, "channel", "The channel dogs spawn in", true),
        ApplicationCommand::guild_slash("teardown", "Stop catching in every channel of this server"),
        ApplicationCommand::guild_slash("forcespawn", "Spawn a dog in this channel now").option(
            OptionKind::String,
            "dog",
            "Which dog (random when empty)",
            false,
        ),
        ApplicationCommand::guild_slash("force_remove", "remove dogs from someones inventory")
            .option(OptionKind::User, "member", "The user to remove dogs from", true)
            .option(OptionKind::String, "dog", "The type of dog to remove", true)
            .option(OptionKind::Integer, "amount", "How many to remove", true),
        ApplicationCommand::guild_slash("battle", "Battle dogs with another member!")
            .option(OptionKind::User, "opponent", "Who to challenge", true)
            .option(OptionKind::String, "dog_name", "The dog you battle with", true),
    ]
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// `1234567` → `1,234,567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardKind {
    Server,
    Global,
}

impl LeaderboardKind {
    fn custom_id(self) -> &'static str {
        match self {
            Self::Server => "leaderboard:server",
            Self::Global => "leaderboard:global",
        }
    }

    fn from_custom_id(id: &str) -> Option<Self> {
        match id {
            "leaderboard:server" => Some(Self::Server),
            "leaderboard:global" => Some(Self::Global),
            _ => None,
        }
    }
}

pub fn leaderboard_embed(kind: LeaderboardKind, board: &Leaderboard) -> Embed {
    let (title, footer) = match kind {
        LeaderboardKind::Server => ("Dogs Leaderboard (Server)", "Server Leaderboard"),
        LeaderboardKind::Global => ("Dogs Leaderboard (Global)", "Global Leaderboard"),
    };
    let mut embed = Embed::new().title(title).color(INVENTORY_COLOR).footer(footer);
    if let Some((name, total)) = &board.rarest {
        embed = embed.description(format!("Rarest dog: {} ({} exist)", name, total));
    }
    if board.top.is_empty() {
        return embed.field("No users found", "No data available.", false);
    }
    for (i, (user_id, total)) in board.top.iter().enumerate() {
        embed = embed.field(
            format!("{}.", i + 1),
            format!("{} dogs: <@{}>", group_thousands(*total), user_id),
            false,
        );
    }
    embed
}

fn leaderboard_buttons() -> Component {
    action_row(vec![
        button(BUTTON_PRIMARY, "Server", LeaderboardKind::Server.custom_id()),
        button(BUTTON_PRIMARY, "Global", LeaderboardKind::Global.custom_id()),
    ])
}

fn embeds_response(embeds: Vec<Embed>) -> InteractionResponse {
    InteractionResponse::with_data(InteractionCallbackData {
        embeds: Some(embeds),
        ..Default::default()
    })
}

fn info_embed() -> Embed {
    Embed::new()
        .title("DogBot")
        .description(
            "[Discord Server](https://discord.gg/7yv7DEz9a5)\n\
             [Github Page](https://github.com/NotRealAz/DogBot)\n\n\
             Dog bot adds Dog catching, silly commands, and more fun features!\n\n\
             List of features:",
        )
        .color(INFO_COLOR)
        .field(
            "Dog Hunting",
            "Many dog types such as Mutt, Husky, Dalmatian, and more!\n\
             To catch them, type 'dog' when it spawns in a catching channel.",
            true,
        )
        .field("Commands", "Silly commands for all your silly needs!", true)
        .field(
            "DogBoard",
            "Messages with enough reactions would appear in the dog board to see all of \
             the horrendous or funny stuff people say.",
            true,
        )
        .footer_with_icon("Dog Bot by notrealaz, Dog Stand by meo.isnt.mayo", MUTT_ICON)
        .thumbnail(MUTT_ICON)
}

fn help_embeds() -> Vec<Embed> {
    let setup = Embed::new()
        .title("How to Setup")
        .description(
            "To set up catching, you need to use the `/setup` command on a channel that you \
             want dogs to spawn in, after you run the command dogs will start spawning there \
             every 1/5 minutes.",
        )
        .color(INFO_COLOR)
        .thumbnail(MUTT_ICON);
    let play = Embed::new()
        .title("How to Play")
        .color(INFO_COLOR)
        .field(
            "Catching Dogs",
            "From time to time, dogs will spawn.\n\n\
             To catch them, you must say `dog`. (If you can't catch the dog, then it's \
             glitched and doesn't count). The dog will then be added to your inventory.",
            true,
        )
        .field(
            "Viewing Your Inventory",
            "You can view your inventory using the `/inventory` command. It will display all \
             the dogs you own, including the amount and type.",
            true,
        )
        .field("Silly Commands", "Little silly commands to make DogBot more fun.", true)
        .footer_with_icon("Dog Bot by notrealaz, Dog stand by meo.isnt.mayo", MUTT_ICON);
    vec![setup, play]
}

/// Milliseconds since `snowflake` was minted.
fn latency_ms(snowflake: &str) -> f64 {
    let now = chrono::Utc::now().timestamp_millis() as f64;
    snowflake_timestamp_ms(snowflake)
        .map(|sent| (now - sent as f64).max(0.0))
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Slash command handler
// ---------------------------------------------------------------------------

/// Dispatch one application-command interaction.
pub async fn handle_command<C: ChatClient + 'static>(
    ctx: &Arc<BotContext<C>>,
    interaction: &Interaction,
) -> Result<(), BoxError> {
    let name = interaction
        .data
        .as_ref()
        .and_then(|d| d.name.as_deref())
        .ok_or("missing interaction data")?;
    let author = interaction.author().ok_or("interaction without a user")?;

    let response = match name {
        "ping" => InteractionResponse::message(format!(
            "Pong! Latency: {:.2} ms",
            latency_ms(&interaction.id)
        )),

        "rate" => {
            let target = interaction.option_user("target").unwrap_or(author);
            let label = interaction.option_str("rate").unwrap_or_default();
            let chance = rand::thread_rng().gen_range(0..=100);
            InteractionResponse::message(format!("{} is {}% {}", target.mention(), chance, label))
        }

        "fact" => {
            ctx.chat.respond(interaction, &InteractionResponse::deferred()).await?;
            let data = match ctx.facts.fetch().await {
                Ok(fact) => InteractionCallbackData {
                    content: Some(fact),
                    ..Default::default()
                },
                Err(e) => {
                    warn!(error = %e, "failed to fetch dog fact");
                    InteractionCallbackData {
                        content: Some("Failed to fetch a dog fact.".to_string()),
                        flags: Some(EPHEMERAL),
                        ..Default::default()
                    }
                }
            };
            ctx.chat.follow_up(interaction, &data).await?;
            return Ok(());
        }

        "info" => embeds_response(vec![info_embed()]),
        "help" => embeds_response(help_embeds()),

        _ => {
            let Some(guild_id) = interaction.guild_id.as_deref() else {
                ctx.chat
                    .respond(interaction, &InteractionResponse::ephemeral(DM_REFUSAL))
                    .await?;
                return Ok(());
            };
            match guild_command(ctx, interaction, name, guild_id, author).await? {
                Some(response) => response,
                None => return Ok(()),
            }
        }
    };

    ctx.chat.respond(interaction, &response).await?;
    Ok(())
}

/// Commands that need a guild. `None` when the handler already responded.
async fn guild_command<C: ChatClient + 'static>(
    ctx: &Arc<BotContext<C>>,
    interaction: &Interaction,
    name: &str,
    guild_id: &str,
    author: &User,
) -> Result<Option<InteractionResponse>, BoxError> {
    let perms = interaction.member_permissions();
    let channel_id = interaction.channel_id.as_deref().unwrap_or_default();

    let response = match name {
        "inventory" => {
            let member = interaction.option_user("member");
            let shown = member.unwrap_or(author);
            let dogs = ctx.store.list(&shown.id, guild_id)?;

            let mut embed = Embed::new()
                .title("Dogs")
                .color(INVENTORY_COLOR)
                .author(shown.display_name(), shown.avatar_url());
            if dogs.is_empty() {
                embed = embed.description(match member {
                    Some(m) => format!("{} doesn't have any dogs in their inventory.", m.display_name()),
                    None => "You don't have any dogs in your inventory.".to_string(),
                });
            } else {
                embed = embed.description("Here are all your dogs:");
                for (dog, count) in dogs {
                    embed = embed.field(dog, count.to_string(), true);
                }
            }
            embeds_response(vec![embed])
        }

        "achievements" => {
            let member = interaction.option_user("member");
            let shown = member.unwrap_or(author);
            let ids = ctx.store.achievement_ids(guild_id, &shown.id)?;
            let defs = match ctx.achievements.resolve(&ids) {
                Ok(defs) => defs,
                Err(e) => {
                    warn!(error = %e, user_id = %shown.id, "stored achievement missing from catalog");
                    ids.iter().filter_map(|id| ctx.achievements.get(id)).collect()
                }
            };

            let mut embed = Embed::new()
                .title("Achievements")
                .color(ACHIEVEMENTS_COLOR)
                .author(shown.display_name(), shown.avatar_url());
            if defs.is_empty() {
                embed = embed.description(match member {
                    Some(m) => format!("{} hasn't earned any achievements yet.", m.display_name()),
                    None => "You haven't earned any achievements yet.".to_string(),
                });
            } else {
                embed = embed.description("Here are your achievements:");
                for def in defs {
                    embed = embed.field(format!("🏆 | {}", def.name), "\u{200b}", false);
                }
            }
            embeds_response(vec![embed])
        }

        "leaderboard" => {
            let board = ctx.store.aggregate_leaderboard(guild_id)?;
            InteractionResponse::with_data(InteractionCallbackData {
                embeds: Some(vec![leaderboard_embed(LeaderboardKind::Server, &board)]),
                components: Some(vec![leaderboard_buttons()]),
                ..Default::default()
            })
        }

        "setup" => {
            if !perms.is_admin() {
                return Ok(Some(InteractionResponse::ephemeral(NOT_ADMIN)));
            }
            if ctx.store.add_channel(guild_id, channel_id)? {
                info!(guild_id, channel_id, "catching channel added");
                let channel_name = interaction
                    .channel
                    .as_ref()
                    .and_then(|c| c.name.clone())
                    .unwrap_or_else(|| format!("<#{}>", channel_id));
                InteractionResponse::ephemeral(format!(
                    "The channel {} has been set up for catching!",
                    channel_name
                ))
            } else {
                InteractionResponse::with_data(InteractionCallbackData {
                    content: Some(format!(
                        "The channel <#{}> is already set up for catching.",
                        channel_id
                    )),
                    components: Some(vec![action_row(vec![button(
                        BUTTON_DANGER,
                        "Remove",
                        format!("remove_channel:{}", channel_id),
                    )])]),
                    flags: Some(EPHEMERAL),
                    ..Default::default()
                })
            }
        }

        "setup_catching" => {
            if !perms.is_admin() {
                return Ok(Some(InteractionResponse::ephemeral(NOT_ADMIN)));
            }
            let target = interaction.option_str("channel").ok_or("missing channel option")?;
            if ctx.store.add_channel(guild_id, target)? {
                info!(guild_id, channel_id = target, "catching channel added");
                InteractionResponse::ephemeral(format!(
                    "The channel <#{}> has been set up for catching!",
                    target
                ))
            } else {
                InteractionResponse::ephemeral(format!(
                    "The channel <#{}> is already set up for catching.",
                    target
                ))
            }
        }

        "teardown" => {
            if !perms.is_admin() {
                return Ok(Some(InteractionResponse::ephemeral(NOT_ADMIN)));
            }
            let removed = ctx.store.clear_channels(guild_id)?;
            let spawns = ctx.spawns.clear_guild(guild_id);
            info!(guild_id, removed, spawns, "catching torn down");
            InteractionResponse::ephemeral(format!(
                "Removed {} catching channel(s) from this server.",
                removed
            ))
        }

        "forcespawn" => {
            if !perms.is_moderator() {
                return Ok(Some(InteractionResponse::ephemeral(NOT_MODERATOR)));
            }
            let entity = match interaction.option_str("dog") {
                Some(name) => match ctx.catalog.find(name) {
                    Some(def) => def.clone(),
                    None => {
                        return Ok(Some(InteractionResponse::ephemeral(format!(
                            "There is no dog called '{}'.",
                            name
                        ))))
                    }
                },
                None => ctx.catalog.pick_random(&mut rand::thread_rng()).clone(),
            };

            let scope = Scope::new(guild_id, channel_id);
            let spawn = match announce_spawn(ctx, &scope, &entity).await {
                Ok(spawn) => spawn,
                Err(e) => {
                    warn!(%scope, error = %e, "forced spawn failed");
                    return Ok(Some(InteractionResponse::ephemeral(
                        "Couldn't spawn a dog in this channel.",
                    )));
                }
            };
            if let Some(old) = ctx.spawns.replace(&scope, spawn) {
                let _ = ctx.chat.delete_message(&old.channel_id, &old.message_id).await;
            }
            info!(%scope, dog = %entity.name, user_id = %author.id, "dog force-spawned");
            InteractionResponse::ephemeral(format!("Spawned {} {}.", entity.emoji, entity.name))
        }

        "force_remove" => {
            if !perms.is_moderator() {
                return Ok(Some(InteractionResponse::ephemeral(NOT_MODERATOR)));
            }
            let member = interaction.option_user("member").ok_or("missing member option")?;
            let dog_arg = interaction.option_str("dog").unwrap_or_default();
            let dog = ctx
                .catalog
                .find(dog_arg)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| dog_arg.to_string());
            let amount = match u64::try_from(interaction.option_i64("amount").unwrap_or(0)) {
                Ok(n) if n > 0 => n,
                _ => return Ok(Some(InteractionResponse::ephemeral("Amount must be a positive number."))),
            };

            if ctx.store.count(&member.id, guild_id, &dog)? < amount {
                return Ok(Some(InteractionResponse::ephemeral(
                    "You don't have that many dogs in your inventory.",
                )));
            }
            ctx.store.decrement(&member.id, guild_id, &dog, amount)?;
            info!(guild_id, user_id = %member.id, dog = %dog, amount, "dogs removed by moderator");
            InteractionResponse::ephemeral(format!(
                "Removed {} {} from {}'s inventory.",
                amount,
                dog,
                member.display_name()
            ))
        }

        "battle" => {
            let opponent = interaction.option_user("opponent").ok_or("missing opponent option")?;
            let challenge = Challenge {
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
                challenger: author.clone(),
                opponent: opponent.clone(),
                dog: interaction.option_str("dog_name").unwrap_or_default().to_string(),
            };
            if let Err(reason) = battle::validate_challenge(ctx, &challenge) {
                return Ok(Some(InteractionResponse::ephemeral(reason)));
            }
            ctx.chat
                .respond(interaction, &InteractionResponse::ephemeral("Battle Started."))
                .await?;
            tokio::spawn(battle::run_battle(Arc::clone(ctx), challenge, ANSWER_TIMEOUT));
            return Ok(None);
        }

        _ => {
            info!(command = name, "unknown slash command");
            InteractionResponse::ephemeral(format!("Unknown command: `/{}`", name))
        }
    };

    Ok(Some(response))
}

// ---------------------------------------------------------------------------
// Component interaction handler
// ---------------------------------------------------------------------------

/// Dispatch one button click.
pub async fn handle_component<C: ChatClient>(
    ctx: &BotContext<C>,
    interaction: &Interaction,
) -> Result<(), BoxError> {
    let custom_id = interaction
        .data
        .as_ref()
        .and_then(|d| d.custom_id.as_deref())
        .ok_or("missing component data")?;
    let guild_id = interaction.guild_id.as_deref().ok_or("component outside a guild")?;

    let response = if let Some(kind) = LeaderboardKind::from_custom_id(custom_id) {
        let board = match kind {
            LeaderboardKind::Server => ctx.store.aggregate_leaderboard(guild_id)?,
            LeaderboardKind::Global => ctx.store.global_leaderboard()?,
        };
        InteractionResponse::update(InteractionCallbackData {
            embeds: Some(vec![leaderboard_embed(kind, &board)]),
            components: Some(vec![leaderboard_buttons()]),
            ..Default::default()
        })
    } else if let Some(channel_id) = custom_id.strip_prefix("remove_channel:") {
        if !interaction.member_permissions().is_admin() {
            InteractionResponse::ephemeral(NOT_ADMIN)
        } else {
            ctx.store.remove_channel(guild_id, channel_id)?;
            ctx.spawns.clear(&Scope::new(guild_id, channel_id));
            info!(guild_id, channel_id, "catching channel removed");
            InteractionResponse::update(InteractionCallbackData {
                content: Some(format!(
                    "The channel <#{}> has been removed from the catching channels.",
                    channel_id
                )),
                components: Some(Vec::new()),
                ..Default::default()
            })
        }
    } else {
        warn!(custom_id, "unknown component");
        return Ok(());
    };

    ctx.chat.respond(interaction, &response).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::memory_context;
    use crate::chat::MemoryChat;
    use serde_json::{json, Value};

    const ADMIN: &str = "8";
    const MODERATOR: &str = "1099511627776";
    const MEMBER: &str = "0";

    fn interaction(kind: u8, data: Value, perms: &str) -> Interaction {
        serde_json::from_value(json!({
            "id": "1300000000000000000",
            "application_id": "2",
            "type": kind,
            "token": "tok",
            "guild_id": "1",
            "channel_id": "10",
            "member": {
                "user": { "id": "5", "username": "alice" },
                "permissions": perms
            },
            "data": data
        }))
        .expect("valid interaction")
    }

    fn slash(name: &str, options: Value, perms: &str) -> Interaction {
        interaction(
            2,
            json!({
                "name": name,
                "options": options,
                "resolved": {
                    "users": {
                        "5": { "id": "5", "username": "alice" },
                        "6": { "id": "6", "username": "bob", "global_name": "Bob" }
                    }
                }
            }),
            perms,
        )
    }

    fn click(custom_id: &str, perms: &str) -> Interaction {
        interaction(3, json!({ "custom_id": custom_id, "component_type": 2 }), perms)
    }

    async fn run(ctx: &Arc<BotContext<MemoryChat>>, i: &Interaction) -> InteractionResponse {
        handle_command(ctx, i).await.unwrap();
        ctx.chat.responses().last().cloned().expect("a response")
    }

    fn first_embed(resp: &InteractionResponse) -> Embed {
        resp.data.as_ref().unwrap().embeds.as_ref().unwrap()[0].clone()
    }

    // -- formatting --------------------------------------------------------

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn every_command_is_guild_only_and_unique() {
        let defs = definitions();
        for (i, d) in defs.iter().enumerate() {
            assert_eq!(d.dm_permission, Some(false));
            assert!(defs[..i].iter().all(|o| o.name != d.name), "{} twice", d.name);
        }
        assert_eq!(defs.len(), 14);
    }

    #[test]
    fn empty_leaderboard_says_so() {
        let embed = leaderboard_embed(LeaderboardKind::Global, &Leaderboard::default());
        assert_eq!(embed.title.as_deref(), Some("Dogs Leaderboard (Global)"));
        assert!(embed.description.is_none());
        assert_eq!(embed.fields[0].name, "No users found");
        assert_eq!(embed.footer.unwrap().text, "Global Leaderboard");
    }

    // -- simple commands ---------------------------------------------------

    #[tokio::test]
    async fn ping_reports_latency() {
        let ctx = memory_context();
        let resp = run(&ctx, &slash("ping", json!([]), MEMBER)).await;
        let text = resp.content().unwrap();
        assert!(text.starts_with("Pong! Latency: ") && text.ends_with(" ms"), "{text}");
    }

    #[tokio::test]
    async fn rate_is_a_percentage() {
        let ctx = memory_context();
        let i = slash(
            "rate",
            json!([
                { "name": "target", "type": 6, "value": "6" },
                { "name": "rate", "type": 3, "value": "good boy" }
            ]),
            MEMBER,
        );
        let resp = run(&ctx, &i).await;
        let text = resp.content().unwrap();
        let pct: u32 = text
            .strip_prefix("<@6> is ")
            .and_then(|t| t.strip_suffix("% good boy"))
            .unwrap()
            .parse()
            .unwrap();
        assert!(pct <= 100);
    }

    #[tokio::test]
    async fn fact_failure_is_ephemeral() {
        let ctx = memory_context();
        handle_command(&ctx, &slash("fact", json!([]), MEMBER)).await.unwrap();

        assert_eq!(ctx.chat.responses()[0].kind, InteractionCallbackType::DeferredChannelMessageWithSource);
        let follow = &ctx.chat.follow_ups()[0];
        assert_eq!(follow.content.as_deref(), Some("Failed to fetch a dog fact."));
        assert_eq!(follow.flags, Some(EPHEMERAL));
    }

    #[tokio::test]
    async fn help_sends_two_embeds() {
        let ctx = memory_context();
        let resp = run(&ctx, &slash("help", json!([]), MEMBER)).await;
        let embeds = resp.data.unwrap().embeds.unwrap();
        assert_eq!(embeds.len(), 2);
        assert_eq!(embeds[0].color, Some(INFO_COLOR));
    }

    #[tokio::test]
    async fn guild_commands_refuse_dms() {
        let ctx = memory_context();
        let mut i = slash("inventory", json!([]), MEMBER);
        i.guild_id = None;
        let resp = run(&ctx, &i).await;
        assert!(resp.is_ephemeral());
        assert_eq!(resp.content(), Some(DM_REFUSAL));
    }

    // -- inventory & achievements ------------------------------------------

    #[tokio::test]
    async fn inventory_lists_counts() {
        let ctx = memory_context();
        let empty = run(&ctx, &slash("inventory", json!([]), MEMBER)).await;
        assert_eq!(
            first_embed(&empty).description.as_deref(),
            Some("You don't have any dogs in your inventory.")
        );

        ctx.store.increment("5", "1", "husky", 2).unwrap();
        ctx.store.increment("5", "1", "mutt", 1).unwrap();
        let full = first_embed(&run(&ctx, &slash("inventory", json!([]), MEMBER)).await);
        assert_eq!(full.description.as_deref(), Some("Here are all your dogs:"));
        let fields: Vec<(String, String)> = full.fields.iter().map(|f| (f.name.clone(), f.value.clone())).collect();
        assert_eq!(fields, vec![("husky".into(), "2".into()), ("mutt".into(), "1".into())]);
    }

    #[tokio::test]
    async fn inventory_of_another_member() {
        let ctx = memory_context();
        let i = slash("inventory", json!([{ "name": "member", "type": 6, "value": "6" }]), MEMBER);
        let embed = first_embed(&run(&ctx, &i).await);
        assert_eq!(
            embed.description.as_deref(),
            Some("Bob doesn't have any dogs in their inventory.")
        );
        assert_eq!(embed.author.unwrap().name, "Bob");
    }

    #[tokio::test]
    async fn achievements_are_listed_by_name() {
        let ctx = memory_context();
        ctx.store.claim_achievement("1", "5", "fast_dog").unwrap();
        let embed = first_embed(&run(&ctx, &slash("achievements", json!([]), MEMBER)).await);
        assert_eq!(embed.fields[0].name, "🏆 | fast dog");
        assert_eq!(embed.fields[0].value, "\u{200b}");
    }

    // -- leaderboard -------------------------------------------------------

    #[tokio::test]
    async fn leaderboard_buttons_switch_views() {
        let ctx = memory_context();
        ctx.store.increment("5", "1", "mutt", 1500).unwrap();
        ctx.store.increment("6", "2", "husky", 30).unwrap();

        let resp = run(&ctx, &slash("leaderboard", json!([]), MEMBER)).await;
        let embed = first_embed(&resp);
        assert_eq!(embed.title.as_deref(), Some("Dogs Leaderboard (Server)"));
        assert_eq!(embed.description.as_deref(), Some("Rarest dog: mutt (1500 exist)"));
        assert_eq!(embed.fields[0].value, "1,500 dogs: <@5>");
        assert_eq!(resp.data.as_ref().unwrap().components.as_ref().unwrap()[0].components.len(), 2);

        handle_component(&ctx, &click("leaderboard:global", MEMBER)).await.unwrap();
        let update = ctx.chat.responses().last().cloned().unwrap();
        assert_eq!(update.kind, InteractionCallbackType::UpdateMessage);
        let global = first_embed(&update);
        assert_eq!(global.title.as_deref(), Some("Dogs Leaderboard (Global)"));
        assert_eq!(global.fields.len(), 2);
    }

    // -- setup -------------------------------------------------------------

    #[tokio::test]
    async fn setup_requires_admin() {
        let ctx = memory_context();
        let resp = run(&ctx, &slash("setup", json!([]), MEMBER)).await;
        assert_eq!(resp.content(), Some(NOT_ADMIN));
        assert!(ctx.store.list_channels("1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn setup_twice_offers_remove_button() {
        let ctx = memory_context();
        let first = run(&ctx, &slash("setup", json!([]), ADMIN)).await;
        assert!(first.content().unwrap().ends_with("has been set up for catching!"));
        assert!(first.is_ephemeral());

        let second = run(&ctx, &slash("setup", json!([]), ADMIN)).await;
        assert_eq!(second.content(), Some("The channel <#10> is already set up for catching."));
        let row = &second.data.as_ref().unwrap().components.as_ref().unwrap()[0];
        assert_eq!(row.components[0].custom_id.as_deref(), Some("remove_channel:10"));
        assert_eq!(row.components[0].style, Some(BUTTON_DANGER));

        handle_component(&ctx, &click("remove_channel:10", ADMIN)).await.unwrap();
        let update = ctx.chat.responses().last().cloned().unwrap();
        assert_eq!(
            update.content(),
            Some("The channel <#10> has been removed from the catching channels.")
        );
        assert!(ctx.store.list_channels("1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn setup_catching_and_teardown() {
        let ctx = memory_context();
        let i = slash("setup_catching", json!([{ "name": "channel", "type": 7, "value": "20" }]), ADMIN);
        let resp = run(&ctx, &i).await;
        assert_eq!(resp.content(), Some("The channel <#20> has been set up for catching!"));
        ctx.store.add_channel("1", "21").unwrap();

        let resp = run(&ctx, &slash("teardown", json!([]), ADMIN)).await;
        assert_eq!(resp.content(), Some("Removed 2 catching channel(s) from this server."));
        assert!(ctx.store.list_channels("1").unwrap().is_empty());
    }

    // -- moderation --------------------------------------------------------

    #[tokio::test]
    async fn forcespawn_replaces_the_active_spawn() {
        let ctx = memory_context();
        let i = slash("forcespawn", json!([{ "name": "dog", "type": 3, "value": "Husky" }]), MODERATOR);
        let resp = run(&ctx, &i).await;
        assert_eq!(resp.content(), Some("Spawned 🐺 husky."));

        let scope = Scope::new("1", "10");
        let first = ctx.spawns.get(&scope).unwrap();
        assert_eq!(first.entity.name, "husky");

        run(&ctx, &slash("forcespawn", json!([{ "name": "dog", "type": 3, "value": "mutt" }]), MODERATOR)).await;
        assert_eq!(ctx.spawns.get(&scope).unwrap().entity.name, "mutt");
        assert_eq!(ctx.chat.deleted(), vec![first.message_id]);
    }

    #[tokio::test]
    async fn forcespawn_rejects_members_and_unknown_dogs() {
        let ctx = memory_context();
        let resp = run(&ctx, &slash("forcespawn", json!([]), MEMBER)).await;
        assert_eq!(resp.content(), Some(NOT_MODERATOR));

        let i = slash("forcespawn", json!([{ "name": "dog", "type": 3, "value": "cat" }]), MODERATOR);
        assert_eq!(run(&ctx, &i).await.content(), Some("There is no dog called 'cat'."));
        assert_eq!(ctx.spawns.active_count(), 0);
    }

    #[tokio::test]
    async fn force_remove_checks_that_dog() {
        let ctx = memory_context();
        ctx.store.increment("6", "1", "husky", 3).unwrap();
        ctx.store.increment("6", "1", "mutt", 10).unwrap();
        let remove = |amount: i64| {
            slash(
                "force_remove",
                json!([
                    { "name": "member", "type": 6, "value": "6" },
                    { "name": "dog", "type": 3, "value": "husky" },
                    { "name": "amount", "type": 4, "value": amount }
                ]),
                MODERATOR,
            )
        };

        let resp = run(&ctx, &remove(4)).await;
        assert_eq!(resp.content(), Some("You don't have that many dogs in your inventory."));

        let resp = run(&ctx, &remove(2)).await;
        assert_eq!(resp.content(), Some("Removed 2 husky from Bob's inventory."));
        assert!(resp.is_ephemeral());
        assert_eq!(ctx.store.count("6", "1", "husky").unwrap(), 1);
        assert_eq!(ctx.store.count("6", "1", "mutt").unwrap(), 10);
    }

    // -- battle ------------------------------------------------------------

    #[tokio::test]
    async fn battle_validation_is_ephemeral() {
        let ctx = memory_context();
        let i = slash(
            "battle",
            json!([
                { "name": "opponent", "type": 6, "value": "5" },
                { "name": "dog_name", "type": 3, "value": "husky" }
            ]),
            MEMBER,
        );
        let resp = run(&ctx, &i).await;
        assert_eq!(resp.content(), Some("Why would you want to fight yourself?"));
        assert!(resp.is_ephemeral());
    }

    #[tokio::test]
    async fn battle_starts_and_announces() {
        let ctx = memory_context();
        ctx.store.increment("5", "1", "husky", 1).unwrap();
        let i = slash(
            "battle",
            json!([
                { "name": "opponent", "type": 6, "value": "6" },
                { "name": "dog_name", "type": 3, "value": "husky" }
            ]),
            MEMBER,
        );
        let resp = run(&ctx, &i).await;
        assert_eq!(resp.content(), Some("Battle Started."));

        for _ in 0..100 {
            if ctx.waiters.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(ctx.waiters.len(), 1);
        let sent = ctx.chat.sent_to("10");
        assert_eq!(sent[0].embeds()[0].title.as_deref(), Some("A Dog Battle has been requested!"));
        assert_eq!(sent[1].text(), "<@6>, which dog would you like to battle with?");
    }
}
