//! Dog battles: a challenge, a bounded wait for the opponent's pick, and a
//! coin flip.
//!
//! The wait is driven by [`MessageWaiters`], which the message handler feeds
//! before catch processing. A battle runs in its own task so the event loop
//! keeps going while the opponent thinks.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bot::BotContext;
use crate::chat::ChatClient;
use crate::types::{CreateMessage, Embed, Message, Snowflake, User};

/// How long the opponent gets per answer.
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(300);
pub const MAX_ATTEMPTS: usize = 3;

const BATTLE_COLOR: u32 = 0x2ECC71;

struct Waiter {
    channel_id: Snowflake,
    user_id: Snowflake,
    tx: oneshot::Sender<Message>,
}

/// Pending "next message from this user in this channel" requests.
#[derive(Default)]
pub struct MessageWaiters {
    waiters: Mutex<Vec<Waiter>>,
}

impl MessageWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, Vec<Waiter>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve with the next message `user_id` posts in `channel_id`.
    pub fn wait_for(&self, channel_id: &str, user_id: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters();
        waiters.retain(|w| !w.tx.is_closed());
        waiters.push(Waiter {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            tx,
        });
        rx
    }

    /// Hand `msg` to the first live waiter it satisfies. `true` if one took it.
    pub fn dispatch(&self, msg: &Message) -> bool {
        let mut waiters = self.waiters();
        waiters.retain(|w| !w.tx.is_closed());
        let Some(pos) = waiters
            .iter()
            .position(|w| w.channel_id == msg.channel_id && w.user_id == msg.author.id)
        else {
            return false;
        };
        let waiter = waiters.remove(pos);
        waiter.tx.send(msg.clone()).is_ok()
    }

    pub fn len(&self) -> usize {
        self.waiters().iter().filter(|w| !w.tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A validated challenge.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    pub challenger: User,
    pub opponent: User,
    pub dog: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattleResult {
    Winner(Snowflake),
    TimedOut,
    NoValidDog,
}

/// Check a challenge before it is announced. `Err` carries the ephemeral reply.
pub fn validate_challenge<C: ChatClient>(ctx: &BotContext<C>, challenge: &Challenge) -> Result<(), String> {
    if challenge.challenger.id == challenge.opponent.id {
        return Err("Why would you want to fight yourself?".to_string());
    }
    let owned = ctx
        .store
        .count(&challenge.challenger.id, &challenge.guild_id, &challenge.dog)
        .unwrap_or(0);
    if owned == 0 {
        return Err(format!("You have no '{}' in your inventory.", challenge.dog));
    }
    Ok(())
}

/// Announce and play out a validated challenge.
pub async fn run_battle<C: ChatClient>(
    ctx: Arc<BotContext<C>>,
    challenge: Challenge,
    answer_timeout: Duration,
) -> BattleResult {
    let channel = challenge.channel_id.as_str();
    let opponent = &challenge.opponent;

    let embed = Embed::new()
        .title("A Dog Battle has been requested!")
        .description(format!(
            "{} challenges {} to a battle with {}!",
            challenge.challenger.username, opponent.username, challenge.dog
        ))
        .color(BATTLE_COLOR);
    say(&ctx, channel, CreateMessage::new().embed(embed)).await;
    say(
        &ctx,
        channel,
        CreateMessage::new().content(format!(
            "{}, which dog would you like to battle with?",
            opponent.mention()
        )),
    )
    .await;

    let mut picked = None;
    for _ in 0..MAX_ATTEMPTS {
        let rx = ctx.waiters.wait_for(channel, &opponent.id);
        let answer = match tokio::time::timeout(answer_timeout, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) | Err(_) => {
                say_text(
                    &ctx,
                    channel,
                    format!("{} took too long to respond. The battle has been canceled.", opponent.username),
                )
                .await;
                return BattleResult::TimedOut;
            }
        };

        let name = answer.content.trim().to_string();
        let owned = ctx
            .store
            .count(&opponent.id, &challenge.guild_id, &name)
            .unwrap_or(0);
        if owned > 0 {
            picked = Some(name);
            break;
        }
        say_text(
            &ctx,
            channel,
            format!(
                "{}, you don't own a dog named '{}'. Please choose again.",
                opponent.username, name
            ),
        )
        .await;
    }

    let Some(opponent_dog) = picked else {
        say_text(
            &ctx,
            channel,
            format!(
                "{} failed to choose a valid dog in {} attempts. The battle has been canceled.",
                opponent.username, MAX_ATTEMPTS
            ),
        )
        .await;
        return BattleResult::NoValidDog;
    };
    debug!(dog = %opponent_dog, "opponent picked a dog");

    let winner = if rand::random::<bool>() {
        &challenge.challenger
    } else {
        opponent
    };
    info!(
        guild_id = %challenge.guild_id,
        challenger = %challenge.challenger.id,
        opponent = %opponent.id,
        winner = %winner.id,
        "battle finished"
    );
    say_text(&ctx, channel, format!("Winner: {}!", winner.username)).await;
    BattleResult::Winner(winner.id.clone())
}

async fn say<C: ChatClient>(ctx: &BotContext<C>, channel_id: &str, msg: CreateMessage) {
    if let Err(e) = ctx.chat.send_message(channel_id, &msg).await {
        warn!(error = %e, channel_id, "failed to send battle message");
    }
}

async fn say_text<C: ChatClient>(ctx: &BotContext<C>, channel_id: &str, text: String) {
    say(ctx, channel_id, CreateMessage::new().content(text)).await;
}
