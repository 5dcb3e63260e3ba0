//! Claim resolution: the first matching "dog" after a spawn wins it.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::achievements::{award, evaluate_catch, CatchFacts, GrantOutcome};
use crate::bot::BotContext;
use crate::catalog::EntityDefinition;
use crate::chat::ChatClient;
use crate::spawn::Scope;
use crate::types::{CreateMessage, Message};

/// The word that claims a spawn.
pub const CATCH_KEYWORD: &str = "dog";

/// Whether `content` is a claim attempt.
pub fn is_claim(content: &str) -> bool {
    content.trim().eq_ignore_ascii_case(CATCH_KEYWORD)
}

/// What the winner got.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchReceipt {
    pub entity: EntityDefinition,
    pub elapsed: Duration,
    /// The winner's count of this dog, `None` if the store write failed.
    pub new_total: Option<u64>,
    /// Achievements granted for the first time by this catch.
    pub achievements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatchOutcome {
    Caught(CatchReceipt),
    NoCatch,
}

impl CatchOutcome {
    pub fn is_caught(&self) -> bool {
        matches!(self, Self::Caught(_))
    }
}

/// The confirmation posted after a catch.
pub fn confirmation_text(user: &str, entity: &EntityDefinition, total: Option<u64>, elapsed: Duration) -> String {
    let mut text = format!("{} caught {} {} dog!!!\n", user, entity.emoji, entity.name);
    if let Some(total) = total {
        text.push_str(&format!("You have now caught {} dogs of that type!!!\n", total));
    }
    text.push_str(&format!("This fella was caught in {} seconds!!!", elapsed.as_secs()));
    text
}

pub struct CatchResolver<'a, C> {
    ctx: &'a BotContext<C>,
}

impl<'a, C: ChatClient> CatchResolver<'a, C> {
    pub fn new(ctx: &'a BotContext<C>) -> Self {
        Self { ctx }
    }

    /// Resolve one incoming message.
    ///
    /// Non-claims and claims without a matching spawn leave all state
    /// untouched. Once the spawn is taken the catch is final: later failures
    /// are logged but never hand the spawn back.
    pub async fn handle(&self, msg: &Message) -> CatchOutcome {
        let ctx = self.ctx;
        let Some(guild_id) = msg.guild_id.as_deref() else {
            return CatchOutcome::NoCatch;
        };
        if msg.author.bot || !is_claim(&msg.content) {
            return CatchOutcome::NoCatch;
        }

        let scope = Scope::new(guild_id, msg.channel_id.as_str());
        let Some(spawn) = ctx.spawns.take_matching(&scope, &msg.channel_id) else {
            return CatchOutcome::NoCatch;
        };

        let caught_at = msg.created_at().unwrap_or_else(chrono::Utc::now);
        let elapsed = (caught_at - spawn.spawned_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        info!(
            %scope,
            dog = %spawn.entity.name,
            user_id = %msg.author.id,
            elapsed_secs = elapsed.as_secs(),
            "dog caught"
        );

        if let Err(e) = ctx.chat.delete_message(&spawn.channel_id, &spawn.message_id).await {
            warn!(error = %e, message_id = %spawn.message_id, "failed to delete spawn message");
        }

        let new_total = match ctx.store.increment(&msg.author.id, guild_id, &spawn.entity.name, 1) {
            Ok(total) => Some(total),
            Err(e) => {
                error!(error = %e, user_id = %msg.author.id, "failed to record catch");
                None
            }
        };

        let text = confirmation_text(&msg.author.username, &spawn.entity, new_total, elapsed);
        if let Err(e) = ctx
            .chat
            .send_message(&msg.channel_id, &CreateMessage::new().content(text))
            .await
        {
            warn!(error = %e, "failed to send catch confirmation");
        }

        let facts = CatchFacts {
            entity: &spawn.entity.name,
            elapsed,
            new_total: new_total.unwrap_or(0),
        };
        let mut granted = Vec::new();
        for id in evaluate_catch(&facts) {
            if award(ctx, guild_id, &msg.channel_id, &msg.author, id).await == Some(GrantOutcome::Granted) {
                granted.push(id.to_string());
            }
        }

        CatchOutcome::Caught(CatchReceipt {
            entity: spawn.entity,
            elapsed,
            new_total,
            achievements: granted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::memory_context;
    use crate::chat::MemoryChat;
    use crate::spawn::ActiveSpawn;
    use crate::types::User;
    use chrono::{DateTime, TimeZone, Utc};

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            username: name.to_string(),
            discriminator: None,
            avatar: None,
            bot: false,
            global_name: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap()
    }

    /// Put `dog` in 1/10 as if announced at `t0`.
    fn spawn_dog(ctx: &BotContext<MemoryChat>, dog: &str) -> Scope {
        let scope = Scope::new("1", "10");
        ctx.chat.set_now(t0());
        let announcement = ctx
            .chat
            .incoming("1", "10", user("1", "dogbot"), "A dog has spawned!", t0());
        ctx.chat.insert_message(announcement.clone());
        ctx.spawns.replace(
            &scope,
            ActiveSpawn {
                entity: ctx.catalog.find(dog).unwrap().clone(),
                spawned_at: t0(),
                channel_id: "10".into(),
                message_id: announcement.id,
            },
        );
        scope
    }

    // -- keyword -----------------------------------------------------------

    #[test]
    fn keyword_is_trimmed_and_case_insensitive() {
        assert!(is_claim("dog"));
        assert!(is_claim("  DoG \n"));
        assert!(!is_claim("dogs"));
        assert!(!is_claim("a dog"));
        assert!(!is_claim(""));
    }

    #[test]
    fn confirmation_text_format() {
        let entity = EntityDefinition {
            name: "husky".into(),
            emoji: "🐺".into(),
            chance: 1.0,
            image: String::new(),
        };
        assert_eq!(
            confirmation_text("alice", &entity, Some(2), Duration::from_millis(3_900)),
            "alice caught 🐺 husky dog!!!\nYou have now caught 2 dogs of that type!!!\nThis fella was caught in 3 seconds!!!"
        );
    }

    // -- resolution --------------------------------------------------------

    #[tokio::test]
    async fn first_claim_wins_and_clears_the_scope() {
        let ctx = memory_context();
        let scope = spawn_dog(&ctx, "husky");
        let resolver = CatchResolver::new(&*ctx);

        let first = ctx.chat.incoming("1", "10", user("5", "alice"), "dog", t0() + chrono::Duration::seconds(3));
        let second = ctx.chat.incoming("1", "10", user("6", "bob"), "dog", t0() + chrono::Duration::seconds(4));

        let CatchOutcome::Caught(receipt) = resolver.handle(&first).await else {
            panic!("first claim should win");
        };
        assert_eq!(receipt.entity.name, "husky");
        assert_eq!(receipt.elapsed, Duration::from_secs(3));
        assert_eq!(receipt.new_total, Some(1));
        assert_eq!(receipt.achievements, vec!["fast_dog"]);

        assert_eq!(resolver.handle(&second).await, CatchOutcome::NoCatch);
        assert!(!ctx.spawns.is_occupied(&scope));
        assert_eq!(ctx.store.count("5", "1", "husky").unwrap(), 1);
        assert_eq!(ctx.store.count("6", "1", "husky").unwrap(), 0);
    }

    #[tokio::test]
    async fn catch_deletes_announcement_and_confirms() {
        let ctx = memory_context();
        spawn_dog(&ctx, "mutt");
        let claim = ctx.chat.incoming("1", "10", user("5", "alice"), "Dog", t0() + chrono::Duration::seconds(42));

        assert!(CatchResolver::new(&*ctx).handle(&claim).await.is_caught());
        assert_eq!(ctx.chat.deleted().len(), 1);

        let texts: Vec<String> = ctx.chat.sent_to("10").iter().map(|m| m.text().to_string()).collect();
        assert_eq!(
            texts,
            vec!["alice caught 🐕 mutt dog!!!\nYou have now caught 1 dogs of that type!!!\nThis fella was caught in 42 seconds!!!"]
        );
    }

    #[tokio::test]
    async fn non_keyword_leaves_state_unchanged() {
        let ctx = memory_context();
        let scope = spawn_dog(&ctx, "mutt");
        let chatter = ctx.chat.incoming("1", "10", user("5", "alice"), "cute dog!", t0());

        assert_eq!(CatchResolver::new(&*ctx).handle(&chatter).await, CatchOutcome::NoCatch);
        assert!(ctx.spawns.get(&scope).is_some());
        assert!(ctx.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn claim_in_other_channel_does_not_catch() {
        let ctx = memory_context();
        let scope = spawn_dog(&ctx, "mutt");
        let elsewhere = ctx.chat.incoming("1", "11", user("5", "alice"), "dog", t0());

        assert_eq!(CatchResolver::new(&*ctx).handle(&elsewhere).await, CatchOutcome::NoCatch);
        assert!(ctx.spawns.get(&scope).is_some());
    }

    #[tokio::test]
    async fn claim_without_spawn_is_ignored() {
        let ctx = memory_context();
        let claim = ctx.chat.incoming("1", "10", user("5", "alice"), "dog", t0());
        assert_eq!(CatchResolver::new(&*ctx).handle(&claim).await, CatchOutcome::NoCatch);
        assert!(ctx.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn clock_skew_clamps_to_zero() {
        let ctx = memory_context();
        spawn_dog(&ctx, "mutt");
        let early = ctx.chat.incoming("1", "10", user("5", "alice"), "dog", t0() - chrono::Duration::seconds(2));

        let CatchOutcome::Caught(receipt) = CatchResolver::new(&*ctx).handle(&early).await else {
            panic!("claim should win");
        };
        assert_eq!(receipt.elapsed, Duration::ZERO);
    }

    #[tokio::test]
    async fn repeat_achievement_is_not_announced_twice() {
        let ctx = memory_context();
        let resolver = CatchResolver::new(&*ctx);

        spawn_dog(&ctx, "eboy");
        let claim = ctx.chat.incoming("1", "10", user("5", "alice"), "dog", t0() + chrono::Duration::seconds(30));
        let CatchOutcome::Caught(first) = resolver.handle(&claim).await else {
            panic!("claim should win");
        };
        assert_eq!(first.achievements, vec!["professional_gamer"]);

        spawn_dog(&ctx, "eboy");
        let again = ctx.chat.incoming("1", "10", user("5", "alice"), "dog", t0() + chrono::Duration::seconds(30));
        let CatchOutcome::Caught(second) = resolver.handle(&again).await else {
            panic!("claim should win");
        };
        assert!(second.achievements.is_empty());
        assert_eq!(second.new_total, Some(2));

        let unlocked = ctx
            .chat
            .sent_to("10")
            .iter()
            .filter(|m| m.embeds().iter().any(|e| e.author.as_ref().is_some_and(|a| a.name == "Achievement Unlocked!")))
            .count();
        assert_eq!(unlocked, 1);
    }
}
