//! Easter-egg phrases that unlock achievements.
//!
//! The table is ordered and the first match wins. It is only consulted for
//! messages that did not catch anything.

use tracing::{debug, warn};

use crate::achievements::award;
use crate::bot::BotContext;
use crate::chat::{ChatClient, FileUpload};
use crate::types::{CreateMessage, Embed, Message};

/// How a phrase is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Whole message, trimmed and lowercased.
    Exact(&'static str),
    /// Whole message, trimmed, case preserved.
    ExactCase(&'static str),
    /// Substring of the lowercased message.
    Contains(&'static str),
    /// Any of several exact lowercased forms.
    AnyOf(&'static [&'static str]),
}

impl Matcher {
    fn matches(&self, trimmed: &str, lowered: &str) -> bool {
        match *self {
            Matcher::Exact(s) => lowered == s,
            Matcher::ExactCase(s) => trimmed == s,
            Matcher::Contains(s) => lowered.contains(s),
            Matcher::AnyOf(forms) => forms.contains(&lowered),
        }
    }
}

/// A picture reply sent before the achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub title: &'static str,
    /// File name under the media directory.
    pub image: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phrase {
    pub matcher: Matcher,
    pub reply: Option<Reply>,
    pub achievement: &'static str,
}

const fn phrase(matcher: Matcher, achievement: &'static str) -> Phrase {
    Phrase {
        matcher,
        reply: None,
        achievement,
    }
}

pub const PHRASES: &[Phrase] = &[
    phrase(Matcher::Exact("i forfeit all mortal possessions to dog"), "yeah"),
    Phrase {
        matcher: Matcher::ExactCase("horse"),
        reply: Some(Reply {
            title: "Horse!",
            image: "Horse.png",
        }),
        achievement: "honse",
    },
    phrase(Matcher::Contains("the game"), "I_hate_you"),
    phrase(Matcher::Exact("please do not the dog"), "please_do_not_the_dog"),
    Phrase {
        matcher: Matcher::Exact("fog"),
        reply: Some(Reply {
            title: "fog.",
            image: "fog.png",
        }),
        achievement: "fog",
    },
    phrase(Matcher::Exact("cat"), "banished"),
    phrase(Matcher::Exact("sog"), "sog"),
    phrase(Matcher::Exact("huh"), "huh"),
    phrase(Matcher::Exact("bwaa"), "bwaa"),
    phrase(Matcher::AnyOf(&["appel", "april"]), "this_dock_is_holding_an_apple"),
    phrase(
        Matcher::AnyOf(&["shiba x husky", "husky x shiba", "shusky"]),
        "canon",
    ),
    phrase(Matcher::AnyOf(&["i love cat", "cat > dog"]), "on_the_run"),
    phrase(Matcher::AnyOf(&["1+1=2", "1 + 1 = 2"]), "mathematician"),
];

/// The first phrase `content` triggers.
pub fn match_phrase(content: &str) -> Option<&'static Phrase> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    PHRASES.iter().find(|p| p.matcher.matches(trimmed, &lowered))
}

/// Reply to and reward an easter-egg phrase. `true` if one matched.
pub async fn handle_phrase<C: ChatClient>(ctx: &BotContext<C>, msg: &Message) -> bool {
    let Some(guild_id) = msg.guild_id.as_deref() else {
        return false;
    };
    let Some(phrase) = match_phrase(&msg.content) else {
        return false;
    };
    debug!(achievement = phrase.achievement, user_id = %msg.author.id, "phrase matched");

    if let Some(reply) = phrase.reply {
        send_reply(ctx, &msg.channel_id, reply).await;
    }
    award(ctx, guild_id, &msg.channel_id, &msg.author, phrase.achievement).await;
    true
}

async fn send_reply<C: ChatClient>(ctx: &BotContext<C>, channel_id: &str, reply: Reply) {
    let path = ctx.config.media_dir.join(reply.image);
    let result = match FileUpload::read(&path).await {
        Ok(file) => {
            let embed = Embed::new()
                .title(reply.title)
                .image(format!("attachment://{}", file.filename));
            ctx.chat
                .send_message_with_file(channel_id, &CreateMessage::new().embed(embed), &file)
                .await
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "phrase image unavailable");
            let embed = Embed::new().title(reply.title);
            ctx.chat
                .send_message(channel_id, &CreateMessage::new().embed(embed))
                .await
        }
    };
    if let Err(e) = result {
        warn!(error = %e, channel_id, "failed to send phrase reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::memory_context;
    use crate::types::User;
    use chrono::Utc;

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

    fn id_of(content: &str) -> Option<&'static str> {
        match_phrase(content).map(|p| p.achievement)
    }

    // -- matching ----------------------------------------------------------

    #[test]
    fn exact_phrases_ignore_case_and_whitespace() {
        assert_eq!(id_of("  FOG "), Some("fog"));
        assert_eq!(id_of("Cat"), Some("banished"));
        assert_eq!(id_of("I Forfeit All Mortal Possessions To Dog"), Some("yeah"));
        assert_eq!(id_of("fog machine"), None);
    }

    #[test]
    fn horse_is_case_sensitive() {
        assert_eq!(id_of("horse"), Some("honse"));
        assert_eq!(id_of("Horse"), None);
    }

    #[test]
    fn the_game_matches_anywhere() {
        assert_eq!(id_of("I just lost The Game"), Some("I_hate_you"));
    }

    #[test]
    fn alternatives_share_an_achievement() {
        for text in ["shiba x husky", "Husky X Shiba", "shusky"] {
            assert_eq!(id_of(text), Some("canon"), "{text}");
        }
        assert_eq!(id_of("1 + 1 = 2"), Some("mathematician"));
        assert_eq!(id_of("1+1=2"), Some("mathematician"));
        assert_eq!(id_of("april"), Some("this_dock_is_holding_an_apple"));
        assert_eq!(id_of("cat > dog"), Some("on_the_run"));
    }

    #[test]
    fn first_match_wins() {
        // "the game" is checked before "please do not the dog".
        assert_eq!(id_of("please do not the game"), Some("I_hate_you"));
    }

    #[test]
    fn ordinary_chat_matches_nothing() {
        assert_eq!(id_of("dog"), None);
        assert_eq!(id_of(""), None);
        assert_eq!(id_of("   "), None);
    }

    #[test]
    fn every_phrase_has_a_bundled_achievement() {
        let ctx = memory_context();
        for p in PHRASES {
            assert!(ctx.achievements.get(p.achievement).is_some(), "{} missing", p.achievement);
        }
    }

    // -- handling ----------------------------------------------------------

    #[tokio::test]
    async fn phrase_is_rewarded_once() {
        let ctx = memory_context();
        let msg = ctx.chat.incoming("1", "10", alice(), "huh", Utc::now());

        assert!(handle_phrase(&ctx, &msg).await);
        assert!(handle_phrase(&ctx, &msg).await);

        assert_eq!(ctx.store.achievement_ids("1", "5").unwrap(), vec!["huh"]);
        assert_eq!(ctx.chat.sent_to("10").len(), 1);
    }

    #[tokio::test]
    async fn picture_reply_precedes_the_achievement() {
        let ctx = memory_context();
        let msg = ctx.chat.incoming("1", "10", alice(), "fog", Utc::now());

        assert!(handle_phrase(&ctx, &msg).await);
        let sent = ctx.chat.sent_to("10");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].embeds()[0].title.as_deref(), Some("fog."));
        assert!(sent[1].embeds()[0].author.is_some());
    }

    #[tokio::test]
    async fn direct_messages_are_ignored() {
        let ctx = memory_context();
        let mut msg = ctx.chat.incoming("1", "10", alice(), "huh", Utc::now());
        msg.guild_id = None;
        assert!(!handle_phrase(&ctx, &msg).await);
        assert!(ctx.chat.sent().is_empty());
    }
}
