//! DogBoard: messages that collect enough of the board emoji get reposted
//! to a showcase channel, once.

use tracing::{debug, error, info, warn};

use crate::bot::BotContext;
use crate::chat::{ChatClient, ChatError};
use crate::config::BoardConfig;
use crate::types::{action_row, link_button, CreateMessage, Embed, Message, ReactionAdd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardOutcome {
    /// Board disabled, other guild, or other emoji.
    Ignored,
    AlreadyPosted,
    BelowThreshold(u32),
    Posted,
    Failed,
}

/// The repost embed for `msg`.
pub fn board_embed(msg: &Message) -> Embed {
    let content = if msg.content.trim().is_empty() {
        "No Content"
    } else {
        msg.content.as_str()
    };
    let mut embed = Embed::new()
        .description(content)
        .url(msg.jump_url())
        .author(msg.author.display_name(), msg.author.avatar_url())
        .field("Source", format!("<#{}>", msg.channel_id), true);
    if let Some(attachment) = msg.attachments.first() {
        embed = embed.image(attachment.url.clone());
    }
    embed
}

fn is_relevant(board: &BoardConfig, reaction: &ReactionAdd) -> bool {
    if let Some(guild) = &board.guild_id {
        if reaction.guild_id.as_ref() != Some(guild) {
            return false;
        }
    }
    reaction.guild_id.is_some() && reaction.emoji.matches(&board.emoji)
}

/// React to one MESSAGE_REACTION_ADD.
pub async fn handle_reaction<C: ChatClient>(ctx: &BotContext<C>, reaction: &ReactionAdd) -> BoardOutcome {
    let Some(board) = &ctx.config.board else {
        return BoardOutcome::Ignored;
    };
    if !is_relevant(board, reaction) {
        return BoardOutcome::Ignored;
    }

    match ctx.store.is_board_posted(&reaction.message_id) {
        Ok(true) => return BoardOutcome::AlreadyPosted,
        Ok(false) => {}
        Err(e) => {
            error!(error = %e, "failed to check board history");
            return BoardOutcome::Failed;
        }
    }

    let mut msg = match ctx.chat.fetch_message(&reaction.channel_id, &reaction.message_id).await {
        Ok(msg) => msg,
        Err(ChatError::NotFound) => {
            debug!(message_id = %reaction.message_id, "reacted message not found");
            return BoardOutcome::Failed;
        }
        Err(e) => {
            warn!(error = %e, message_id = %reaction.message_id, "failed to fetch reacted message");
            return BoardOutcome::Failed;
        }
    };
    // REST messages don't carry the guild, the jump link needs it.
    if msg.guild_id.is_none() {
        msg.guild_id = reaction.guild_id.clone();
    }

    let count = msg.reaction_count(&board.emoji);
    if count < board.threshold {
        return BoardOutcome::BelowThreshold(count);
    }

    let post = CreateMessage::new()
        .embed(board_embed(&msg))
        .component_row(action_row(vec![link_button("Jump to message", msg.jump_url())]));
    if let Err(e) = ctx.chat.send_message(&board.channel_id, &post).await {
        warn!(error = %e, channel_id = %board.channel_id, "failed to post to board");
        return BoardOutcome::Failed;
    }

    if let Err(e) = ctx.store.mark_board_posted(&msg.id) {
        error!(error = %e, message_id = %msg.id, "failed to record board post");
    }
    info!(message_id = %msg.id, reactions = count, "message reposted to board");
    BoardOutcome::Posted
}
