//! The chat-platform capability the game logic talks to.
//!
//! [`ChatClient`] is the narrow surface the scheduler, catch resolver and
//! command handlers need. [`crate::http::DiscordHttpClient`] implements it
//! against the REST API; [`MemoryChat`] implements it in memory so the whole
//! spawn/catch flow can be driven without a network.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::warn;

use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The bot may not view or post in the target.
    #[error("missing permissions")]
    PermissionDenied,
    /// The channel or message no longer exists.
    #[error("not found")]
    NotFound,
    #[error("transport error: {0}")]
    Transport(String),
}

/// What the bot may do in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAccess {
    pub can_view: bool,
    pub can_send: bool,
}

impl ChannelAccess {
    pub const FULL: Self = Self {
        can_view: true,
        can_send: true,
    };

    pub fn can_post(self) -> bool {
        self.can_view && self.can_send
    }
}

/// A file to upload alongside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Read a local file, naming the upload after the file.
    pub async fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self { filename, bytes })
    }
}

/// A picture to show with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Media {
    /// Remote picture, rendered as an embed image.
    Url(String),
    /// Local picture, uploaded as an attachment.
    File(FileUpload),
}

impl Media {
    /// Resolve a catalog `image` reference.
    ///
    /// `http(s)` references stay remote; anything else is read from disk.
    /// A missing local file is logged and yields `None` so the caller can
    /// fall back to a text-only message.
    pub async fn from_ref(reference: &str) -> Option<Self> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Some(Self::Url(reference.to_string()));
        }
        match FileUpload::read(reference).await {
            Ok(file) => Some(Self::File(file)),
            Err(e) => {
                warn!(path = reference, error = %e, "media file unavailable, sending text only");
                None
            }
        }
    }
}

/// Capability interface over the chat platform.
///
/// Every method is a single request; callers decide how to react to errors.
pub trait ChatClient: Send + Sync {
    fn send_message(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
    ) -> impl Future<Output = Result<Message, ChatError>> + Send;

    fn send_message_with_file(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
        file: &FileUpload,
    ) -> impl Future<Output = Result<Message, ChatError>> + Send;

    fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> impl Future<Output = Result<Message, ChatError>> + Send;

    /// Whether the bot can see and post in `channel_id`.
    fn channel_access(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<ChannelAccess, ChatError>> + Send;

    /// Initial response to an interaction.
    fn respond(
        &self,
        interaction: &Interaction,
        response: &InteractionResponse,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Extra message after the initial response.
    fn follow_up(
        &self,
        interaction: &Interaction,
        data: &InteractionCallbackData,
    ) -> impl Future<Output = Result<Message, ChatError>> + Send;

    /// Replace the initial (possibly deferred) response.
    fn edit_original(
        &self,
        interaction: &Interaction,
        data: &InteractionCallbackData,
    ) -> impl Future<Output = Result<Message, ChatError>> + Send;

    /// Replace the application's slash commands with `commands`.
    fn register_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> impl Future<Output = Result<(), ChatError>> + Send;
}

/// Send `msg` with optional media: URLs become the embed image, files are
/// uploaded.
pub async fn send_with_media<C: ChatClient>(
    chat: &C,
    channel_id: &str,
    msg: CreateMessage,
    media: Option<Media>,
) -> Result<Message, ChatError> {
    match media {
        None => chat.send_message(channel_id, &msg).await,
        Some(Media::Url(url)) => {
            let msg = msg.embed(Embed::new().image(url));
            chat.send_message(channel_id, &msg).await
        }
        Some(Media::File(file)) => chat.send_message_with_file(channel_id, &msg, &file).await,
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// A message the bot posted through [`MemoryChat`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub body: CreateMessage,
    pub file: Option<String>,
}

impl SentMessage {
    pub fn text(&self) -> &str {
        self.body.content.as_deref().unwrap_or_default()
    }

    pub fn embeds(&self) -> &[Embed] {
        self.body.embeds.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    now: Option<DateTime<Utc>>,
    messages: HashMap<Snowflake, Message>,
    sent: Vec<SentMessage>,
    deleted: Vec<Snowflake>,
    responses: Vec<InteractionResponse>,
    follow_ups: Vec<InteractionCallbackData>,
    edits: Vec<InteractionCallbackData>,
    commands: Vec<ApplicationCommand>,
    denied: HashSet<Snowflake>,
    missing: HashSet<Snowflake>,
    read_only: HashSet<Snowflake>,
    failing: HashSet<Snowflake>,
}

/// In-memory [`ChatClient`] used by tests and dry runs.
///
/// Posted messages are timestamped with a settable clock, so catch timing can
/// be scripted.
#[derive(Debug)]
pub struct MemoryChat {
    bot: User,
    next_id: AtomicU64,
    state: Mutex<MemoryState>,
}

impl Default for MemoryChat {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChat {
    pub fn new() -> Self {
        Self {
            bot: User {
                id: "1".to_string(),
                username: "dogbot".to_string(),
                discriminator: None,
                avatar: None,
                bot: true,
                global_name: None,
            },
            next_id: AtomicU64::new(1000),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the recorded traffic.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> Snowflake {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    // -- scripting ---------------------------------------------------------

    /// Timestamp given to messages posted from now on.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state().now = Some(now);
    }

    /// The bot loses view access to `channel_id`.
    pub fn deny_channel(&self, channel_id: &str) {
        self.state().denied.insert(channel_id.to_string());
    }

    /// The bot can view `channel_id` but not post in it.
    pub fn mute_channel(&self, channel_id: &str) {
        self.state().read_only.insert(channel_id.to_string());
    }

    /// `channel_id` is deleted.
    pub fn delete_channel(&self, channel_id: &str) {
        self.state().missing.insert(channel_id.to_string());
    }

    /// Sends to `channel_id` fail with a transport error.
    pub fn fail_sends(&self, channel_id: &str) {
        self.state().failing.insert(channel_id.to_string());
    }

    /// Make `message` fetchable.
    pub fn insert_message(&self, message: Message) {
        self.state().messages.insert(message.id.clone(), message);
    }

    /// Build a user message as the gateway would deliver it.
    pub fn incoming(
        &self,
        guild_id: &str,
        channel_id: &str,
        author: User,
        content: &str,
        at: DateTime<Utc>,
    ) -> Message {
        Message {
            id: self.next_id(),
            channel_id: channel_id.to_string(),
            guild_id: Some(guild_id.to_string()),
            author,
            content: content.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, false),
            attachments: Vec::new(),
            embeds: Vec::new(),
            reactions: Vec::new(),
            member: None,
        }
    }

    // -- inspection --------------------------------------------------------

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<SentMessage> {
        self.state()
            .sent
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn deleted(&self) -> Vec<Snowflake> {
        self.state().deleted.clone()
    }

    pub fn responses(&self) -> Vec<InteractionResponse> {
        self.state().responses.clone()
    }

    pub fn follow_ups(&self) -> Vec<InteractionCallbackData> {
        self.state().follow_ups.clone()
    }

    pub fn edits(&self) -> Vec<InteractionCallbackData> {
        self.state().edits.clone()
    }

    /// Names of the last registered command set.
    pub fn registered_commands(&self) -> Vec<String> {
        self.state().commands.iter().map(|c| c.name.clone()).collect()
    }

    fn check_channel(state: &MemoryState, channel_id: &str) -> Result<(), ChatError> {
        if state.missing.contains(channel_id) {
            Err(ChatError::NotFound)
        } else if state.denied.contains(channel_id) {
            Err(ChatError::PermissionDenied)
        } else {
            Ok(())
        }
    }

    fn post(
        &self,
        channel_id: &str,
        body: &CreateMessage,
        file: Option<&FileUpload>,
    ) -> Result<Message, ChatError> {
        let id = self.next_id();
        let mut state = self.state();
        Self::check_channel(&state, channel_id)?;
        if state.read_only.contains(channel_id) {
            return Err(ChatError::PermissionDenied);
        }
        if state.failing.contains(channel_id) {
            return Err(ChatError::Transport("connection reset".to_string()));
        }

        let now = state.now.unwrap_or_else(Utc::now);
        let message = Message {
            id: id.clone(),
            channel_id: channel_id.to_string(),
            guild_id: None,
            author: self.bot.clone(),
            content: body.content.clone().unwrap_or_default(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, false),
            attachments: Vec::new(),
            embeds: body.embeds.clone().unwrap_or_default(),
            reactions: Vec::new(),
            member: None,
        };
        state.messages.insert(id.clone(), message.clone());
        state.sent.push(SentMessage {
            id,
            channel_id: channel_id.to_string(),
            body: body.clone(),
            file: file.map(|f| f.filename.clone()),
        });
        Ok(message)
    }
}

impl ChatClient for MemoryChat {
    async fn send_message(&self, channel_id: &str, msg: &CreateMessage) -> Result<Message, ChatError> {
        self.post(channel_id, msg, None)
    }

    async fn send_message_with_file(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
        file: &FileUpload,
    ) -> Result<Message, ChatError> {
        self.post(channel_id, msg, Some(file))
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ChatError> {
        let mut state = self.state();
        Self::check_channel(&state, channel_id)?;
        match state.messages.remove(message_id) {
            Some(_) => {
                state.deleted.push(message_id.to_string());
                Ok(())
            }
            None => Err(ChatError::NotFound),
        }
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Message, ChatError> {
        let state = self.state();
        Self::check_channel(&state, channel_id)?;
        state
            .messages
            .get(message_id)
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .ok_or(ChatError::NotFound)
    }

    async fn channel_access(&self, channel_id: &str) -> Result<ChannelAccess, ChatError> {
        let state = self.state();
        if state.missing.contains(channel_id) {
            return Err(ChatError::NotFound);
        }
        Ok(ChannelAccess {
            can_view: !state.denied.contains(channel_id),
            can_send: !state.denied.contains(channel_id) && !state.read_only.contains(channel_id),
        })
    }

    async fn respond(
        &self,
        _interaction: &Interaction,
        response: &InteractionResponse,
    ) -> Result<(), ChatError> {
        self.state().responses.push(response.clone());
        Ok(())
    }

    async fn follow_up(
        &self,
        interaction: &Interaction,
        data: &InteractionCallbackData,
    ) -> Result<Message, ChatError> {
        self.state().follow_ups.push(data.clone());
        let body = CreateMessage {
            content: data.content.clone(),
            embeds: data.embeds.clone(),
            ..Default::default()
        };
        let channel_id = interaction.channel_id.as_deref().unwrap_or_default();
        self.post(channel_id, &body, None)
    }

    async fn edit_original(
        &self,
        interaction: &Interaction,
        data: &InteractionCallbackData,
    ) -> Result<Message, ChatError> {
        self.state().edits.push(data.clone());
        let now = self.state().now.unwrap_or_else(Utc::now);
        Ok(Message {
            id: self.next_id(),
            channel_id: interaction.channel_id.clone().unwrap_or_default(),
            guild_id: interaction.guild_id.clone(),
            author: self.bot.clone(),
            content: data.content.clone().unwrap_or_default(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, false),
            attachments: Vec::new(),
            embeds: data.embeds.clone().unwrap_or_default(),
            reactions: Vec::new(),
            member: None,
        })
    }

    async fn register_commands(
        &self,
        _application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<(), ChatError> {
        self.state().commands = commands.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // -- MemoryChat --------------------------------------------------------

    #[tokio::test]
    async fn sent_messages_carry_the_scripted_clock() {
        let chat = MemoryChat::new();
        let at = Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap();
        chat.set_now(at);

        let msg = chat
            .send_message("10", &CreateMessage::new().content("hi"))
            .await
            .unwrap();
        assert_eq!(msg.created_at(), Some(at));
        assert_eq!(chat.sent_to("10")[0].text(), "hi");
    }

    #[tokio::test]
    async fn denied_channel_refuses_sends_and_reports_access() {
        let chat = MemoryChat::new();
        chat.deny_channel("10");

        let err = chat
            .send_message("10", &CreateMessage::new().content("hi"))
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::PermissionDenied);

        let access = chat.channel_access("10").await.unwrap();
        assert!(!access.can_post());
    }

    #[tokio::test]
    async fn muted_channel_is_visible_but_not_postable() {
        let chat = MemoryChat::new();
        chat.mute_channel("10");
        let access = chat.channel_access("10").await.unwrap();
        assert!(access.can_view);
        assert!(!access.can_send);
    }

    #[tokio::test]
    async fn deleted_channel_is_not_found() {
        let chat = MemoryChat::new();
        chat.delete_channel("10");
        assert_eq!(chat.channel_access("10").await, Err(ChatError::NotFound));
    }

    #[tokio::test]
    async fn delete_then_fetch_is_not_found() {
        let chat = MemoryChat::new();
        let msg = chat
            .send_message("10", &CreateMessage::new().content("bye"))
            .await
            .unwrap();
        assert!(chat.fetch_message("10", &msg.id).await.is_ok());

        chat.delete_message("10", &msg.id).await.unwrap();
        assert_eq!(chat.deleted(), vec![msg.id.clone()]);
        assert_eq!(
            chat.fetch_message("10", &msg.id).await.unwrap_err(),
            ChatError::NotFound
        );
    }

    // -- media -------------------------------------------------------------

    #[tokio::test]
    async fn url_media_becomes_embed_image() {
        let chat = MemoryChat::new();
        let media = Media::from_ref("https://example.com/dog.png").await;
        send_with_media(&chat, "10", CreateMessage::new().content("woof"), media)
            .await
            .unwrap();

        let sent = &chat.sent()[0];
        assert_eq!(
            sent.embeds()[0].image.as_ref().map(|i| i.url.as_str()),
            Some("https://example.com/dog.png")
        );
        assert!(sent.file.is_none());
    }

    #[tokio::test]
    async fn missing_local_media_falls_back_to_text() {
        let chat = MemoryChat::new();
        let media = Media::from_ref("no/such/dog.png").await;
        assert!(media.is_none());

        send_with_media(&chat, "10", CreateMessage::new().content("woof"), media)
            .await
            .unwrap();
        let sent = &chat.sent()[0];
        assert!(sent.file.is_none());
        assert!(sent.embeds().is_empty());
    }

    #[tokio::test]
    async fn local_media_is_uploaded() {
        let chat = MemoryChat::new();
        let media = Media::from_ref(file!()).await;
        assert!(matches!(media, Some(Media::File(_))));

        send_with_media(&chat, "10", CreateMessage::new().content("woof"), media)
            .await
            .unwrap();
        assert_eq!(chat.sent()[0].file.as_deref(), Some("chat.rs"));
    }
}
