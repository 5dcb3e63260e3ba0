//! Rate-limit aware client for the Discord REST API.
//!
//! All outbound REST calls go through [`DiscordHttpClient::request`] so auth
//! headers, bucket back-off and error mapping live in one place. The client
//! implements [`ChatClient`], which is all the game logic ever sees.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chat::{ChannelAccess, ChatClient, ChatError, FileUpload};
use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!("DiscordBot (dogbot, ", env!("CARGO_PKG_VERSION"), ")");
const MAX_RETRIES: u32 = 5;
const MAX_WAIT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Rate-limit tracker (per-bucket)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

#[derive(Debug, Clone, Default)]
struct RateLimiter {
    /// Route key to bucket id.
    route_buckets: HashMap<String, String>,
    buckets: HashMap<String, BucketState>,
    /// No request may go out before this instant.
    global_until: Option<Instant>,
}

impl RateLimiter {
    /// How long to wait before sending on `route_key`, `None` to go now.
    fn delay_for(&self, route_key: &str, now: Instant) -> Option<Duration> {
        if let Some(until) = self.global_until {
            if until > now {
                return Some(until - now);
            }
        }

        let bucket_id = self.route_buckets.get(route_key)?;
        let state = self.buckets.get(bucket_id)?;
        (state.remaining == 0 && state.resets_at > now).then(|| state.resets_at - now)
    }

    /// Record what the response headers said about `route_key`.
    fn update(&mut self, route_key: &str, info: &RateLimitInfo, now: Instant) {
        let reset_after = info
            .reset_after
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_secs(1));
        let reset_at = now + reset_after.min(MAX_WAIT);
        if info.is_global {
            self.global_until = Some(reset_at);
        }

        if let Some(bucket) = &info.bucket {
            self.route_buckets.insert(route_key.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: reset_at,
                },
            );
        }
    }
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: header("x-ratelimit-reset-after").and_then(|s| s.parse().ok()),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global") == Some("true"),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<HttpError> for ChatError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Api { status: 403, .. } => ChatError::PermissionDenied,
            HttpError::Api { status: 404, .. } => ChatError::NotFound,
            other => ChatError::Transport(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

enum Body<'a> {
    Empty,
    Json(Value),
    /// `payload_json` plus one file as `files[0]`.
    Multipart { payload: String, file: &'a FileUpload },
}

impl Body<'_> {
    fn apply(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, HttpError> {
        Ok(match self {
            Body::Empty => req,
            Body::Json(json) => req.json(json),
            Body::Multipart { payload, file } => {
                let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.filename.clone())
                    .mime_str("application/octet-stream")?;
                let form = reqwest::multipart::Form::new()
                    .text("payload_json", payload.clone())
                    .part("files[0]", part);
                req.multipart(form)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// Cheap to clone; the connection pool and limiter are shared.
#[derive(Clone)]
pub struct DiscordHttpClient {
    http: reqwest::Client,
    token: String,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    pub fn new(token: impl Into<String>) -> Result<Self, HttpError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            token: token.into(),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        })
    }

    /// Send a request to `{BASE_URL}/{path}` and return the raw body.
    ///
    /// `route_key` groups requests for rate-limit bucketing, e.g.
    /// `POST /channels/{channel_id}/messages`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Body<'_>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", BASE_URL, path.trim_start_matches('/'));

        for attempt in 0..=MAX_RETRIES {
            let wait = self.limiter.lock().await.delay_for(route_key, Instant::now());
            if let Some(delay) = wait {
                let delay = delay.min(MAX_WAIT);
                debug!(route = route_key, delay_ms = delay.as_millis() as u64, "rate-limit pre-emptive backoff");
                tokio::time::sleep(delay).await;
            }

            let req = self
                .http
                .request(method.clone(), &url)
                .header("authorization", format!("Bot {}", self.token));
            let resp = body.apply(req)?.send().await?;

            let status = resp.status();
            let info = parse_rate_limit_headers(resp.headers());
            self.limiter.lock().await.update(route_key, &info, Instant::now());

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = info.reset_after.unwrap_or(1.0);
                warn!(
                    route = route_key,
                    attempt,
                    retry_after_s = retry_after,
                    global = info.is_global,
                    "rate-limited by Discord, backing off"
                );
                let delay = Duration::try_from_secs_f64(retry_after).unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay.min(MAX_WAIT)).await;
                continue;
            }

            let bytes = resp.bytes().await?;
            if status.is_success() {
                return Ok(bytes.to_vec());
            }
            return Err(HttpError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                route: route_key.to_string(),
            });
        }

        Err(HttpError::Api {
            status: 429,
            body: "rate-limited after max retries".to_string(),
            route: route_key.to_string(),
        })
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Body<'_>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route_key, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn create_message(&self, channel_id: &str, msg: &CreateMessage) -> Result<Message, HttpError> {
        let path = format!("channels/{}/messages", channel_id);
        let route_key = format!("POST /channels/{}/messages", channel_id);
        self.request_json(Method::POST, &path, &route_key, Body::Json(serde_json::to_value(msg)?))
            .await
    }

    /// Post `msg` with `file` attached; embeds can reference it as
    /// `attachment://{filename}`.
    pub async fn create_message_with_file(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
        file: &FileUpload,
    ) -> Result<Message, HttpError> {
        let path = format!("channels/{}/messages", channel_id);
        let route_key = format!("POST /channels/{}/messages", channel_id);
        let payload = serde_json::to_string(msg)?;
        self.request_json(Method::POST, &path, &route_key, Body::Multipart { payload, file })
            .await
    }

    pub async fn get_message(&self, channel_id: &str, message_id: &str) -> Result<Message, HttpError> {
        let path = format!("channels/{}/messages/{}", channel_id, message_id);
        let route_key = format!("GET /channels/{}/messages/{{id}}", channel_id);
        self.request_json(Method::GET, &path, &route_key, Body::Empty).await
    }

    pub async fn remove_message(&self, channel_id: &str, message_id: &str) -> Result<(), HttpError> {
        let path = format!("channels/{}/messages/{}", channel_id, message_id);
        let route_key = format!("DELETE /channels/{}/messages/{{id}}", channel_id);
        self.request(Method::DELETE, &path, &route_key, Body::Empty).await?;
        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel, HttpError> {
        let path = format!("channels/{}", channel_id);
        let route_key = format!("GET /channels/{}", channel_id);
        self.request_json(Method::GET, &path, &route_key, Body::Empty).await
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        let path = format!("interactions/{}/{}/callback", interaction_id, interaction_token);
        // 204 No Content on success.
        self.request(
            Method::POST,
            &path,
            "POST /interactions/callback",
            Body::Json(serde_json::to_value(response)?),
        )
        .await?;
        Ok(())
    }

    pub async fn create_followup(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<Message, HttpError> {
        let path = format!("webhooks/{}/{}", application_id, interaction_token);
        self.request_json(
            Method::POST,
            &path,
            "POST /webhooks/interaction",
            Body::Json(serde_json::to_value(data)?),
        )
        .await
    }

    pub async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<Message, HttpError> {
        let path = format!("webhooks/{}/{}/messages/@original", application_id, interaction_token);
        self.request_json(
            Method::PATCH,
            &path,
            "PATCH /webhooks/interaction/messages/@original",
            Body::Json(serde_json::to_value(data)?),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Slash command registration
    // ------------------------------------------------------------------

    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!("applications/{}/commands", application_id);
        let route_key = format!("PUT /applications/{}/commands", application_id);
        self.request_json(Method::PUT, &path, &route_key, Body::Json(serde_json::to_value(commands)?))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

impl ChatClient for DiscordHttpClient {
    async fn send_message(&self, channel_id: &str, msg: &CreateMessage) -> Result<Message, ChatError> {
        Ok(self.create_message(channel_id, msg).await?)
    }

    async fn send_message_with_file(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
        file: &FileUpload,
    ) -> Result<Message, ChatError> {
        Ok(self.create_message_with_file(channel_id, msg, file).await?)
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ChatError> {
        Ok(self.remove_message(channel_id, message_id).await?)
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Message, ChatError> {
        Ok(self.get_message(channel_id, message_id).await?)
    }

    /// A channel the bot can fetch is treated as postable; a send that is
    /// still refused surfaces as [`ChatError::PermissionDenied`] on the send.
    async fn channel_access(&self, channel_id: &str) -> Result<ChannelAccess, ChatError> {
        match self.get_channel(channel_id).await {
            Ok(_) => Ok(ChannelAccess::FULL),
            Err(e) => match ChatError::from(e) {
                ChatError::PermissionDenied => Ok(ChannelAccess {
                    can_view: false,
                    can_send: false,
                }),
                other => Err(other),
            },
        }
    }

    async fn respond(&self, interaction: &Interaction, response: &InteractionResponse) -> Result<(), ChatError> {
        Ok(self
            .create_interaction_response(&interaction.id, &interaction.token, response)
            .await?)
    }

    async fn follow_up(
        &self,
        interaction: &Interaction,
        data: &InteractionCallbackData,
    ) -> Result<Message, ChatError> {
        Ok(self
            .create_followup(&interaction.application_id, &interaction.token, data)
            .await?)
    }

    async fn edit_original(
        &self,
        interaction: &Interaction,
        data: &InteractionCallbackData,
    ) -> Result<Message, ChatError> {
        Ok(self
            .edit_original_interaction_response(&interaction.application_id, &interaction.token, data)
            .await?)
    }

    async fn register_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<(), ChatError> {
        self.bulk_overwrite_global_commands(application_id, commands).await?;
        Ok(())
    }
}
