//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect, receive HELLO, send IDENTIFY (or RESUME)
//!   - background heartbeat task
//!   - sequence number and session tracking
//!   - reconnect with backoff on disconnect
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The bot consumes a stream of [`GatewayEvent`] values and can push raw
//! payloads (such as presence updates) back through [`GatewayHandle::sender`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::GatewayPayload;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Consecutive failed connects before the driver gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid gateway payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window limiter for outbound gateway messages.
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// How long to wait before the next send, `None` if it may go now.
    /// Does not record the send.
    fn delay_at(&self, now: Instant) -> Option<Duration> {
        let live: Vec<Instant> = self
            .timestamps
            .iter()
            .copied()
            .filter(|&t| now.duration_since(t) < self.window)
            .collect();
        if (live.len() as u32) < self.budget {
            return None;
        }
        let oldest = live.into_iter().min()?;
        let expires_at = oldest + self.window;
        (expires_at > now).then(|| expires_at - now)
    }

    fn record_at(&mut self, now: Instant) {
        let window = self.window;
        self.timestamps.retain(|&t| now.duration_since(t) < window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration and payloads
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    /// Gateway intents bitmask.
    pub intents: u32,
    /// Optional shard info: `[shard_id, num_shards]`.
    pub shard: Option<[u32; 2]>,
}

/// Op 2 IDENTIFY.
pub fn identify_payload(config: &GatewayConfig) -> Value {
    let mut identify = json!({
        "op": 2,
        "d": {
            "token": config.token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "dogbot",
                "device": "dogbot"
            },
            "intents": config.intents,
        }
    });
    if let Some([id, count]) = config.shard {
        identify["d"]["shard"] = json!([id, count]);
    }
    identify
}

/// Op 6 RESUME.
pub fn resume_payload(token: &str, session_id: &str, seq: u64) -> Value {
    json!({
        "op": 6,
        "d": { "token": token, "session_id": session_id, "seq": seq }
    })
}

/// Op 1 HEARTBEAT.
pub fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": 1, "d": seq })
}

/// Op 3 PRESENCE UPDATE: "Playing in N servers!".
pub fn presence_payload(guild_count: usize) -> Value {
    json!({
        "op": 3,
        "d": {
            "since": null,
            "activities": [{ "name": format!("in {} servers!", guild_count), "type": 0 }],
            "status": "online",
            "afk": false
        }
    })
}

/// Pull `heartbeat_interval` out of a HELLO frame.
fn parse_hello(text: &str) -> Result<u64, GatewayError> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    if payload.op != 10 {
        return Err(GatewayError::Handshake(format!(
            "expected op 10 (HELLO), got op {}",
            payload.op
        )));
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .ok_or_else(|| GatewayError::Handshake("HELLO missing heartbeat_interval".to_string()))
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    /// Session id and sequence, if this session can be resumed.
    fn resume_point(&self) -> Option<(&str, u64)> {
        Some((self.session_id.as_deref()?, self.sequence?))
    }

    fn url(&self) -> String {
        let url = self
            .resume_gateway_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        if url.contains("v=10") {
            url
        } else if url.contains('?') {
            format!("{}&v=10&encoding=json", url)
        } else {
            format!("{}?v=10&encoding=json", url)
        }
    }

    fn forget(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }
}

// ---------------------------------------------------------------------------
// Disconnect classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal,
    EventChannelClosed,
}

/// What a close code from Discord means for the next connection.
pub(crate) fn classify_close(code: u16) -> DisconnectReason {
    match code {
        // Authentication, shard, API version or intents problems: retrying won't help.
        4004 | 4010 | 4011 | 4012 | 4013 | 4014 => DisconnectReason::Fatal,
        // Invalid seq or session timeout.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsStream = futures_util::stream::SplitStream<WsConnection>;

/// A running gateway connection.
pub struct GatewayHandle {
    /// Send raw JSON payloads on the gateway (rate-limited).
    pub sender: mpsc::Sender<Value>,
    /// Receive typed events.
    pub events: mpsc::Receiver<GatewayEvent>,
    /// The background driver task.
    pub driver_handle: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver and return its handle.
pub async fn connect(config: GatewayConfig) -> Result<GatewayHandle, GatewayError> {
    let (event_tx, event_rx) = mpsc::channel::<GatewayEvent>(256);
    let (send_tx, send_rx) = mpsc::channel::<Value>(64);

    let driver_handle = tokio::spawn(gateway_driver(config, event_tx, send_rx));

    Ok(GatewayHandle {
        sender: send_tx,
        events: event_rx,
        driver_handle,
    })
}

// ---------------------------------------------------------------------------
// The driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

async fn gateway_driver(
    config: GatewayConfig,
    event_tx: mpsc::Sender<GatewayEvent>,
    mut send_rx: mpsc::Receiver<Value>,
) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut attempts: u32 = 0;

    loop {
        if attempts > 0 {
            if attempts > MAX_RECONNECT_ATTEMPTS {
                error!("exceeded max reconnect attempts, giving up");
                return;
            }
            let backoff = backoff_delay(attempts);
            warn!(
                delay_ms = backoff.as_millis() as u64,
                attempt = attempts,
                "reconnecting after backoff"
            );
            tokio::time::sleep(backoff).await;
        }

        let url = session.lock().await.url();
        info!(url = %url, "connecting to Discord gateway");

        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to connect to gateway");
                attempts += 1;
                continue;
            }
        };

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));
        let limiter = Arc::new(Mutex::new(SendRateLimiter::new(
            SEND_BUDGET_MAX,
            SEND_BUDGET_WINDOW,
        )));

        let heartbeat_interval = match read_hello(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO from gateway");
                attempts += 1;
                continue;
            }
        };
        info!(interval_ms = heartbeat_interval, "received HELLO");

        let opening = {
            let s = session.lock().await;
            match s.resume_point() {
                Some((session_id, seq)) => ("RESUME", resume_payload(&config.token, session_id, seq)),
                None => ("IDENTIFY", identify_payload(&config)),
            }
        };
        if let Err(e) = rate_limited_send(&ws_write, &limiter, &opening.1).await {
            error!(error = %e, op = opening.0, "failed to open session");
            attempts += 1;
            continue;
        }
        info!(op = opening.0, "session opened");
        attempts = 0;

        let (hb_cancel_tx, hb_cancel_rx) = mpsc::channel::<()>(1);
        let heartbeat_handle = tokio::spawn(heartbeat_loop(
            heartbeat_interval,
            Arc::clone(&ws_write),
            Arc::clone(&limiter),
            Arc::clone(&session),
            hb_cancel_rx,
        ));

        let reason = read_loop(
            &mut ws_read,
            &ws_write,
            &limiter,
            &event_tx,
            &session,
            &mut send_rx,
        )
        .await;

        let _ = hb_cancel_tx.send(()).await;
        heartbeat_handle.abort();
        let _ = ws_write.lock().await.send(WsMessage::Close(None)).await;

        match reason {
            DisconnectReason::ShouldResume => info!("will attempt RESUME"),
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                session.lock().await.forget();
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway error, shutting down");
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }
        attempts += 1;
    }
}

async fn heartbeat_loop(
    interval_ms: u64,
    ws_write: Arc<Mutex<WsSink>>,
    limiter: Arc<Mutex<SendRateLimiter>>,
    session: Arc<Mutex<SessionState>>,
    mut cancel: mpsc::Receiver<()>,
) {
    // First beat after interval * jitter, jitter in [0, 1).
    let first_delay = Duration::from_millis((interval_ms as f64 * rand::random::<f64>()) as u64);
    tokio::select! {
        _ = tokio::time::sleep(first_delay) => {}
        _ = cancel.recv() => return,
    }

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let seq = session.lock().await.sequence;
                if let Err(e) = rate_limited_send(&ws_write, &limiter, &heartbeat_payload(seq)).await {
                    warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
                    return;
                }
                debug!(?seq, "sent heartbeat");
            }
            _ = cancel.recv() => {
                debug!("heartbeat task cancelled");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    limiter: &Arc<Mutex<SendRateLimiter>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
    session: &Arc<Mutex<SessionState>>,
    send_rx: &mut mpsc::Receiver<Value>,
) -> DisconnectReason {
    loop {
        tokio::select! {
            biased;

            Some(payload) = send_rx.recv() => {
                if let Err(e) = rate_limited_send(ws_write, limiter, &payload).await {
                    warn!(error = %e, "failed to send payload on gateway");
                }
            }

            msg = ws_read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        warn!(close_code = ?code, "WebSocket closed by server");
                        return code.map(classify_close).unwrap_or(DisconnectReason::ShouldResume);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return DisconnectReason::ShouldResume;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return DisconnectReason::ShouldResume;
                    }
                };

                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to parse gateway payload");
                        continue;
                    }
                };
                if let Some(s) = payload.s {
                    session.lock().await.sequence = Some(s);
                }

                let event = GatewayEvent::from_payload(payload);
                match &event {
                    GatewayEvent::Ready(ready) => {
                        let mut s = session.lock().await;
                        s.session_id = Some(ready.session_id.clone());
                        s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                        info!(session_id = %ready.session_id, user = %ready.user.username, "gateway READY");
                    }
                    GatewayEvent::HeartbeatRequest => {
                        let seq = session.lock().await.sequence;
                        if let Err(e) = rate_limited_send(ws_write, limiter, &heartbeat_payload(seq)).await {
                            warn!(error = %e, "failed to send requested heartbeat");
                        }
                        continue;
                    }
                    GatewayEvent::HeartbeatAck => debug!("heartbeat acknowledged"),
                    GatewayEvent::Reconnect => {
                        info!("gateway requested reconnect (op 7)");
                        return DisconnectReason::ShouldResume;
                    }
                    GatewayEvent::InvalidSession(resumable) => {
                        warn!(resumable, "session invalidated (op 9)");
                        return if *resumable {
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            DisconnectReason::ShouldResume
                        } else {
                            tokio::time::sleep(Duration::from_secs(3)).await;
                            DisconnectReason::ShouldReidentify
                        };
                    }
                    _ => {}
                }

                if event_tx.send(event).await.is_err() {
                    info!("event channel closed by consumer");
                    return DisconnectReason::EventChannelClosed;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn read_hello(stream: &mut WsStream) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| GatewayError::Handshake("timed out waiting for HELLO".to_string()))?
        .ok_or_else(|| GatewayError::Handshake("stream ended before HELLO".to_string()))??;

    match msg {
        WsMessage::Text(text) => parse_hello(&text),
        other => Err(GatewayError::Handshake(format!(
            "expected text frame for HELLO, got {:?}",
            other
        ))),
    }
}

/// Send a JSON payload on the WebSocket, respecting the send rate limiter.
async fn rate_limited_send(
    ws_write: &Arc<Mutex<WsSink>>,
    limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &Value,
) -> Result<(), GatewayError> {
    loop {
        let delay = limiter.lock().await.delay_at(Instant::now());
        match delay {
            Some(d) => {
                debug!(delay_ms = d.as_millis() as u64, "gateway send rate-limited, waiting");
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }
    limiter.lock().await.record_at(Instant::now());

    let text = serde_json::to_string(payload)?;
    ws_write.lock().await.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(60_000.0) as u64)
}
