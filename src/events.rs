//! Typed gateway events.
//!
//! The gateway deserialises dispatch payloads into [`GatewayEvent`] so the
//! handlers pattern-match on typed data instead of raw `(op, t, d)` tuples.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Identify or resume succeeded.
    Ready(ReadyEvent),

    /// Full guild object, sent lazily after READY and on joins.
    GuildCreate(Guild),

    MessageCreate(Message),

    /// Someone reacted to a message.
    MessageReactionAdd(ReactionAdd),

    /// Slash command or button press.
    InteractionCreate(Interaction),

    /// Op 11.
    HeartbeatAck,

    /// Op 1: the gateway wants a heartbeat now.
    HeartbeatRequest,

    /// Op 7.
    Reconnect,

    /// Op 9. `true` if the session can be resumed.
    InvalidSession(bool),

    /// Anything without a typed variant, or a payload that failed to parse.
    Unknown { event_name: Option<String>, op: u8 },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event. Never fails.
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                event_name: payload.t,
                op,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<Value>) -> Self {
        let Some(d) = data else {
            return GatewayEvent::Unknown { event_name, op: 0 };
        };
        let Some(name) = event_name.as_deref() else {
            return GatewayEvent::Unknown { event_name: None, op: 0 };
        };

        let parsed = match name {
            "READY" => parse(name, d).map(GatewayEvent::Ready),
            "GUILD_CREATE" => parse(name, d).map(GatewayEvent::GuildCreate),
            "MESSAGE_CREATE" => parse(name, d).map(GatewayEvent::MessageCreate),
            "MESSAGE_REACTION_ADD" => parse(name, d).map(GatewayEvent::MessageReactionAdd),
            "INTERACTION_CREATE" => parse(name, d).map(GatewayEvent::InteractionCreate),
            _ => None,
        };
        parsed.unwrap_or(GatewayEvent::Unknown { event_name, op: 0 })
    }

    /// Dispatch name, for logging.
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::GuildCreate(_) => "GUILD_CREATE",
            GatewayEvent::MessageCreate(_) => "MESSAGE_CREATE",
            GatewayEvent::MessageReactionAdd(_) => "MESSAGE_REACTION_ADD",
            GatewayEvent::InteractionCreate(_) => "INTERACTION_CREATE",
            GatewayEvent::HeartbeatAck => "HEARTBEAT_ACK",
            GatewayEvent::HeartbeatRequest => "HEARTBEAT",
            GatewayEvent::Reconnect => "RECONNECT",
            GatewayEvent::InvalidSession(_) => "INVALID_SESSION",
            GatewayEvent::Unknown { event_name, .. } => event_name.as_deref().unwrap_or("UNKNOWN"),
        }
    }
}

fn parse<T: DeserializeOwned>(name: &str, data: Value) -> Option<T> {
    serde_json::from_value(data)
        .map_err(|e| warn!(event = name, error = %e, "failed to parse dispatch payload"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatch(t: &str, d: Value) -> GatewayEvent {
        GatewayEvent::from_payload(GatewayPayload {
            op: 0,
            d: Some(d),
            s: Some(1),
            t: Some(t.into()),
        })
    }

    fn control(op: u8, d: Option<Value>) -> GatewayEvent {
        GatewayEvent::from_payload(GatewayPayload { op, d, s: None, t: None })
    }

    // -- dispatch ----------------------------------------------------------

    #[test]
    fn ready_is_typed() {
        let event = dispatch(
            "READY",
            json!({
                "v": 10,
                "user": { "id": "42", "username": "dogbot", "discriminator": "0", "avatar": null, "bot": true, "global_name": null },
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.discord.gg",
                "guilds": [{ "id": "1", "unavailable": true }, { "id": "2", "unavailable": true }],
                "application": { "id": "77", "flags": 0 }
            }),
        );
        let GatewayEvent::Ready(ready) = event else {
            panic!("expected READY, got {:?}", event);
        };
        assert_eq!(ready.user.id, "42");
        assert_eq!(ready.application.id, "77");
        assert_eq!(ready.guilds.len(), 2);
    }

    #[test]
    fn reaction_add_is_typed() {
        let event = dispatch(
            "MESSAGE_REACTION_ADD",
            json!({
                "user_id": "6",
                "channel_id": "10",
                "message_id": "900",
                "guild_id": "1",
                "emoji": { "id": "99", "name": "staring_dog" }
            }),
        );
        let GatewayEvent::MessageReactionAdd(reaction) = event else {
            panic!("expected MESSAGE_REACTION_ADD, got {:?}", event);
        };
        assert_eq!(reaction.message_id, "900");
        assert!(reaction.emoji.matches("<:staring_dog:99>"));
    }

    #[test]
    fn message_create_is_typed() {
        let event = dispatch(
            "MESSAGE_CREATE",
            json!({
                "id": "1300000000000000000",
                "channel_id": "10",
                "guild_id": "1",
                "author": { "id": "5", "username": "alice", "discriminator": "0", "avatar": null, "global_name": null },
                "content": "dog",
                "timestamp": "2024-10-01T12:00:03.000000+00:00"
            }),
        );
        assert!(matches!(event, GatewayEvent::MessageCreate(ref m) if m.content == "dog"));
    }

    #[test]
    fn malformed_and_untyped_dispatches_become_unknown() {
        let bad = dispatch("MESSAGE_CREATE", json!({ "id": 5 }));
        assert!(matches!(bad, GatewayEvent::Unknown { op: 0, .. }));
        assert_eq!(bad.name(), "MESSAGE_CREATE");

        let typing = dispatch("TYPING_START", json!({}));
        assert_eq!(typing.name(), "TYPING_START");
    }

    // -- control ops -------------------------------------------------------

    #[test]
    fn control_opcodes_map_to_variants() {
        assert!(matches!(control(1, None), GatewayEvent::HeartbeatRequest));
        assert!(matches!(control(7, None), GatewayEvent::Reconnect));
        assert!(matches!(control(11, None), GatewayEvent::HeartbeatAck));
        assert!(matches!(control(9, Some(json!(true))), GatewayEvent::InvalidSession(true)));
        assert!(matches!(control(9, None), GatewayEvent::InvalidSession(false)));
        assert!(matches!(control(42, None), GatewayEvent::Unknown { op: 42, .. }));
    }
}
