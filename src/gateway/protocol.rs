//! Gateway wire format
//!
//! Every frame is a JSON object `{op, d, s, t}`. Only the opcodes and
//! dispatch events the relay acts on are modelled; everything else is kept
//! as raw JSON and ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::{ChannelId, GuildId, MessageId, UserId};

// ─────────────────────────────────────────────────────────────────
// Opcodes
// ─────────────────────────────────────────────────────────────────

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Channel types that are threads
const THREAD_CHANNEL_TYPES: [u8; 3] = [10, 11, 12];

// ─────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self {
            op: opcode::HEARTBEAT,
            d: json!(sequence),
            s: None,
            t: None,
        }
    }

    pub fn identify(token: &str, intents: u64, device: &str) -> Self {
        Self {
            op: opcode::IDENTIFY,
            d: json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "persona-relay",
                    "device": device,
                },
            }),
            s: None,
            t: None,
        }
    }

    /// Decode the payload of a frame into a typed struct.
    pub fn data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.d)
    }
}

// ─────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub user: Author,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Author {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPayload {
    pub id: ChannelId,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub parent_id: Option<ChannelId>,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

impl ChannelPayload {
    pub fn is_thread(&self) -> bool {
        THREAD_CHANNEL_TYPES.contains(&self.kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreate {
    pub id: GuildId,
    #[serde(default)]
    pub threads: Vec<ChannelPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadListSync {
    pub guild_id: GuildId,
    #[serde(default)]
    pub threads: Vec<ChannelPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author: Author,
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl MessageCreate {
    /// Webhook posts, including our own persona posts, are never proxied.
    pub fn from_bot(&self) -> bool {
        self.author.bot || self.webhook_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let frame = GatewayFrame::from_json(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#).unwrap();
        assert_eq!(frame.op, opcode::HELLO);
        assert_eq!(frame.data::<Hello>().unwrap().heartbeat_interval, 41250);
    }

    #[test]
    fn test_heartbeat_frame() {
        assert_eq!(GatewayFrame::heartbeat(Some(42)).to_json().unwrap(), r#"{"op":1,"d":42}"#);
        assert_eq!(GatewayFrame::heartbeat(None).to_json().unwrap(), r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn test_identify_frame() {
        let frame = GatewayFrame::identify("secret", 33281, "host");
        assert_eq!(frame.op, opcode::IDENTIFY);
        assert_eq!(frame.d["intents"], 33281);
        assert_eq!(frame.d["properties"]["browser"], "persona-relay");
    }

    #[test]
    fn test_parse_message_create() {
        let frame = GatewayFrame::from_json(
            r#"{"op":0,"s":7,"t":"MESSAGE_CREATE","d":{
                "id":"900","channel_id":"10","guild_id":"100",
                "author":{"id":"1","username":"alice"},
                "content":"k: hello"}}"#,
        )
        .unwrap();
        assert_eq!(frame.s, Some(7));
        let msg: MessageCreate = frame.data().unwrap();
        assert_eq!(msg.id, MessageId::new(900));
        assert_eq!(msg.guild_id, Some(GuildId::new(100)));
        assert!(!msg.from_bot());
    }

    #[test]
    fn test_webhook_message_is_bot() {
        let msg: MessageCreate = serde_json::from_value(json!({
            "id": "1", "channel_id": "2",
            "author": {"id": "3", "username": "Mira", "bot": true},
            "webhook_id": "55", "content": "hi"
        }))
        .unwrap();
        assert!(msg.from_bot());
    }

    #[test]
    fn test_thread_detection() {
        let thread: ChannelPayload = serde_json::from_value(json!({"id": "5", "type": 11, "parent_id": "2"})).unwrap();
        let text: ChannelPayload = serde_json::from_value(json!({"id": "2", "type": 0})).unwrap();
        assert!(thread.is_thread());
        assert!(!text.is_thread());
    }
}
