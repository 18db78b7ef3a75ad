use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame written to a live session: `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }

    pub fn pong(unix_secs: i64) -> Self {
        Self::new(event_types::PONG, Value::from(unix_secs))
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Event names pushed to clients.
pub mod event_types {
    pub const NEW_MESSAGE: &str = "new_message";
    pub const MESSAGE_RECALLED: &str = "message_recalled";
    pub const MESSAGE_DELETED: &str = "message_deleted";
    pub const TYPING: &str = "typing";
    pub const READ_RECEIPT: &str = "read_receipt";
    pub const PONG: &str = "pong";
}

/// Inbound events from client to server. None of them touch durable state.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInboundEvent {
    Ping,
    Typing {
        to_user_id: i64,
    },
    ReadReceipt {
        to_user_id: i64,
        conversation_id: String,
        #[serde(default)]
        message_id: Option<i64>,
    },
}
