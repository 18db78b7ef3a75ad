use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Content shown in place of a recalled message.
pub const RECALLED_PLACEHOLDER: &str = "[message recalled]";

/// Message lifecycle status, stored as SMALLINT.
///
/// `Sent -> Delivered -> Read` moves forward only. `Recalled` and `Deleted`
/// are terminal, except that a recalled message may still be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum MessageStatus {
    Sent = 1,
    Delivered = 2,
    Read = 3,
    Recalled = 4,
    Deleted = 5,
}

impl MessageStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::Sent),
            2 => Some(Self::Delivered),
            3 => Some(Self::Read),
            4 => Some(Self::Recalled),
            5 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Counts towards the recipient's unread counter.
    pub fn is_unread(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered)
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Sent, Delivered)
                | (Sent, Read)
                | (Delivered, Read)
                | (Sent, Recalled)
                | (Delivered, Recalled)
                | (Read, Recalled)
                | (Sent, Deleted)
                | (Delivered, Deleted)
                | (Read, Deleted)
                | (Recalled, Deleted)
        )
    }
}

impl From<MessageStatus> for i16 {
    fn from(status: MessageStatus) -> Self {
        status.as_i16()
    }
}

impl TryFrom<i16> for MessageStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::from_i16(value).ok_or_else(|| format!("unknown message status {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum MessageType {
    Text = 1,
    Image = 2,
    Audio = 3,
    Video = 4,
    File = 5,
}

impl MessageType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::Text),
            2 => Some(Self::Image),
            3 => Some(Self::Audio),
            4 => Some(Self::Video),
            5 => Some(Self::File),
            _ => None,
        }
    }
}

impl From<MessageType> for i16 {
    fn from(kind: MessageType) -> Self {
        kind.as_i16()
    }
}

impl TryFrom<i16> for MessageType {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::from_i16(value).ok_or_else(|| format!("unknown message type {value}"))
    }
}

/// Message struct matching the `messages` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    /// Order-independent pair id, see [`crate::models::pair_conversation_id`]
    pub conversation_id: String,
    pub message_type: MessageType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    pub status: MessageStatus,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, from_user_id, to_user_id, conversation_id, \
     message_type, content, extra, status, seq, created_at, updated_at";

impl Message {
    /// Map a row selected with [`MESSAGE_COLUMNS`].
    pub(crate) fn from_row(row: &Row) -> Result<Self, String> {
        let message_type: i16 = row.get("message_type");
        let status: i16 = row.get("status");
        Ok(Self {
            id: row.get("id"),
            from_user_id: row.get("from_user_id"),
            to_user_id: row.get("to_user_id"),
            conversation_id: row.get("conversation_id"),
            message_type: MessageType::try_from(message_type)?,
            content: row.get("content"),
            extra: row.get("extra"),
            status: MessageStatus::try_from(status)?,
            seq: row.get("seq"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// History view: recalled content is replaced by the placeholder.
    pub fn masked(mut self) -> Self {
        if self.status == MessageStatus::Recalled {
            self.content = RECALLED_PLACEHOLDER.to_string();
            self.extra = None;
        }
        self
    }

    pub fn is_participant(&self, user_id: i64) -> bool {
        self.from_user_id == user_id || self.to_user_id == user_id
    }

    /// The other side of the message as seen by `user_id`.
    pub fn counterpart_of(&self, user_id: i64) -> i64 {
        if self.from_user_id == user_id {
            self.to_user_id
        } else {
            self.from_user_id
        }
    }
}

/// A validated message ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub message_type: MessageType,
    pub content: String,
    pub extra: Option<String>,
}

impl NewMessage {
    pub fn conversation_id(&self) -> String {
        super::pair_conversation_id(self.from_user_id, self.to_user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        use MessageStatus::*;
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Recalled.can_transition_to(Read));
        assert!(Recalled.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Recalled));
        assert!(!Recalled.can_transition_to(Recalled));
    }

    #[test]
    fn status_serializes_as_number() {
        let json = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(json, "2");
        let back: MessageStatus = serde_json::from_str("4").unwrap();
        assert_eq!(back, MessageStatus::Recalled);
        assert!(serde_json::from_str::<MessageStatus>("9").is_err());
    }

    #[test]
    fn masked_only_touches_recalled() {
        let now = Utc::now();
        let base = Message {
            id: 1,
            from_user_id: 1,
            to_user_id: 2,
            conversation_id: "1_2".into(),
            message_type: MessageType::Text,
            content: "secret".into(),
            extra: Some("{\"w\":1}".into()),
            status: MessageStatus::Read,
            seq: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(base.clone().masked().content, "secret");

        let recalled = Message {
            status: MessageStatus::Recalled,
            ..base
        }
        .masked();
        assert_eq!(recalled.content, RECALLED_PLACEHOLDER);
        assert!(recalled.extra.is_none());
    }
}
