use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// One directional conversation row, owned by `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(skip_serializing, default)]
    pub owner_key: String,
    pub user_id: i64,
    pub peer_id: i64,
    pub conversation_id: String,
    pub last_message_id: Option<i64>,
    pub last_message_content: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i32,
    pub is_top: bool,
    pub is_mute: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const CONVERSATION_COLUMNS: &str = "id, owner_key, user_id, peer_id, conversation_id, \
     last_message_id, last_message_content, last_message_time, unread_count, is_top, is_mute, \
     created_at, updated_at";

impl Conversation {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            owner_key: row.get("owner_key"),
            user_id: row.get("user_id"),
            peer_id: row.get("peer_id"),
            conversation_id: row.get("conversation_id"),
            last_message_id: row.get("last_message_id"),
            last_message_content: row.get("last_message_content"),
            last_message_time: row.get("last_message_time"),
            unread_count: row.get("unread_count"),
            is_top: row.get("is_top"),
            is_mute: row.get("is_mute"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Conversation row enriched with the counterpart's profile.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub peer_nickname: String,
    pub peer_avatar: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationPage {
    pub conversations: Vec<ConversationView>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}
