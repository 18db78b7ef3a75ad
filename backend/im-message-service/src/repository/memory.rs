use super::{ChatRepository, Retire};
use crate::error::{AppError, AppResult};
use crate::models::message::RECALLED_PLACEHOLDER;
use crate::models::{
    owner_key, pair_counterpart, Conversation, Message, MessageStatus, NewMessage,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Store {
    messages: BTreeMap<i64, Message>,
    conversations: HashMap<String, Conversation>,
    counters: HashMap<String, i64>,
    next_message_id: i64,
    next_conversation_id: i64,
}

impl Store {
    fn ensure_row(&mut self, owner: i64, peer: i64, conversation_id: &str) {
        let key = owner_key(owner, peer);
        if self.conversations.contains_key(&key) {
            return;
        }
        self.next_conversation_id += 1;
        let now = Utc::now();
        self.conversations.insert(
            key.clone(),
            Conversation {
                id: self.next_conversation_id,
                owner_key: key,
                user_id: owner,
                peer_id: peer,
                conversation_id: conversation_id.to_string(),
                last_message_id: None,
                last_message_content: None,
                last_message_time: None,
                unread_count: 0,
                is_top: false,
                is_mute: false,
                created_at: now,
                updated_at: now,
            },
        );
    }

    fn recompute_unread(&mut self, conversation_id: &str, owner: i64, counterpart: i64) {
        let unread = self
            .messages
            .values()
            .filter(|m| {
                m.conversation_id == conversation_id && m.to_user_id == owner && m.status.is_unread()
            })
            .count() as i32;
        if let Some(row) = self.conversations.get_mut(&owner_key(owner, counterpart)) {
            row.unread_count = unread;
        }
    }

    fn recompute_last_message(&mut self, conversation_id: &str, retired_id: i64) {
        let latest = self
            .messages
            .values()
            .rev()
            .find(|m| m.conversation_id == conversation_id && m.status != MessageStatus::Deleted)
            .map(|m| {
                let content = if m.status == MessageStatus::Recalled {
                    RECALLED_PLACEHOLDER.to_string()
                } else {
                    m.content.clone()
                };
                (m.id, content, m.created_at)
            });

        for row in self.conversations.values_mut() {
            if row.conversation_id != conversation_id || row.last_message_id != Some(retired_id) {
                continue;
            }
            match &latest {
                Some((id, content, at)) => {
                    row.last_message_id = Some(*id);
                    row.last_message_content = Some(content.clone());
                    row.last_message_time = Some(*at);
                }
                None => {
                    row.last_message_id = None;
                    row.last_message_content = None;
                    row.last_message_time = None;
                }
            }
        }
    }
}

/// In-process store with the same transactional semantics as Postgres.
///
/// A single lock guards everything, so every trait call is atomic.
#[derive(Default)]
pub struct MemoryChatRepository {
    store: Mutex<Store>,
}

impl MemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatRepository for MemoryChatRepository {
    async fn store_message(&self, new: &NewMessage) -> AppResult<Message> {
        let conversation_id = new.conversation_id();
        let (from, to) = (new.from_user_id, new.to_user_id);
        let mut store = self.store.lock().await;

        store.ensure_row(from, to, &conversation_id);
        store.ensure_row(to, from, &conversation_id);

        let seq = {
            let counter = store.counters.entry(conversation_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        store.next_message_id += 1;
        let now = Utc::now();
        let message = Message {
            id: store.next_message_id,
            from_user_id: from,
            to_user_id: to,
            conversation_id: conversation_id.clone(),
            message_type: new.message_type,
            content: new.content.clone(),
            extra: new.extra.clone(),
            status: MessageStatus::Sent,
            seq,
            created_at: now,
            updated_at: now,
        };
        store.messages.insert(message.id, message.clone());

        let recipient_key = owner_key(to, from);
        let mut keys = vec![owner_key(from, to), recipient_key.clone()];
        keys.dedup();
        for key in &keys {
            if let Some(row) = store.conversations.get_mut(key) {
                row.last_message_id = Some(message.id);
                row.last_message_content = Some(message.content.clone());
                row.last_message_time = Some(message.created_at);
                row.updated_at = now;
            }
        }
        if let Some(row) = store.conversations.get_mut(&recipient_key) {
            row.unread_count += 1;
        }

        Ok(message)
    }

    async fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
        Ok(self.store.lock().await.messages.get(&id).cloned())
    }

    async fn transition_status(
        &self,
        id: i64,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<bool> {
        let mut store = self.store.lock().await;
        match store.messages.get_mut(&id) {
            Some(message) if message.status == from => {
                message.status = to;
                message.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retire_message(
        &self,
        id: i64,
        expected: MessageStatus,
        target: MessageStatus,
    ) -> AppResult<Retire> {
        let mut store = self.store.lock().await;
        let message = match store.messages.get_mut(&id) {
            None => return Ok(Retire::NotFound),
            Some(message) if message.status != expected => {
                return Ok(Retire::Stale(message.clone()))
            }
            Some(message) => {
                message.status = target;
                message.updated_at = Utc::now();
                message.clone()
            }
        };

        store.recompute_last_message(&message.conversation_id, message.id);
        if expected.is_unread() {
            store.recompute_unread(
                &message.conversation_id,
                message.to_user_id,
                message.from_user_id,
            );
        }
        Ok(Retire::Applied(message))
    }

    async fn mark_read(
        &self,
        reader: i64,
        conversation_id: &str,
        up_to: Option<i64>,
    ) -> AppResult<u64> {
        let peer = pair_counterpart(conversation_id, reader).ok_or(AppError::NotParticipant)?;
        let mut store = self.store.lock().await;

        let now = Utc::now();
        let mut updated = 0;
        for message in store.messages.values_mut() {
            if message.conversation_id == conversation_id
                && message.to_user_id == reader
                && message.status.is_unread()
                && up_to.map_or(true, |bound| message.id <= bound)
            {
                message.status = MessageStatus::Read;
                message.updated_at = now;
                updated += 1;
            }
        }

        store.recompute_unread(conversation_id, reader, peer);
        Ok(updated)
    }

    async fn history(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let store = self.store.lock().await;
        Ok(store
            .messages
            .values()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| m.status != MessageStatus::Deleted)
            .filter(|m| before.map_or(true, |cursor| m.id < cursor))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_conversations(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Conversation>, i64)> {
        let store = self.store.lock().await;
        let mut rows: Vec<Conversation> = store
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_conversation(&self, owner: i64, peer: i64) -> AppResult<Option<Conversation>> {
        let store = self.store.lock().await;
        Ok(store.conversations.get(&owner_key(owner, peer)).cloned())
    }

    async fn unread_count(&self, user_id: i64, conversation_id: Option<&str>) -> AppResult<i64> {
        let store = self.store.lock().await;
        Ok(store
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .filter(|c| conversation_id.map_or(true, |id| c.conversation_id == id))
            .map(|c| i64::from(c.unread_count))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;

    fn text(from: i64, to: i64, content: &str) -> NewMessage {
        NewMessage {
            from_user_id: from,
            to_user_id: to,
            message_type: MessageType::Text,
            content: content.to_string(),
            extra: None,
        }
    }

    #[tokio::test]
    async fn first_message_creates_both_rows() {
        let repo = MemoryChatRepository::new();
        let msg = repo.store_message(&text(7, 42, "hi")).await.unwrap();

        assert_eq!(msg.conversation_id, "7_42");
        assert_eq!(msg.seq, 1);
        assert_eq!(msg.status, MessageStatus::Sent);

        let sender = repo.get_conversation(7, 42).await.unwrap().unwrap();
        let recipient = repo.get_conversation(42, 7).await.unwrap().unwrap();
        assert_eq!(sender.unread_count, 0);
        assert_eq!(recipient.unread_count, 1);
        assert_eq!(sender.last_message_id, Some(msg.id));
        assert_eq!(recipient.last_message_content.as_deref(), Some("hi"));
        assert_eq!(sender.conversation_id, recipient.conversation_id);
    }

    #[tokio::test]
    async fn self_message_uses_single_row() {
        let repo = MemoryChatRepository::new();
        repo.store_message(&text(5, 5, "note to self")).await.unwrap();

        let (rows, total) = repo.list_conversations(5, 0, 20).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].unread_count, 1);
    }

    #[tokio::test]
    async fn retire_recomputes_pointer_and_unread() {
        let repo = MemoryChatRepository::new();
        let first = repo.store_message(&text(1, 2, "one")).await.unwrap();
        let second = repo.store_message(&text(1, 2, "two")).await.unwrap();

        let outcome = repo
            .retire_message(second.id, MessageStatus::Sent, MessageStatus::Deleted)
            .await
            .unwrap();
        assert!(matches!(outcome, Retire::Applied(_)));

        let row = repo.get_conversation(2, 1).await.unwrap().unwrap();
        assert_eq!(row.last_message_id, Some(first.id));
        assert_eq!(row.unread_count, 1);

        let stale = repo
            .retire_message(second.id, MessageStatus::Sent, MessageStatus::Deleted)
            .await
            .unwrap();
        assert!(matches!(stale, Retire::Stale(m) if m.status == MessageStatus::Deleted));
    }
}
