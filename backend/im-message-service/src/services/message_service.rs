//! # Message Service
//!
//! The send pipeline and the message lifecycle.
//!
//! ## Send
//!
//! Validation runs before any write: ids, message type, content bounds, then
//! the friendship check (fails closed). The repository persists the message
//! and both conversation rows as one unit; a retryable conflict reruns the
//! whole unit. Delivery to live sessions is attempted afterwards and never
//! fails the send. A successful push moves the message `Sent -> Delivered`.
//!
//! ## Lifecycle
//!
//! Every transition is a compare-and-set on the status the caller observed.
//! When the set misses, the message is re-read and re-validated, so a racing
//! `Delivered` or `Read` never turns into a lost update.

use crate::config::MessageConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    pair_counterpart, parse_pair_id, Message, MessageStatus, MessageType, NewMessage,
};
use crate::repository::{ChatRepository, Retire};
use crate::services::push::{PushRequest, PushService};
use crate::services::relationship_client::FriendshipChecker;
use crate::websocket::message_types::event_types;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const MAX_STORE_ATTEMPTS: u32 = 3;
const MAX_TRANSITION_ATTEMPTS: u32 = 3;
const HISTORY_DEFAULT_LIMIT: i64 = 20;
const HISTORY_MAX_LIMIT: i64 = 100;

/// Time source for the recall window.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub message_type: i16,
    pub content: String,
    #[serde(default)]
    pub extra: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    /// Oldest first
    pub messages: Vec<Message>,
    pub has_more: bool,
}

pub struct MessageService {
    repo: Arc<dyn ChatRepository>,
    friends: Arc<dyn FriendshipChecker>,
    push: PushService,
    config: MessageConfig,
    clock: Arc<dyn Clock>,
}

impl MessageService {
    pub fn new(
        repo: Arc<dyn ChatRepository>,
        friends: Arc<dyn FriendshipChecker>,
        push: PushService,
        config: MessageConfig,
    ) -> Self {
        Self {
            repo,
            friends,
            push,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self, req: SendMessageRequest) -> AppResult<NewMessage> {
        if req.from_user_id <= 0 {
            return Err(AppError::InvalidUserId(req.from_user_id));
        }
        if req.to_user_id <= 0 {
            return Err(AppError::InvalidUserId(req.to_user_id));
        }
        let message_type = MessageType::from_i16(req.message_type)
            .ok_or(AppError::InvalidMessageType(req.message_type))?;
        if req.content.trim().is_empty() {
            return Err(AppError::EmptyContent);
        }
        if req.content.len() > self.config.max_content_bytes {
            return Err(AppError::ContentTooLong {
                max_bytes: self.config.max_content_bytes,
            });
        }

        Ok(NewMessage {
            from_user_id: req.from_user_id,
            to_user_id: req.to_user_id,
            message_type,
            content: req.content,
            extra: req.extra.filter(|e| !e.is_empty()),
        })
    }

    async fn store_with_retry(&self, new: &NewMessage) -> AppResult<Message> {
        let mut attempt = 1;
        loop {
            match self.repo.store_message(new).await {
                Err(e) if e.is_retryable() && attempt < MAX_STORE_ATTEMPTS => {
                    tracing::warn!(
                        from_user_id = new.from_user_id,
                        to_user_id = new.to_user_id,
                        attempt,
                        error = %e,
                        "retrying message store"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Validate, persist, thread into both conversations, then try to deliver.
    pub async fn send_message(&self, req: SendMessageRequest) -> AppResult<Message> {
        let new = self.validate(req)?;

        match self.friends.is_friend(new.from_user_id, new.to_user_id).await {
            Ok(true) => {}
            Ok(false) => return Err(AppError::NotFriends),
            Err(e) => {
                tracing::warn!(
                    from_user_id = new.from_user_id,
                    to_user_id = new.to_user_id,
                    error = %e,
                    "friendship check failed, rejecting send"
                );
                return Err(e);
            }
        }

        let mut message = self.store_with_retry(&new).await?;
        tracing::info!(
            message_id = message.id,
            conversation_id = %message.conversation_id,
            seq = message.seq,
            "message stored"
        );

        let delivered = self
            .push
            .push(message.to_user_id, event_types::NEW_MESSAGE, json!(message))
            .await;
        if delivered {
            match self
                .repo
                .transition_status(message.id, MessageStatus::Sent, MessageStatus::Delivered)
                .await
            {
                Ok(true) => message.status = MessageStatus::Delivered,
                // Already read (or retired) by the time we got here.
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(message_id = message.id, error = %e, "failed to mark delivered");
                }
            }
        }

        Ok(message)
    }

    fn participant_counterpart(conversation_id: &str, user_id: i64) -> AppResult<i64> {
        if parse_pair_id(conversation_id).is_none() {
            return Err(AppError::BadRequest(format!(
                "invalid conversation_id: {conversation_id}"
            )));
        }
        pair_counterpart(conversation_id, user_id).ok_or(AppError::NotParticipant)
    }

    /// A page of history before `last_message_id`, returned oldest first.
    pub async fn get_chat_history(
        &self,
        viewer: i64,
        conversation_id: &str,
        last_message_id: Option<i64>,
        limit: Option<i64>,
    ) -> AppResult<HistoryPage> {
        Self::participant_counterpart(conversation_id, viewer)?;

        let limit = match limit {
            Some(l) if l > 0 => l.min(HISTORY_MAX_LIMIT),
            _ => HISTORY_DEFAULT_LIMIT,
        };
        let before = last_message_id.filter(|id| *id > 0);

        let mut rows = self.repo.history(conversation_id, before, limit + 1).await?;
        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);
        rows.reverse();

        Ok(HistoryPage {
            messages: rows.into_iter().map(Message::masked).collect(),
            has_more,
        })
    }

    /// Mark messages addressed to `reader` as read. Idempotent.
    pub async fn mark_as_read(
        &self,
        reader: i64,
        conversation_id: &str,
        up_to_message_id: Option<i64>,
    ) -> AppResult<u64> {
        Self::participant_counterpart(conversation_id, reader)?;
        let updated = self
            .repo
            .mark_read(reader, conversation_id, up_to_message_id.filter(|id| *id > 0))
            .await?;
        tracing::debug!(reader, conversation_id, updated, "marked as read");
        Ok(updated)
    }

    /// Sender-only recall within the configured window.
    pub async fn recall_message(&self, user_id: i64, message_id: i64) -> AppResult<Message> {
        let mut message = self
            .repo
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            if message.from_user_id != user_id {
                return Err(AppError::NotMessageSender);
            }
            match message.status {
                MessageStatus::Recalled => return Err(AppError::AlreadyRecalled),
                MessageStatus::Deleted => return Err(AppError::AlreadyDeleted),
                _ => {}
            }

            let window = chrono::Duration::from_std(self.config.recall_window)
                .map_err(|_| AppError::Config("recall window out of range".into()))?;
            if self.clock.now() - message.created_at > window {
                return Err(AppError::RecallWindowExpired {
                    created_at: message.created_at,
                    window_secs: window.num_seconds(),
                });
            }

            match self
                .repo
                .retire_message(message.id, message.status, MessageStatus::Recalled)
                .await?
            {
                Retire::Applied(recalled) => {
                    tracing::info!(message_id, user_id, "message recalled");
                    self.notify(&recalled, event_types::MESSAGE_RECALLED).await;
                    return Ok(recalled.masked());
                }
                Retire::Stale(current) => message = current,
                Retire::NotFound => return Err(AppError::NotFound),
            }
        }

        Err(AppError::StatusConflict {
            current: message.status,
        })
    }

    /// Soft-delete for both sides. Either participant may delete.
    pub async fn delete_message(&self, user_id: i64, message_id: i64) -> AppResult<()> {
        let mut message = self
            .repo
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            if !message.is_participant(user_id) {
                return Err(AppError::NotParticipant);
            }
            if message.status == MessageStatus::Deleted {
                return Err(AppError::AlreadyDeleted);
            }

            match self
                .repo
                .retire_message(message.id, message.status, MessageStatus::Deleted)
                .await?
            {
                Retire::Applied(deleted) => {
                    tracing::info!(message_id, user_id, "message deleted");
                    self.notify_counterpart(&deleted, user_id, event_types::MESSAGE_DELETED)
                        .await;
                    return Ok(());
                }
                Retire::Stale(current) => message = current,
                Retire::NotFound => return Err(AppError::NotFound),
            }
        }

        Err(AppError::StatusConflict {
            current: message.status,
        })
    }

    /// One conversation's counter, or the sum over all of the user's rows.
    pub async fn get_unread_count(
        &self,
        user_id: i64,
        conversation_id: Option<&str>,
    ) -> AppResult<i64> {
        let conversation_id = conversation_id.filter(|c| !c.is_empty());
        if let Some(id) = conversation_id {
            Self::participant_counterpart(id, user_id)?;
        }
        self.repo.unread_count(user_id, conversation_id).await
    }

    /// Whether the two users already have a conversation with each other.
    pub async fn shares_conversation(&self, user_id: i64, peer: i64) -> AppResult<bool> {
        if user_id <= 0 || peer <= 0 || user_id == peer {
            return Ok(false);
        }
        Ok(self.repo.get_conversation(user_id, peer).await?.is_some())
    }

    pub async fn push_message(&self, req: PushRequest) -> AppResult<bool> {
        self.push.push_message(req).await
    }

    async fn notify(&self, message: &Message, event_type: &str) {
        self.notify_counterpart(message, message.from_user_id, event_type)
            .await;
    }

    /// Tell the other participant about a lifecycle change. Best effort.
    async fn notify_counterpart(&self, message: &Message, actor: i64, event_type: &str) {
        let target = message.counterpart_of(actor);
        let content = json!({
            "message_id": message.id,
            "conversation_id": message.conversation_id,
            "operator_id": actor,
        });
        if !self.push.push(target, event_type, content).await {
            tracing::debug!(message_id = message.id, target, event_type, "notice not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::models::Conversation;
    use crate::repository::MemoryChatRepository;
    use crate::websocket::Hub;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct AllowAll;

    #[async_trait]
    impl FriendshipChecker for AllowAll {
        async fn is_friend(&self, _: i64, _: i64) -> AppResult<bool> {
            Ok(true)
        }
    }

    /// Fails the first `failures` stores with a serialization conflict.
    struct ConflictingStore {
        inner: MemoryChatRepository,
        failures: u32,
        attempts: AtomicU32,
    }

    impl ConflictingStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryChatRepository::new(),
                failures,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatRepository for ConflictingStore {
        async fn store_message(&self, new: &NewMessage) -> AppResult<Message> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(AppError::Transaction(
                    "could not serialize access due to concurrent update".into(),
                ));
            }
            self.inner.store_message(new).await
        }

        async fn get_message(&self, id: i64) -> AppResult<Option<Message>> {
            self.inner.get_message(id).await
        }

        async fn transition_status(
            &self,
            id: i64,
            from: MessageStatus,
            to: MessageStatus,
        ) -> AppResult<bool> {
            self.inner.transition_status(id, from, to).await
        }

        async fn retire_message(
            &self,
            id: i64,
            expected: MessageStatus,
            target: MessageStatus,
        ) -> AppResult<Retire> {
            self.inner.retire_message(id, expected, target).await
        }

        async fn mark_read(
            &self,
            reader: i64,
            conversation_id: &str,
            up_to: Option<i64>,
        ) -> AppResult<u64> {
            self.inner.mark_read(reader, conversation_id, up_to).await
        }

        async fn history(
            &self,
            conversation_id: &str,
            before: Option<i64>,
            limit: i64,
        ) -> AppResult<Vec<Message>> {
            self.inner.history(conversation_id, before, limit).await
        }

        async fn list_conversations(
            &self,
            user_id: i64,
            offset: i64,
            limit: i64,
        ) -> AppResult<(Vec<Conversation>, i64)> {
            self.inner.list_conversations(user_id, offset, limit).await
        }

        async fn get_conversation(&self, owner: i64, peer: i64) -> AppResult<Option<Conversation>> {
            self.inner.get_conversation(owner, peer).await
        }

        async fn unread_count(&self, user_id: i64, conversation_id: Option<&str>) -> AppResult<i64> {
            self.inner.unread_count(user_id, conversation_id).await
        }
    }

    fn service_with(repo: Arc<dyn ChatRepository>) -> MessageService {
        let (registry, _hub) = Hub::spawn(HubConfig::default());
        MessageService::new(
            repo,
            Arc::new(AllowAll),
            PushService::new(registry, Duration::from_millis(500)),
            MessageConfig::default(),
        )
    }

    fn service() -> MessageService {
        let (registry, _hub) = Hub::spawn(HubConfig::default());
        MessageService::new(
            Arc::new(MemoryChatRepository::new()),
            Arc::new(AllowAll),
            PushService::new(registry, Duration::from_millis(500)),
            MessageConfig {
                max_content_bytes: 16,
                ..MessageConfig::default()
            },
        )
    }

    fn request(from: i64, to: i64, message_type: i16, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            from_user_id: from,
            to_user_id: to,
            message_type,
            content: content.to_string(),
            extra: None,
        }
    }

    #[tokio::test]
    async fn validation_failures_are_distinct() {
        let svc = service();
        assert!(matches!(
            svc.send_message(request(0, 2, 1, "hi")).await,
            Err(AppError::InvalidUserId(0))
        ));
        assert!(matches!(
            svc.send_message(request(1, -4, 1, "hi")).await,
            Err(AppError::InvalidUserId(-4))
        ));
        assert!(matches!(
            svc.send_message(request(1, 2, 6, "hi")).await,
            Err(AppError::InvalidMessageType(6))
        ));
        assert!(matches!(
            svc.send_message(request(1, 2, 1, "   ")).await,
            Err(AppError::EmptyContent)
        ));
        assert!(matches!(
            svc.send_message(request(1, 2, 1, "this is far too long")).await,
            Err(AppError::ContentTooLong { max_bytes: 16 })
        ));
    }

    #[tokio::test]
    async fn history_rejects_outsiders_and_bad_ids() {
        let svc = service();
        svc.send_message(request(1, 2, 1, "hi")).await.unwrap();

        assert!(matches!(
            svc.get_chat_history(3, "1_2", None, None).await,
            Err(AppError::NotParticipant)
        ));
        assert!(matches!(
            svc.get_chat_history(1, "nonsense", None, None).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let svc = service();
        for i in 0..3 {
            svc.send_message(request(1, 2, 1, &format!("m{i}")))
                .await
                .unwrap();
        }

        let page = svc.get_chat_history(1, "1_2", None, Some(0)).await.unwrap();
        assert_eq!(page.messages.len(), 3);
        assert!(!page.has_more);

        let page = svc
            .get_chat_history(1, "1_2", None, Some(10_000))
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 3);
    }

    #[tokio::test]
    async fn transaction_conflict_reruns_the_store() {
        let repo = Arc::new(ConflictingStore::new(1));
        let svc = service_with(repo.clone());

        let msg = svc.send_message(request(1, 2, 1, "retry me")).await.unwrap();
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(msg.seq, 1);
        assert_eq!(repo.inner.unread_count(2, Some("1_2")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persistent_conflict_gives_up_without_writes() {
        let repo = Arc::new(ConflictingStore::new(u32::MAX));
        let svc = service_with(repo.clone());

        let err = svc.send_message(request(1, 2, 1, "never")).await.unwrap_err();
        assert!(matches!(err, AppError::Transaction(_)));
        assert_eq!(err.status_code(), 409);
        assert_eq!(repo.attempts.load(Ordering::SeqCst), MAX_STORE_ATTEMPTS);
        assert!(repo.inner.get_conversation(1, 2).await.unwrap().is_none());
    }
}
