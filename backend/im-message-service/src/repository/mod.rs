//! Durable storage for messages and conversation rows.
//!
//! `PgChatRepository` is the production store. `MemoryChatRepository` keeps the
//! same semantics in-process and backs local runs without `DATABASE_URL`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryChatRepository;
pub use postgres::PgChatRepository;

use crate::error::AppResult;
use crate::models::{Conversation, Message, MessageStatus, NewMessage};
use async_trait::async_trait;

/// Outcome of a terminal transition (recall or delete).
#[derive(Debug, Clone, PartialEq)]
pub enum Retire {
    /// The compare-and-set matched; the message as stored afterwards.
    Applied(Message),
    /// The message was no longer in the expected status.
    Stale(Message),
    NotFound,
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Persist a message as one atomic unit.
    ///
    /// Creates both directional conversation rows if missing, assigns the next
    /// per-pair sequence, inserts the message as `Sent`, points both rows at
    /// it and bumps the recipient's unread counter by one.
    async fn store_message(&self, new: &NewMessage) -> AppResult<Message>;

    async fn get_message(&self, id: i64) -> AppResult<Option<Message>>;

    /// Compare-and-set `from -> to`. Returns false when the status had moved.
    async fn transition_status(
        &self,
        id: i64,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<bool>;

    /// Compare-and-set into `Recalled` or `Deleted`.
    ///
    /// In the same transaction, any conversation row caching this message is
    /// re-pointed at the newest non-deleted message of the pair, and the
    /// recipient's unread counter is recomputed.
    async fn retire_message(
        &self,
        id: i64,
        expected: MessageStatus,
        target: MessageStatus,
    ) -> AppResult<Retire>;

    /// Move messages addressed to `reader` in `conversation_id` (optionally
    /// only those with `id <= up_to`) from below `Read` to `Read`, then
    /// recompute the reader's unread counter. Returns the number updated.
    async fn mark_read(
        &self,
        reader: i64,
        conversation_id: &str,
        up_to: Option<i64>,
    ) -> AppResult<u64>;

    /// Non-deleted messages of a pair, newest first, `id < before` when given.
    async fn history(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;

    /// One page of `user_id`'s rows by `updated_at DESC`, plus the total count.
    async fn list_conversations(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Conversation>, i64)>;

    async fn get_conversation(&self, owner: i64, peer: i64) -> AppResult<Option<Conversation>>;

    /// Unread counter of one of the user's rows, or the sum over all of them.
    async fn unread_count(&self, user_id: i64, conversation_id: Option<&str>) -> AppResult<i64>;
}
